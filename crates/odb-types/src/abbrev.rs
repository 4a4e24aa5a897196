use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;
use crate::hash::HashAlgorithm;
use crate::object::ObjectId;

const MAX_NIBBLES: usize = 64;

/// A possibly-incomplete object identifier, as typed by a user.
///
/// Resolution is a half byte (one hex digit), so odd lengths are legal: the
/// low nibble of the last stored byte is then ignored in comparisons.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbbreviatedObjectId {
    raw: [u8; MAX_NIBBLES / 2],
    nibbles: u8,
}

impl AbbreviatedObjectId {
    /// Parse 1 to 64 hex digits.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.is_empty() || s.len() > MAX_NIBBLES {
            return Err(TypeError::InvalidIdentifier(format!(
                "abbreviation must have 1 to {MAX_NIBBLES} hex digits, got {}",
                s.len()
            )));
        }
        let mut raw = [0u8; MAX_NIBBLES / 2];
        for (i, c) in s.bytes().enumerate() {
            let nibble = hex_value(c).ok_or_else(|| {
                TypeError::InvalidIdentifier(format!("{s:?}: invalid hex digit {:?}", c as char))
            })?;
            if i % 2 == 0 {
                raw[i / 2] = nibble << 4;
            } else {
                raw[i / 2] |= nibble;
            }
        }
        Ok(Self {
            raw,
            nibbles: s.len() as u8,
        })
    }

    /// Take the first `nibbles` hex digits of a full identifier.
    pub fn from_object_id(id: &ObjectId, nibbles: usize) -> Self {
        let bytes = id.as_bytes();
        let nibbles = nibbles.min(bytes.len() * 2);
        let mut raw = [0u8; MAX_NIBBLES / 2];
        let whole = nibbles / 2;
        raw[..whole].copy_from_slice(&bytes[..whole]);
        if nibbles % 2 == 1 {
            raw[whole] = bytes[whole] & 0xf0;
        }
        Self {
            raw,
            nibbles: nibbles as u8,
        }
    }

    /// Number of hex digits.
    pub fn len(&self) -> usize {
        self.nibbles as usize
    }

    /// Always `false`; abbreviations have at least one digit.
    pub fn is_empty(&self) -> bool {
        self.nibbles == 0
    }

    /// Returns `true` if this abbreviation covers a full hash.
    pub fn is_complete(&self) -> bool {
        HashAlgorithm::from_hex_len(self.len()).is_some()
    }

    /// The full identifier, or `None` when the abbreviation is incomplete.
    pub fn to_object_id(&self) -> Option<ObjectId> {
        let algorithm = HashAlgorithm::from_hex_len(self.len())?;
        ObjectId::from_raw(&self.raw[..algorithm.raw_len()]).ok()
    }

    /// First byte of the prefix; only the high nibble is meaningful when
    /// the abbreviation is a single digit.
    pub fn first_byte(&self) -> u8 {
        self.raw[0]
    }

    /// Compare this prefix against the leading digits of `full`.
    ///
    /// Returns `Less` if the prefix sorts before `full`, `Equal` if `full`
    /// starts with it, and `Greater` otherwise.
    pub fn prefix_compare(&self, full: &ObjectId) -> Ordering {
        let other = full.as_bytes();
        let whole = self.len() / 2;
        if other.len() * 2 < self.len() {
            return self.raw[..other.len()].cmp(other).then(Ordering::Greater);
        }
        match self.raw[..whole].cmp(&other[..whole]) {
            Ordering::Equal if self.len() % 2 == 1 => {
                (self.raw[whole] & 0xf0).cmp(&(other[whole] & 0xf0))
            }
            ord => ord,
        }
    }

    /// Hex digits of this abbreviation.
    pub fn name(&self) -> String {
        let mut hex = hex::encode(&self.raw[..self.len().div_ceil(2)]);
        hex.truncate(self.len());
        hex
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Debug for AbbreviatedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AbbreviatedObjectId({})", self.name())
    }
}

impl fmt::Display for AbbreviatedObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for AbbreviatedObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<ObjectId> for AbbreviatedObjectId {
    fn from(id: ObjectId) -> Self {
        Self::from_object_id(&id, id.as_bytes().len() * 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FULL: &str = "7b6e8067ec96acef9a4184b43210d583b6d2f99a";

    #[test]
    fn full_length_is_complete() {
        let a = AbbreviatedObjectId::from_hex(FULL).unwrap();
        assert!(a.is_complete());
        assert_eq!(a.name(), FULL);
        assert_eq!(a.to_object_id(), Some(ObjectId::from_hex(FULL).unwrap()));
    }

    #[test]
    fn short_forms_are_incomplete() {
        for n in [1, 2, 3, 4, 5, 8, 9, 17] {
            let s = &FULL[..n];
            let a = AbbreviatedObjectId::from_hex(s).unwrap();
            assert_eq!(a.len(), n);
            assert!(!a.is_complete());
            assert_eq!(a.name(), s);
            assert!(a.to_object_id().is_none());
        }
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(AbbreviatedObjectId::from_hex("").is_err());
        assert!(AbbreviatedObjectId::from_hex("7g").is_err());
        assert!(AbbreviatedObjectId::from_hex(&"a".repeat(65)).is_err());
    }

    #[test]
    fn equality_depends_on_length() {
        let a = AbbreviatedObjectId::from_hex("7b6e8067").unwrap();
        let b = AbbreviatedObjectId::from_hex("7b6e8067").unwrap();
        let c = AbbreviatedObjectId::from_hex("7b6e806e").unwrap();
        let d = AbbreviatedObjectId::from_hex("7b6e8067abcd").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn prefix_compare_full() {
        let a = AbbreviatedObjectId::from_hex(FULL).unwrap();
        let same = ObjectId::from_hex(FULL).unwrap();
        assert_eq!(a.prefix_compare(&same), Ordering::Equal);
        assert!(same.starts_with(&a));

        let above = ObjectId::from_hex("7b6e8067ec96acef9a4184b43210d583b6d2f99b").unwrap();
        assert_eq!(a.prefix_compare(&above), Ordering::Less);
        assert!(!above.starts_with(&a));

        let below = ObjectId::from_hex("7b6e8067ec96acef9a4184b43210d583b6d2f999").unwrap();
        assert_eq!(a.prefix_compare(&below), Ordering::Greater);
    }

    #[test]
    fn prefix_compare_odd_length_masks_last_nibble() {
        let a = AbbreviatedObjectId::from_hex("7").unwrap();
        let id = ObjectId::from_hex(FULL).unwrap();
        assert_eq!(a.prefix_compare(&id), Ordering::Equal);

        let lower = ObjectId::from_hex("6b6e8067ec96acef9a4184b43210d583b6d2f99a").unwrap();
        assert_eq!(a.prefix_compare(&lower), Ordering::Greater);

        let higher = ObjectId::from_hex("8b6e8067ec96acef9a4184b43210d583b6d2f99a").unwrap();
        assert_eq!(a.prefix_compare(&higher), Ordering::Less);

        let three = AbbreviatedObjectId::from_hex("7b6").unwrap();
        assert!(id.starts_with(&three));
        let miss = AbbreviatedObjectId::from_hex("7b7").unwrap();
        assert!(!id.starts_with(&miss));
    }

    #[test]
    fn abbreviate_from_id() {
        let id = ObjectId::from_hex(FULL).unwrap();
        assert_eq!(id.abbreviate(9).name(), "7b6e8067e");
        assert_eq!(id.abbreviate(100).len(), 40);
    }

    proptest! {
        #[test]
        fn prefixes_of_an_id_match_it(bytes in proptest::collection::vec(any::<u8>(), 20),
                                      n in 1usize..=40) {
            let id = ObjectId::from_raw(&bytes).unwrap();
            let prefix = AbbreviatedObjectId::from_hex(&id.to_hex()[..n]).unwrap();
            prop_assert_eq!(prefix.prefix_compare(&id), Ordering::Equal);
            prop_assert!(id.starts_with(&prefix));
            prop_assert_eq!(prefix, id.abbreviate(n));
        }
    }
}
