use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::abbrev::AbbreviatedObjectId;
use crate::error::TypeError;
use crate::hash::HashAlgorithm;

const MAX_RAW_LEN: usize = 32;

/// Content-addressed identifier for a stored object.
///
/// An `ObjectId` is the hash of an object's framed content: 20 bytes for
/// SHA-1 repositories, 32 bytes for SHA-256 repositories. Ordering is the
/// unsigned lexicographic order of the raw bytes, which is the order pack
/// indexes are sorted in.
#[derive(Clone, Copy)]
pub struct ObjectId {
    raw: [u8; MAX_RAW_LEN],
    len: u8,
}

impl ObjectId {
    /// Create an `ObjectId` from raw hash bytes (20 or 32 of them).
    pub fn from_raw(bytes: &[u8]) -> Result<Self, TypeError> {
        if HashAlgorithm::from_raw_len(bytes.len()).is_none() {
            return Err(TypeError::InvalidIdentifier(format!(
                "expected 20 or 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::from_digest(bytes))
    }

    /// Parse from a 40- or 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let algorithm = HashAlgorithm::from_hex_len(s.len()).ok_or_else(|| {
            TypeError::InvalidIdentifier(format!(
                "expected 40 or 64 hex digits, got {}",
                s.len()
            ))
        })?;
        let mut raw = [0u8; MAX_RAW_LEN];
        hex::decode_to_slice(s, &mut raw[..algorithm.raw_len()])
            .map_err(|e| TypeError::InvalidIdentifier(format!("{s:?}: {e}")))?;
        Ok(Self {
            raw,
            len: algorithm.raw_len() as u8,
        })
    }

    /// The all-zero identifier, used as an "unset" sentinel.
    pub const fn zero(algorithm: HashAlgorithm) -> Self {
        Self {
            raw: [0u8; MAX_RAW_LEN],
            len: algorithm.raw_len() as u8,
        }
    }

    /// Build from a digest whose length is already known to be valid.
    pub(crate) fn from_digest(bytes: &[u8]) -> Self {
        let mut raw = [0u8; MAX_RAW_LEN];
        raw[..bytes.len()].copy_from_slice(bytes);
        Self {
            raw,
            len: bytes.len() as u8,
        }
    }

    /// Returns `true` if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// The hash algorithm implied by this identifier's length.
    pub fn algorithm(&self) -> HashAlgorithm {
        if self.len as usize == HashAlgorithm::Sha256.raw_len() {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Sha1
        }
    }

    /// The raw hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len as usize]
    }

    /// First byte of the hash, used for fan-out tables and loose object
    /// directory names.
    pub fn first_byte(&self) -> u8 {
        self.raw[0]
    }

    /// Copy the raw bytes into `out`, which must be at least as long as
    /// the identifier. Returns the number of bytes written.
    pub fn copy_raw_to(&self, out: &mut [u8]) -> usize {
        let bytes = self.as_bytes();
        out[..bytes.len()].copy_from_slice(bytes);
        bytes.len()
    }

    /// Write the lower-case hex form into any text sink.
    pub fn write_hex<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        for &b in self.as_bytes() {
            out.write_char(DIGITS[(b >> 4) as usize] as char)?;
            out.write_char(DIGITS[(b & 0x0f) as usize] as char)?;
        }
        Ok(())
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Short hex representation (first 7 characters).
    pub fn short_hex(&self) -> String {
        self.abbreviate(7).name()
    }

    /// The first `nibbles` hex digits of this identifier.
    pub fn abbreviate(&self, nibbles: usize) -> AbbreviatedObjectId {
        AbbreviatedObjectId::from_object_id(self, nibbles)
    }

    /// Returns `true` if this identifier begins with `prefix`.
    pub fn starts_with(&self, prefix: &AbbreviatedObjectId) -> bool {
        prefix.prefix_compare(self) == Ordering::Equal
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(self.as_bytes());
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_hex(f)
    }
}

impl FromStr for ObjectId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = TypeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_raw(bytes)
    }
}

impl From<[u8; 20]> for ObjectId {
    fn from(bytes: [u8; 20]) -> Self {
        Self::from_digest(&bytes)
    }
}

impl From<[u8; 32]> for ObjectId {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_digest(&bytes)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
