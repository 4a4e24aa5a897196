use std::collections::hash_map::{self, HashMap};
use std::collections::HashSet;

use odb_types::ObjectId;

/// Hasher state shared by the identifier-keyed maps: fast, and seeded per
/// process so colliding keys cannot be chosen ahead of time.
pub type IdBuildHasher = ahash::RandomState;

/// Map keyed by object identifier.
pub type ObjectIdMap<V> = HashMap<ObjectId, V, IdBuildHasher>;

/// Set of object identifiers, for "have I seen this" bookkeeping.
pub type ObjectIdSet = HashSet<ObjectId, IdBuildHasher>;

/// Map keyed by a primitive `u64` (pack offsets, block positions).
#[derive(Clone, Debug)]
pub struct LongMap<V> {
    map: HashMap<u64, V, IdBuildHasher>,
}

impl<V> LongMap<V> {
    pub fn new() -> Self {
        Self {
            map: HashMap::default(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, IdBuildHasher::default()),
        }
    }

    /// Insert a value, returning the previous value for `key`.
    pub fn insert(&mut self, key: u64, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    pub fn get(&self, key: u64) -> Option<&V> {
        self.map.get(&key)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        self.map.get_mut(&key)
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.map.contains_key(&key)
    }

    pub fn remove(&mut self, key: u64) -> Option<V> {
        self.map.remove(&key)
    }

    /// Get the value for `key`, inserting one computed by `f` if absent.
    pub fn get_or_insert_with(&mut self, key: u64, f: impl FnOnce() -> V) -> &mut V {
        self.map.entry(key).or_insert_with(f)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &V)> {
        self.map.iter().map(|(k, v)| (*k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.map.keys().copied()
    }
}

impl<V> Default for LongMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IntoIterator for LongMap<V> {
    type Item = (u64, V);
    type IntoIter = hash_map::IntoIter<u64, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}

impl<V> FromIterator<(u64, V)> for LongMap<V> {
    fn from_iter<I: IntoIterator<Item = (u64, V)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::{hash_object, HashAlgorithm, ObjectKind};

    #[test]
    fn empty_map() {
        let map: LongMap<u64> = LongMap::new();
        assert!(map.is_empty());
        assert!(map.get(0).is_none());
        assert!(!map.contains_key(42));
    }

    #[test]
    fn insert_min_and_max() {
        let mut map = LongMap::new();
        assert!(map.insert(u64::MIN, "min").is_none());
        assert!(map.insert(u64::MAX, "max").is_none());
        assert_eq!(map.get(u64::MIN), Some(&"min"));
        assert_eq!(map.get(u64::MAX), Some(&"max"));
        assert!(!map.contains_key(1));
    }

    #[test]
    fn replace_returns_previous() {
        let mut map = LongMap::new();
        map.insert(7, 1);
        assert_eq!(map.insert(7, 2), Some(1));
        assert_eq!(map.get(7), Some(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_neighbouring_keys() {
        let mut map = LongMap::new();
        map.insert(0, 0u64);
        map.insert(1, 1u64);
        assert_eq!(map.remove(0), Some(0));
        assert!(!map.contains_key(0));
        assert!(map.contains_key(1));
        assert_eq!(map.remove(1), Some(1));
        assert!(map.is_empty());
    }

    #[test]
    fn large_map() {
        let start = i32::MAX as u64;
        let n = 100_000u64;
        let mut map = LongMap::with_capacity(16);
        for i in start..start + n {
            assert!(map.insert(i, i).is_none());
        }
        assert_eq!(map.len(), n as usize);
        for i in start..start + n {
            assert_eq!(map.get(i), Some(&i));
        }
    }

    #[test]
    fn get_or_insert_with_only_computes_once() {
        let mut map = LongMap::new();
        *map.get_or_insert_with(3, || 10) += 1;
        *map.get_or_insert_with(3, || 100) += 1;
        assert_eq!(map.get(3), Some(&12));
    }

    #[test]
    fn object_id_set_tracks_ids() {
        let mut seen = ObjectIdSet::default();
        let a = hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, b"a");
        let b = hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, b"b");
        assert!(seen.insert(a));
        assert!(!seen.insert(a));
        assert!(seen.contains(&a));
        assert!(!seen.contains(&b));

        let mut sizes: ObjectIdMap<usize> = ObjectIdMap::default();
        sizes.insert(b, 1);
        assert_eq!(sizes.get(&b), Some(&1));
    }

    #[test]
    fn offsets_sharing_low_bits_stay_distinct() {
        let mut map = LongMap::new();
        for i in 0..1024u64 {
            map.insert(i << 32, i);
        }
        assert_eq!(map.len(), 1024);
        assert!((0..1024u64).all(|i| map.get(i << 32) == Some(&i)));
        assert!(!map.contains_key(1));
    }
}
