use std::cmp::Ordering;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use odb_types::{AbbreviatedObjectId, HashAlgorithm, ObjectId};

use crate::error::{PackError, PackResult};

const INDEX_MAGIC: &[u8; 4] = b"\xfftOc";
const INDEX_VERSION: u32 = 2;
const FAN_OUT_START: usize = 8;
const FAN_OUT_LEN: usize = 256 * 4;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// One object in a pack index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: ObjectId,
    pub crc32: u32,
    pub offset: u64,
}

enum IndexData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for IndexData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// Git pack index, version 2.
///
/// Layout:
/// - magic `\xfftOc` and version 2
/// - fan-out table: 256 big-endian counts of objects whose first byte is
///   at most the slot
/// - sorted object identifiers
/// - CRC-32 of every entry's raw bytes
/// - 31-bit offsets; an MSB set means "index into the 64-bit table"
/// - 64-bit offsets
/// - pack checksum, then index checksum
///
/// All lookups read straight from the bytes, which are usually a read-only
/// memory map of the `.idx` file.
pub struct PackIndex {
    data: IndexData,
    algorithm: HashAlgorithm,
    count: usize,
    names_start: usize,
    crc_start: usize,
    offset_start: usize,
    large_start: usize,
    large_count: usize,
}

impl PackIndex {
    /// Build an index for the given entries and pack trailer.
    pub fn build(mut entries: Vec<IndexEntry>, pack_checksum: &ObjectId) -> Self {
        let algorithm = pack_checksum.algorithm();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.dedup_by(|a, b| a.id == b.id);

        let hash_len = algorithm.raw_len();
        let mut buf = Vec::with_capacity(
            FAN_OUT_START + FAN_OUT_LEN + entries.len() * (hash_len + 8) + 2 * hash_len,
        );
        buf.extend_from_slice(INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());

        let mut fan_out = [0u32; 256];
        for entry in &entries {
            fan_out[entry.id.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for count in fan_out {
            running += count;
            buf.extend_from_slice(&running.to_be_bytes());
        }

        for entry in &entries {
            buf.extend_from_slice(entry.id.as_bytes());
        }
        for entry in &entries {
            buf.extend_from_slice(&entry.crc32.to_be_bytes());
        }
        let mut large = Vec::new();
        for entry in &entries {
            if entry.offset < LARGE_OFFSET_FLAG as u64 {
                buf.extend_from_slice(&(entry.offset as u32).to_be_bytes());
            } else {
                let slot = LARGE_OFFSET_FLAG | large.len() as u32;
                buf.extend_from_slice(&slot.to_be_bytes());
                large.push(entry.offset);
            }
        }
        let large_count = large.len();
        for offset in large {
            buf.extend_from_slice(&offset.to_be_bytes());
        }

        buf.extend_from_slice(pack_checksum.as_bytes());
        let checksum = algorithm.digest(&buf);
        buf.extend_from_slice(checksum.as_bytes());

        let count = entries.len();
        let names_start = FAN_OUT_START + FAN_OUT_LEN;
        let crc_start = names_start + count * hash_len;
        let offset_start = crc_start + count * 4;
        Self {
            data: IndexData::Owned(buf),
            algorithm,
            count,
            names_start,
            crc_start,
            offset_start,
            large_start: offset_start + count * 4,
            large_count,
        }
    }

    /// Parse and checksum-verify index bytes.
    pub fn from_bytes(bytes: Vec<u8>, algorithm: HashAlgorithm) -> PackResult<Self> {
        let index = Self::layout(IndexData::Owned(bytes), algorithm)?;
        index.verify_checksum()?;
        Ok(index)
    }

    /// Memory-map and verify the index at `path`.
    pub fn open(path: &Path, algorithm: HashAlgorithm) -> PackResult<Self> {
        let file = File::open(path)?;
        // SAFETY: index files are written once to a temporary name and
        // renamed into place; nothing modifies them afterwards.
        let map = unsafe { Mmap::map(&file)? };
        let index = Self::layout(IndexData::Mapped(map), algorithm)?;
        index.verify_checksum()?;
        Ok(index)
    }

    fn layout(data: IndexData, algorithm: HashAlgorithm) -> PackResult<Self> {
        let hash_len = algorithm.raw_len();
        if data.len() < FAN_OUT_START + FAN_OUT_LEN + 2 * hash_len {
            return Err(PackError::CorruptIndex("index file too short".into()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(PackError::CorruptIndex("missing index signature".into()));
        }
        let version = read_u32(&data, 4);
        if version != INDEX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let mut previous = 0;
        for slot in 0..256 {
            let count = read_u32(&data, FAN_OUT_START + slot * 4);
            if count < previous {
                return Err(PackError::CorruptIndex("fan-out table is not monotonic".into()));
            }
            previous = count;
        }
        let count = previous as usize;

        let names_start = FAN_OUT_START + FAN_OUT_LEN;
        let crc_start = names_start + count * hash_len;
        let offset_start = crc_start + count * 4;
        let large_start = offset_start + count * 4;
        let trailer_start = data
            .len()
            .checked_sub(2 * hash_len)
            .filter(|&t| t >= large_start)
            .ok_or_else(|| PackError::CorruptIndex("index tables truncated".into()))?;
        if (trailer_start - large_start) % 8 != 0 {
            return Err(PackError::CorruptIndex("malformed 64-bit offset table".into()));
        }

        Ok(Self {
            data,
            algorithm,
            count,
            names_start,
            crc_start,
            offset_start,
            large_start,
            large_count: (trailer_start - large_start) / 8,
        })
    }

    fn verify_checksum(&self) -> PackResult<()> {
        let hash_len = self.algorithm.raw_len();
        let body = &self.data[..self.data.len() - hash_len];
        if self.algorithm.digest(body) != self.index_checksum() {
            return Err(PackError::CorruptIndex("index checksum mismatch".into()));
        }
        Ok(())
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn object_count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Trailer checksum of the pack this index describes.
    pub fn pack_checksum(&self) -> ObjectId {
        let hash_len = self.algorithm.raw_len();
        let start = self.data.len() - 2 * hash_len;
        self.id_from(start)
    }

    pub fn index_checksum(&self) -> ObjectId {
        let hash_len = self.algorithm.raw_len();
        self.id_from(self.data.len() - hash_len)
    }

    /// Identifier at sorted position `position`.
    ///
    /// # Panics
    ///
    /// If `position >= object_count()`.
    pub fn id_at(&self, position: usize) -> ObjectId {
        assert!(position < self.count, "index position out of range");
        self.id_from(self.names_start + position * self.algorithm.raw_len())
    }

    pub fn crc_at(&self, position: usize) -> u32 {
        read_u32(&self.data, self.crc_start + position * 4)
    }

    pub fn offset_at(&self, position: usize) -> PackResult<u64> {
        let raw = read_u32(&self.data, self.offset_start + position * 4);
        if raw & LARGE_OFFSET_FLAG == 0 {
            return Ok(raw as u64);
        }
        let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
        if slot >= self.large_count {
            return Err(PackError::CorruptIndex(format!(
                "64-bit offset slot {slot} out of range"
            )));
        }
        Ok(read_u64(&self.data, self.large_start + slot * 8))
    }

    /// Sorted position of `id`, if present.
    pub fn find_position(&self, id: &ObjectId) -> Option<usize> {
        if id.algorithm() != self.algorithm {
            return None;
        }
        let (mut lo, mut hi) = self.fan_out_range(id.first_byte());
        let want = id.as_bytes();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.raw_id(mid).cmp(want) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    pub fn find_offset(&self, id: &ObjectId) -> PackResult<Option<u64>> {
        match self.find_position(id) {
            Some(pos) => self.offset_at(pos).map(Some),
            None => Ok(None),
        }
    }

    pub fn find_crc(&self, id: &ObjectId) -> Option<u32> {
        self.find_position(id).map(|pos| self.crc_at(pos))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.find_position(id).is_some()
    }

    /// Append up to `limit` identifiers starting with `prefix` to `out`.
    pub fn resolve_prefix(
        &self,
        prefix: &AbbreviatedObjectId,
        limit: usize,
        out: &mut Vec<ObjectId>,
    ) {
        if prefix.is_empty() || prefix.len() > self.algorithm.hex_len() {
            return;
        }
        // A single digit spans sixteen fan-out slots.
        let first = prefix.first_byte();
        let last = if prefix.len() == 1 { first | 0x0f } else { first };
        let (mut lo, _) = self.fan_out_range(first);
        let (_, end) = self.fan_out_range(last);
        let mut hi = end;
        // Lower bound of the matching run.
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if prefix.prefix_compare(&self.id_at(mid)) == Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let mut added = 0;
        for pos in lo..end {
            if added >= limit {
                break;
            }
            let id = self.id_at(pos);
            if prefix.prefix_compare(&id) != Ordering::Equal {
                break;
            }
            out.push(id);
            added += 1;
        }
    }

    /// Entries in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = PackResult<IndexEntry>> + '_ {
        (0..self.count).map(move |pos| {
            Ok(IndexEntry {
                id: self.id_at(pos),
                crc32: self.crc_at(pos),
                offset: self.offset_at(pos)?,
            })
        })
    }

    /// Entries sorted by pack offset.
    pub fn entries_by_offset(&self) -> PackResult<Vec<IndexEntry>> {
        let mut entries = self.iter().collect::<PackResult<Vec<_>>>()?;
        entries.sort_by_key(|e| e.offset);
        Ok(entries)
    }

    /// The serialized index.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    fn fan_out_range(&self, first_byte: u8) -> (usize, usize) {
        let slot = first_byte as usize;
        let start = if slot == 0 {
            0
        } else {
            read_u32(&self.data, FAN_OUT_START + (slot - 1) * 4) as usize
        };
        let end = read_u32(&self.data, FAN_OUT_START + slot * 4) as usize;
        (start, end)
    }

    fn raw_id(&self, position: usize) -> &[u8] {
        let hash_len = self.algorithm.raw_len();
        let start = self.names_start + position * hash_len;
        &self.data[start..start + hash_len]
    }

    fn id_from(&self, start: usize) -> ObjectId {
        match self.algorithm {
            HashAlgorithm::Sha1 => {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(&self.data[start..start + 20]);
                ObjectId::from(raw)
            }
            HashAlgorithm::Sha256 => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(&self.data[start..start + 32]);
                ObjectId::from(raw)
            }
        }
    }
}

impl std::fmt::Debug for PackIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackIndex")
            .field("algorithm", &self.algorithm)
            .field("objects", &self.count)
            .field("large_offsets", &self.large_count)
            .finish()
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_be_bytes(raw)
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odb_types::hash_object;
    use odb_types::ObjectKind;

    fn id(n: u32) -> ObjectId {
        hash_object(HashAlgorithm::Sha1, ObjectKind::Blob, &n.to_be_bytes())
    }

    fn checksum() -> ObjectId {
        HashAlgorithm::Sha1.digest(b"pack")
    }

    fn entries(n: u32) -> Vec<IndexEntry> {
        (0..n)
            .map(|i| IndexEntry {
                id: id(i),
                crc32: i * 7,
                offset: 12 + i as u64 * 100,
            })
            .collect()
    }

    #[test]
    fn empty_index() {
        let idx = PackIndex::build(vec![], &checksum());
        assert_eq!(idx.object_count(), 0);
        assert!(idx.is_empty());
        assert_eq!(idx.pack_checksum(), checksum());
        assert_eq!(idx.find_offset(&id(1)).unwrap(), None);
        // magic + version + fan-out + two checksums
        assert_eq!(idx.as_bytes().len(), 8 + 1024 + 40);
    }

    #[test]
    fn build_and_lookup() {
        let idx = PackIndex::build(entries(300), &checksum());
        assert_eq!(idx.object_count(), 300);
        for i in 0..300 {
            assert_eq!(idx.find_offset(&id(i)).unwrap(), Some(12 + i as u64 * 100));
            assert_eq!(idx.find_crc(&id(i)), Some(i * 7));
        }
        assert!(!idx.contains(&id(1000)));
    }

    #[test]
    fn ids_are_sorted() {
        let idx = PackIndex::build(entries(50), &checksum());
        let ids: Vec<ObjectId> = (0..idx.object_count()).map(|p| idx.id_at(p)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn serialize_and_parse() {
        let idx = PackIndex::build(entries(20), &checksum());
        let parsed = PackIndex::from_bytes(idx.to_bytes(), HashAlgorithm::Sha1).unwrap();
        assert_eq!(parsed.object_count(), 20);
        assert_eq!(parsed.pack_checksum(), checksum());
        assert_eq!(parsed.index_checksum(), idx.index_checksum());
        assert_eq!(parsed.find_offset(&id(5)).unwrap(), Some(512));
    }

    #[test]
    fn large_offsets_use_the_64_bit_table() {
        let mut list = entries(3);
        list[1].offset = 5_000_000_000;
        list[2].offset = (1 << 31) + 7;
        let idx = PackIndex::build(list, &checksum());
        let parsed = PackIndex::from_bytes(idx.to_bytes(), HashAlgorithm::Sha1).unwrap();
        assert_eq!(parsed.find_offset(&id(0)).unwrap(), Some(12));
        assert_eq!(parsed.find_offset(&id(1)).unwrap(), Some(5_000_000_000));
        assert_eq!(parsed.find_offset(&id(2)).unwrap(), Some((1 << 31) + 7));
        assert_eq!(parsed.large_count, 2);
    }

    #[test]
    fn corrupted_bytes_fail_checksum() {
        let mut bytes = PackIndex::build(entries(4), &checksum()).to_bytes();
        bytes[8 + 1024 + 3] ^= 0x01;
        assert!(matches!(
            PackIndex::from_bytes(bytes, HashAlgorithm::Sha1),
            Err(PackError::CorruptIndex(_))
        ));
    }

    #[test]
    fn bad_signature_and_version() {
        let mut bytes = PackIndex::build(vec![], &checksum()).to_bytes();
        bytes[7] = 1;
        assert!(matches!(
            PackIndex::from_bytes(bytes.clone(), HashAlgorithm::Sha1),
            Err(PackError::UnsupportedVersion(1))
        ));
        bytes[0] = 0;
        assert!(matches!(
            PackIndex::from_bytes(bytes, HashAlgorithm::Sha1),
            Err(PackError::CorruptIndex(_))
        ));
        assert!(PackIndex::from_bytes(vec![0; 10], HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn resolve_prefix_finds_matches() {
        let idx = PackIndex::build(entries(200), &checksum());
        let target = id(42);
        let mut out = Vec::new();
        idx.resolve_prefix(&target.abbreviate(10), 10, &mut out);
        assert_eq!(out, vec![target]);

        let mut all = Vec::new();
        let first = AbbreviatedObjectId::from_hex(&target.to_hex()[..1]).unwrap();
        idx.resolve_prefix(&first, usize::MAX, &mut all);
        assert!(all.len() > 1);
        assert!(all.iter().all(|i| i.starts_with(&first)));
        assert!(all.contains(&target));

        let mut limited = Vec::new();
        idx.resolve_prefix(&first, 1, &mut limited);
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn entries_by_offset_are_ordered() {
        let idx = PackIndex::build(entries(30), &checksum());
        let by_offset = idx.entries_by_offset().unwrap();
        assert!(by_offset.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(by_offset[0].id, id(0));
    }

    #[test]
    fn open_memory_maps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-test.idx");
        std::fs::write(&path, PackIndex::build(entries(10), &checksum()).as_bytes()).unwrap();
        let idx = PackIndex::open(&path, HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.find_offset(&id(9)).unwrap(), Some(912));
    }

    #[test]
    fn sha256_index() {
        let sum = HashAlgorithm::Sha256.digest(b"pack");
        let oid = hash_object(HashAlgorithm::Sha256, ObjectKind::Blob, b"x");
        let idx = PackIndex::build(
            vec![IndexEntry {
                id: oid,
                crc32: 1,
                offset: 12,
            }],
            &sum,
        );
        let parsed = PackIndex::from_bytes(idx.to_bytes(), HashAlgorithm::Sha256).unwrap();
        assert_eq!(parsed.find_offset(&oid).unwrap(), Some(12));
        assert!(!parsed.contains(&id(0)));
    }
}
