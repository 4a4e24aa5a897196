//! Hand-assembled packs for tests that need entries the writer never
//! produces (REF deltas, chosen chains, corrupt payloads).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use odb_cache::{BlockCache, BlockCacheConfig};
use odb_types::{hash_object, HashAlgorithm, ObjectId, ObjectKind};

use crate::header::{encode_entry_header, encode_ofs_distance, PackHeader, OFS_DELTA, REF_DELTA};
use crate::index::{IndexEntry, PackIndex};
use crate::pack::PackFile;

pub(crate) fn small_cache() -> Arc<BlockCache> {
    Arc::new(
        BlockCache::new(BlockCacheConfig {
            block_size: 512,
            capacity: 64 * 512,
            purge_fraction: 0.25,
        })
        .unwrap(),
    )
}

pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub(crate) struct RawPack {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
    entries: Vec<IndexEntry>,
}

impl RawPack {
    pub(crate) fn new() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha1,
            bytes: vec![0u8; 12],
            entries: Vec::new(),
        }
    }

    /// Append pre-encoded entry bytes indexed under `id`.
    pub(crate) fn raw_entry(&mut self, id: ObjectId, entry: Vec<u8>) -> u64 {
        let offset = self.bytes.len() as u64;
        self.entries.push(IndexEntry {
            id,
            crc32: crc32fast::hash(&entry),
            offset,
        });
        self.bytes.extend_from_slice(&entry);
        offset
    }

    pub(crate) fn whole(&mut self, kind: ObjectKind, data: &[u8]) -> (u64, ObjectId) {
        let id = hash_object(self.algorithm, kind, data);
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, kind.type_code(), data.len() as u64);
        entry.extend_from_slice(&zlib(data));
        (self.raw_entry(id, entry), id)
    }

    /// OFS delta named `result` (the id of the reconstructed object).
    pub(crate) fn ofs_delta(&mut self, base_offset: u64, delta: &[u8], result: ObjectId) -> u64 {
        let offset = self.bytes.len() as u64;
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, OFS_DELTA, delta.len() as u64);
        encode_ofs_distance(&mut entry, offset - base_offset);
        entry.extend_from_slice(&zlib(delta));
        self.raw_entry(result, entry)
    }

    pub(crate) fn ref_delta(&mut self, base: &ObjectId, delta: &[u8], result: ObjectId) -> u64 {
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, REF_DELTA, delta.len() as u64);
        entry.extend_from_slice(base.as_bytes());
        entry.extend_from_slice(&zlib(delta));
        self.raw_entry(result, entry)
    }

    /// Write `<name>.pack` and `<name>.idx` into `dir`.
    pub(crate) fn write(mut self, dir: &Path, name: &str) -> PathBuf {
        let header = PackHeader::new(self.entries.len() as u32).to_bytes();
        self.bytes[..12].copy_from_slice(&header);
        let checksum = self.algorithm.digest(&self.bytes);
        self.bytes.extend_from_slice(checksum.as_bytes());
        let index = PackIndex::build(self.entries, &checksum);

        let pack_path = dir.join(format!("{name}.pack"));
        std::fs::write(&pack_path, &self.bytes).unwrap();
        std::fs::write(dir.join(format!("{name}.idx")), index.as_bytes()).unwrap();
        pack_path
    }
}

pub(crate) fn open(path: &Path) -> Arc<PackFile> {
    Arc::new(PackFile::open(path, HashAlgorithm::Sha1, small_cache()).unwrap())
}
