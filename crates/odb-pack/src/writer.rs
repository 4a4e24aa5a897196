use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use odb_collections::ObjectIdSet;
use odb_types::{hash_object, HashAlgorithm, ObjectId, ObjectKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::delta::compute_delta;
use crate::error::PackResult;
use crate::header::{encode_entry_header, encode_ofs_distance, PackHeader, OFS_DELTA};
use crate::index::{IndexEntry, PackIndex};

/// Tuning for [`PackWriter`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackWriterConfig {
    /// How many preceding same-kind objects are tried as delta bases.
    /// Zero disables delta compression.
    pub delta_window: usize,
    /// Longest delta chain the writer will create.
    pub max_delta_depth: usize,
    /// zlib level, 0-9.
    pub compression: u32,
}

impl Default for PackWriterConfig {
    fn default() -> Self {
        Self {
            delta_window: 10,
            max_delta_depth: 50,
            compression: 6,
        }
    }
}

/// Paths and identity of a pack written by [`PackWriter::finish`].
#[derive(Clone, Debug)]
pub struct WrittenPack {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub checksum: ObjectId,
    pub object_count: usize,
    pub deltas: usize,
}

struct PendingObject {
    id: ObjectId,
    kind: ObjectKind,
    data: Bytes,
}

/// Builds a pack and its index from a set of objects.
pub struct PackWriter {
    algorithm: HashAlgorithm,
    config: PackWriterConfig,
    objects: Vec<PendingObject>,
    seen: ObjectIdSet,
}

impl PackWriter {
    pub fn new(algorithm: HashAlgorithm, config: PackWriterConfig) -> Self {
        Self {
            algorithm,
            config,
            objects: Vec::new(),
            seen: ObjectIdSet::default(),
        }
    }

    /// Queue an object, returning its identifier. Duplicates are ignored.
    pub fn add_object(&mut self, kind: ObjectKind, data: impl Into<Bytes>) -> ObjectId {
        let data = data.into();
        let id = hash_object(self.algorithm, kind, &data);
        self.add_with_id(id, kind, data);
        id
    }

    /// Queue an object whose identifier the caller already knows.
    /// Returns `false` if it was already queued.
    pub fn add_with_id(&mut self, id: ObjectId, kind: ObjectKind, data: impl Into<Bytes>) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.objects.push(PendingObject {
            id,
            kind,
            data: data.into(),
        });
        true
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Build the pack and its index in memory.
    pub fn finish_to_bytes(self) -> PackResult<(Vec<u8>, PackIndex)> {
        let (pack, index, _) = self.encode()?;
        Ok((pack, index))
    }

    /// Write `pack-<checksum>.pack` and `.idx` into `dir`.
    ///
    /// Both files are written under temporary names and renamed into
    /// place, index first, so a directory scan never sees a pack without
    /// its index.
    pub fn finish(self, dir: &Path) -> PackResult<WrittenPack> {
        let (pack, index, deltas) = self.encode()?;
        let checksum = index.pack_checksum();
        let stem = format!("pack-{}", checksum.to_hex());
        let pack_path = dir.join(format!("{stem}.pack"));
        let index_path = dir.join(format!("{stem}.idx"));

        if !(pack_path.exists() && index_path.exists()) {
            write_atomic(dir, &index_path, index.as_bytes())?;
            write_atomic(dir, &pack_path, &pack)?;
        }
        debug!(pack = %stem, objects = index.object_count(), deltas, bytes = pack.len(), "wrote pack");

        Ok(WrittenPack {
            pack_path,
            index_path,
            checksum,
            object_count: index.object_count(),
            deltas,
        })
    }

    fn encode(self) -> PackResult<(Vec<u8>, PackIndex, usize)> {
        let objects = self.objects;
        let level = Compression::new(self.config.compression.min(9));

        // Group by kind, largest first, so bases precede what deltas
        // against them.
        let mut order: Vec<usize> = (0..objects.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&objects[a], &objects[b]);
            a.kind
                .type_code()
                .cmp(&b.kind.type_code())
                .then(b.data.len().cmp(&a.data.len()))
        });

        let mut out = Vec::new();
        out.extend_from_slice(&PackHeader::new(objects.len() as u32).to_bytes());

        let mut offsets = vec![0u64; order.len()];
        let mut depths = vec![0usize; order.len()];
        let mut window: VecDeque<usize> = VecDeque::with_capacity(self.config.delta_window + 1);
        let mut entries = Vec::with_capacity(order.len());
        let mut deltas = 0;

        for (slot, &object_index) in order.iter().enumerate() {
            let object = &objects[object_index];

            let mut best: Option<(usize, Vec<u8>)> = None;
            for &candidate in window.iter().rev() {
                let base = &objects[order[candidate]];
                if base.kind != object.kind || depths[candidate] >= self.config.max_delta_depth {
                    continue;
                }
                let delta = compute_delta(&base.data, &object.data);
                let smaller = match &best {
                    Some((_, current)) => delta.len() < current.len(),
                    None => delta.len() < object.data.len(),
                };
                if smaller {
                    best = Some((candidate, delta));
                }
            }

            let offset = out.len() as u64;
            match best {
                Some((base_slot, delta)) => {
                    encode_entry_header(&mut out, OFS_DELTA, delta.len() as u64);
                    encode_ofs_distance(&mut out, offset - offsets[base_slot]);
                    deflate(&mut out, &delta, level)?;
                    depths[slot] = depths[base_slot] + 1;
                    deltas += 1;
                }
                None => {
                    encode_entry_header(&mut out, object.kind.type_code(), object.data.len() as u64);
                    deflate(&mut out, &object.data, level)?;
                }
            }
            entries.push(IndexEntry {
                id: object.id,
                crc32: crc32fast::hash(&out[offset as usize..]),
                offset,
            });
            offsets[slot] = offset;

            if self.config.delta_window > 0 {
                window.push_back(slot);
                if window.len() > self.config.delta_window {
                    window.pop_front();
                }
            }
        }

        let checksum = self.algorithm.digest(&out);
        out.extend_from_slice(checksum.as_bytes());
        let index = PackIndex::build(entries, &checksum);
        Ok((out, index, deltas))
    }
}

fn deflate(out: &mut Vec<u8>, data: &[u8], level: Compression) -> std::io::Result<()> {
    let mut encoder = ZlibEncoder::new(out, level);
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

pub(crate) fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-pack-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
