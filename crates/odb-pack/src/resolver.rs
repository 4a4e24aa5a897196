use bytes::Bytes;
use odb_cache::PackId;
use odb_collections::LongMap;
use odb_types::ObjectKind;

use crate::delta::{apply_delta, delta_sizes};
use crate::error::{PackError, PackResult};
use crate::header::{EntryHeader, EntryKind};
use crate::pack::PackFile;

/// Default limit on delta hops from an entry to its whole base.
pub const DEFAULT_MAX_DELTA_DEPTH: usize = 50;

/// A fully reconstructed object read from a pack.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

/// Kind and inflated size of a packed object, found without
/// reconstructing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub kind: ObjectKind,
    pub size: u64,
    /// Stored as a delta rather than whole.
    pub delta: bool,
}

/// Objects already reconstructed during one logical read, keyed by pack
/// offset.
///
/// Bound to one pack at a time; using it with another pack clears it.
#[derive(Debug, Default)]
pub struct ResolveMemo {
    pack: Option<PackId>,
    objects: LongMap<PackObject>,
}

impl ResolveMemo {
    pub fn new() -> Self {
        Self::default()
    }

    fn bind(&mut self, pack: PackId) {
        if self.pack != Some(pack) {
            self.objects.clear();
            self.pack = Some(pack);
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }
}

/// Walks delta chains to whole objects and applies them.
#[derive(Clone, Copy, Debug)]
pub struct DeltaResolver {
    max_depth: usize,
}

impl Default for DeltaResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELTA_DEPTH)
    }
}

impl DeltaResolver {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Reconstruct the object whose entry starts at `offset`.
    ///
    /// The chain is walked iteratively from `offset` down to the first
    /// whole object (or memoized result), then the deltas are applied
    /// base first. Every intermediate result is memoized.
    pub fn resolve(
        &self,
        pack: &PackFile,
        offset: u64,
        memo: &mut ResolveMemo,
    ) -> PackResult<PackObject> {
        memo.bind(pack.pack_id());

        let mut chain: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut position = offset;
        let mut current = loop {
            if let Some(hit) = memo.objects.get(position) {
                break hit.clone();
            }
            let header = pack.entry_header(position)?;
            let base_offset = match header.kind {
                EntryKind::Whole(kind) => {
                    let object = PackObject {
                        kind,
                        data: Bytes::from(pack.inflate(position, &header)?),
                    };
                    memo.objects.insert(position, object.clone());
                    break object;
                }
                EntryKind::OfsDelta { base_offset } => base_offset,
                EntryKind::RefDelta { base } => pack.find_offset(&base)?.ok_or_else(|| {
                    PackError::corrupt(position, format!("delta base {base} is not in this pack"))
                })?,
            };
            if chain.len() >= self.max_depth {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    limit: self.max_depth,
                });
            }
            chain.push((position, pack.inflate(position, &header)?));
            position = base_offset;
        };

        for (position, delta) in chain.into_iter().rev() {
            let data = apply_delta(&current.data, &delta).map_err(|e| e.at(position))?;
            current = PackObject {
                kind: current.kind,
                data: Bytes::from(data),
            };
            memo.objects.insert(position, current.clone());
        }
        Ok(current)
    }

    /// Kind and size of the object at `offset`, reading only entry headers
    /// and the first bytes of its delta stream.
    pub fn object_info(&self, pack: &PackFile, offset: u64) -> PackResult<ObjectInfo> {
        let header = pack.entry_header(offset)?;
        let size = match header.kind {
            EntryKind::Whole(kind) => {
                return Ok(ObjectInfo {
                    kind,
                    size: header.size,
                    delta: false,
                })
            }
            _ => {
                let prefix = pack.inflate_prefix(offset, &header, 20)?;
                delta_sizes(&prefix).map_err(|e| e.at(offset))?.1
            }
        };

        let mut header: EntryHeader = header;
        let mut position = offset;
        let mut hops = 0;
        loop {
            let base_offset = match header.kind {
                EntryKind::Whole(kind) => {
                    return Ok(ObjectInfo {
                        kind,
                        size,
                        delta: true,
                    })
                }
                EntryKind::OfsDelta { base_offset } => base_offset,
                EntryKind::RefDelta { base } => pack.find_offset(&base)?.ok_or_else(|| {
                    PackError::corrupt(position, format!("delta base {base} is not in this pack"))
                })?,
            };
            hops += 1;
            if hops > self.max_depth {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    limit: self.max_depth,
                });
            }
            position = base_offset;
            header = pack.entry_header(position)?;
        }
    }
}
