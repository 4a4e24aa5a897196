//! Byte-level codec for pack headers and entry headers.

use odb_types::{HashAlgorithm, ObjectId, ObjectKind};

use crate::error::{PackError, PackResult};

/// `PACK` signature opening every pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Length of the fixed pack header.
pub const PACK_HEADER_LEN: u64 = 12;

/// Pack type code for a delta whose base is given by backward distance.
pub const OFS_DELTA: u8 = 6;

/// Pack type code for a delta whose base is given by identifier.
pub const REF_DELTA: u8 = 7;

/// Upper bound on the encoded length of an entry header, including the
/// base reference of a delta.
pub const MAX_ENTRY_HEADER_LEN: usize = 64;

/// The fixed 12-byte header at the start of a pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackHeader {
    pub version: u32,
    pub object_count: u32,
}

impl PackHeader {
    pub fn new(object_count: u32) -> Self {
        Self {
            version: 2,
            object_count,
        }
    }

    pub fn parse(buf: &[u8]) -> PackResult<Self> {
        if buf.len() < PACK_HEADER_LEN as usize {
            return Err(PackError::corrupt(0, "pack header truncated"));
        }
        if &buf[0..4] != PACK_SIGNATURE {
            return Err(PackError::corrupt(0, "missing PACK signature"));
        }
        let version = be_u32(&buf[4..8]);
        if version != 2 && version != 3 {
            return Err(PackError::UnsupportedVersion(version));
        }
        Ok(Self {
            version,
            object_count: be_u32(&buf[8..12]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(PACK_SIGNATURE);
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..12].copy_from_slice(&self.object_count.to_be_bytes());
        out
    }
}

/// What a pack entry holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// A complete object of the given kind.
    Whole(ObjectKind),
    /// A delta against the entry at `base_offset` in the same pack.
    OfsDelta { base_offset: u64 },
    /// A delta against the object named `base`.
    RefDelta { base: ObjectId },
}

impl EntryKind {
    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Whole(_))
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Self::Whole(kind) => kind.type_code(),
            Self::OfsDelta { .. } => OFS_DELTA,
            Self::RefDelta { .. } => REF_DELTA,
        }
    }
}

/// A decoded entry header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Inflated length of the payload: the object for whole entries, the
    /// delta instruction stream for deltas.
    pub size: u64,
    /// Bytes between the entry's offset and its zlib payload.
    pub header_len: usize,
}

/// Append the type-and-size header of an entry.
pub fn encode_entry_header(out: &mut Vec<u8>, type_code: u8, size: u64) {
    let mut size = size;
    let mut byte = ((type_code & 0x07) << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size != 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

/// Append the backward distance of an OFS delta.
pub fn encode_ofs_distance(out: &mut Vec<u8>, distance: u64) {
    let mut buf = [0u8; 10];
    let mut pos = buf.len() - 1;
    let mut d = distance;
    buf[pos] = (d & 0x7f) as u8;
    d >>= 7;
    while d != 0 {
        d -= 1;
        pos -= 1;
        buf[pos] = 0x80 | (d & 0x7f) as u8;
        d >>= 7;
    }
    out.extend_from_slice(&buf[pos..]);
}

/// Decode an OFS distance from the start of `buf`, returning the distance
/// and the bytes consumed. `offset` is only used for error reporting.
pub fn decode_ofs_distance(buf: &[u8], offset: u64) -> PackResult<(u64, usize)> {
    let mut byte = *buf
        .first()
        .ok_or_else(|| PackError::corrupt(offset, "truncated delta base offset"))?;
    let mut distance = (byte & 0x7f) as u64;
    let mut used = 1;
    while byte & 0x80 != 0 {
        byte = *buf
            .get(used)
            .ok_or_else(|| PackError::corrupt(offset, "truncated delta base offset"))?;
        used += 1;
        if distance >= (u64::MAX >> 7) {
            return Err(PackError::corrupt(offset, "overlong delta base offset"));
        }
        distance = ((distance + 1) << 7) | (byte & 0x7f) as u64;
    }
    Ok((distance, used))
}

/// Decode the entry header that starts at pack position `offset`.
///
/// `buf` holds the bytes from `offset` onwards; it may be longer than the
/// header but must not be shorter.
pub fn parse_entry_header(
    buf: &[u8],
    offset: u64,
    algorithm: HashAlgorithm,
) -> PackResult<EntryHeader> {
    let truncated = || PackError::corrupt(offset, "truncated entry header");

    let mut byte = *buf.first().ok_or_else(truncated)?;
    let type_code = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4u32;
    let mut used = 1;
    while byte & 0x80 != 0 {
        byte = *buf.get(used).ok_or_else(truncated)?;
        used += 1;
        // Only four bits of the tenth byte fit in a u64.
        if shift > 60 || (shift == 60 && byte & 0x70 != 0) {
            return Err(PackError::corrupt(offset, "overlong entry size"));
        }
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    let kind = match type_code {
        OFS_DELTA => {
            let (distance, n) = decode_ofs_distance(&buf[used..], offset)?;
            used += n;
            if distance == 0 || distance > offset || offset - distance < PACK_HEADER_LEN {
                return Err(PackError::corrupt(
                    offset,
                    format!("delta base distance {distance} is out of range"),
                ));
            }
            EntryKind::OfsDelta {
                base_offset: offset - distance,
            }
        }
        REF_DELTA => {
            let len = algorithm.raw_len();
            let raw = buf.get(used..used + len).ok_or_else(truncated)?;
            used += len;
            let base = ObjectId::from_raw(raw)
                .map_err(|e| PackError::corrupt(offset, e.to_string()))?;
            EntryKind::RefDelta { base }
        }
        code => match ObjectKind::from_type_code(code) {
            Some(kind) => EntryKind::Whole(kind),
            None => {
                return Err(PackError::corrupt(
                    offset,
                    format!("invalid object type code {code}"),
                ))
            }
        },
    };

    Ok(EntryHeader {
        kind,
        size,
        header_len: used,
    })
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(raw)
}
