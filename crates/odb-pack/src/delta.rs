//! Git delta instruction streams: applying them and producing them.
//!
//! A delta starts with two little-endian base-128 varints, the base length
//! and the result length, followed by commands:
//!
//! - `1xxxxxxx`: copy from the base. The low four bits select which offset
//!   bytes follow, the next three which size bytes follow. A size of zero
//!   means `0x10000`.
//! - `0xxxxxxx` (non-zero): insert that many literal bytes that follow.
//! - `0x00`: reserved.

use std::collections::HashMap;

use odb_collections::IdBuildHasher;

use crate::error::{PackError, PackResult};

/// Largest size a single copy command encodes.
const MAX_COPY: usize = 0x00ff_ffff;

/// Largest literal run a single insert command carries.
const MAX_INSERT: usize = 0x7f;

/// Bytes a matched run must span before a copy is emitted.
const BLOCK: usize = 16;

/// Most bytes reserved up front for output whose size comes from pack
/// data. Larger results grow as they are produced.
pub(crate) const MAX_PREALLOC: usize = 1 << 20;

/// Read one size varint from `delta` at `*pos`.
fn read_size(delta: &[u8], pos: &mut usize) -> PackResult<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *delta
            .get(*pos)
            .ok_or_else(|| PackError::corrupt(0, "truncated delta header"))?;
        *pos += 1;
        // Only one bit of the tenth byte fits in a u64.
        if shift > 63 || (shift == 63 && byte & 0x7e != 0) {
            return Err(PackError::corrupt(0, "overlong delta size"));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn write_size(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Declared base and result lengths of a delta, and where its commands start.
pub fn delta_sizes(delta: &[u8]) -> PackResult<(u64, u64, usize)> {
    let mut pos = 0;
    let base = read_size(delta, &mut pos)?;
    let result = read_size(delta, &mut pos)?;
    Ok((base, result, pos))
}

/// Reconstruct the target of `delta` from `base`.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> PackResult<Vec<u8>> {
    let (base_len, result_len, mut pos) = delta_sizes(delta)?;
    if base_len != base.len() as u64 {
        return Err(PackError::corrupt(
            0,
            format!("delta expects a {base_len} byte base, got {}", base.len()),
        ));
    }
    let result_len = usize::try_from(result_len)
        .map_err(|_| PackError::corrupt(0, "delta result too large"))?;
    let mut out = Vec::with_capacity(result_len.min(MAX_PREALLOC));

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| PackError::corrupt(0, "truncated copy command"))?;
                    pos += 1;
                    offset |= (byte as usize) << (8 * i);
                }
            }
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    let byte = *delta
                        .get(pos)
                        .ok_or_else(|| PackError::corrupt(0, "truncated copy command"))?;
                    pos += 1;
                    size |= (byte as usize) << (8 * i);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    PackError::corrupt(
                        0,
                        format!("copy of {size} bytes at {offset} exceeds the base"),
                    )
                })?;
            out.extend_from_slice(&base[offset..end]);
        } else if cmd != 0 {
            let len = cmd as usize;
            let literal = delta
                .get(pos..pos + len)
                .ok_or_else(|| PackError::corrupt(0, "insert runs past the delta"))?;
            out.extend_from_slice(literal);
            pos += len;
        } else {
            return Err(PackError::corrupt(0, "reserved delta command 0"));
        }
        if out.len() > result_len {
            return Err(PackError::corrupt(0, "delta output exceeds declared size"));
        }
    }

    if out.len() != result_len {
        return Err(PackError::corrupt(
            0,
            format!("delta produced {} bytes, expected {result_len}", out.len()),
        ));
    }
    Ok(out)
}

/// Builds a delta instruction stream command by command.
#[derive(Debug)]
pub struct DeltaEncoder {
    out: Vec<u8>,
    pending: Vec<u8>,
}

impl DeltaEncoder {
    pub fn new(base_len: u64, result_len: u64) -> Self {
        let mut out = Vec::new();
        write_size(&mut out, base_len);
        write_size(&mut out, result_len);
        Self {
            out,
            pending: Vec::new(),
        }
    }

    /// Append literal bytes.
    pub fn insert(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Copy `len` bytes of the base starting at `offset`.
    pub fn copy(&mut self, mut offset: u64, mut len: usize) {
        self.flush_inserts();
        while len > 0 {
            let n = len.min(MAX_COPY);
            self.copy_command(offset, n);
            offset += n as u64;
            len -= n;
        }
    }

    fn copy_command(&mut self, offset: u64, size: usize) {
        let at = self.out.len();
        self.out.push(0x80);
        let mut cmd = 0x80u8;
        for i in 0..4 {
            let byte = (offset >> (8 * i)) as u8;
            if byte != 0 {
                cmd |= 1 << i;
                self.out.push(byte);
            }
        }
        // 0x10000 is encoded as size zero, i.e. no size bytes.
        if size != 0x10000 {
            for i in 0..3 {
                let byte = (size >> (8 * i)) as u8;
                if byte != 0 {
                    cmd |= 0x10 << i;
                    self.out.push(byte);
                }
            }
        }
        self.out[at] = cmd;
    }

    fn flush_inserts(&mut self) {
        for chunk in self.pending.chunks(MAX_INSERT) {
            self.out.push(chunk.len() as u8);
            self.out.extend_from_slice(chunk);
        }
        self.pending.clear();
    }

    /// Current encoded length, counting buffered literals.
    pub fn len(&self) -> usize {
        let chunks = self.pending.len().div_ceil(MAX_INSERT);
        self.out.len() + self.pending.len() + chunks
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush_inserts();
        self.out
    }
}

/// Compute a delta turning `base` into `target`.
///
/// Indexes `base` in fixed blocks and greedily extends every block match
/// found while scanning `target`.
pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut encoder = DeltaEncoder::new(base.len() as u64, target.len() as u64);

    let mut blocks: HashMap<&[u8], usize, IdBuildHasher> = HashMap::default();
    if base.len() >= BLOCK {
        for start in (0..=base.len() - BLOCK).step_by(BLOCK) {
            blocks.entry(&base[start..start + BLOCK]).or_insert(start);
        }
    }

    let mut literal_start = 0;
    let mut pos = 0;
    while pos + BLOCK <= target.len() {
        let Some(&base_start) = blocks.get(&target[pos..pos + BLOCK]) else {
            pos += 1;
            continue;
        };

        // Grow the match backwards into pending literals, then forwards.
        let mut src = base_start;
        let mut dst = pos;
        while src > 0 && dst > literal_start && base[src - 1] == target[dst - 1] {
            src -= 1;
            dst -= 1;
        }
        let mut len = pos + BLOCK - dst;
        while src + len < base.len()
            && dst + len < target.len()
            && base[src + len] == target[dst + len]
        {
            len += 1;
        }

        encoder.insert(&target[literal_start..dst]);
        encoder.copy(src as u64, len);
        pos = dst + len;
        literal_start = pos;
    }
    encoder.insert(&target[literal_start..]);
    encoder.finish()
}
