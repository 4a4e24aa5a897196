use std::io::{self, Read};
use std::ops::Deref;

use odb_cache::{BlockRef, CacheError};

use crate::pack::PackFile;

/// Sequential reader over a pack's bytes, served from the block cache.
///
/// Holds at most one block at a time. Reading stops at the start of the
/// pack trailer. `P` is `&PackFile` for short-lived reads and
/// `Arc<PackFile>` for streams that outlive the caller.
pub struct PackCursor<P> {
    pack: P,
    position: u64,
    end: u64,
    block: Option<BlockRef>,
}

impl<P: Deref<Target = PackFile>> PackCursor<P> {
    pub fn new(pack: P, position: u64) -> Self {
        let end = pack.data_end();
        Self {
            pack,
            position,
            end,
            block: None,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fill as much of `buf` as the pack allows, returning the count.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl<P: Deref<Target = PackFile>> Read for PackCursor<P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let stale = match &self.block {
            Some(block) => !block.contains(self.position),
            None => true,
        };
        if stale {
            // Release the old block before loading so it can be evicted.
            self.block = None;
            let pack: &PackFile = &self.pack;
            let block = pack
                .cache()
                .get_or_load(pack, self.position)
                .map_err(cache_to_io)?;
            self.block = Some(block);
        }
        let Some(block) = &self.block else {
            return Ok(0);
        };
        let limit = (self.end - self.position).min(buf.len() as u64) as usize;
        let n = block.copy_to(self.position, &mut buf[..limit]);
        self.position += n as u64;
        Ok(n)
    }
}

fn cache_to_io(err: CacheError) -> io::Error {
    match err {
        CacheError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}
