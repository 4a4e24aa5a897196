use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::source::PackId;

/// An immutable run of bytes read from one pack at a block-aligned start.
pub struct Block {
    pack: PackId,
    start: u64,
    data: Bytes,
    pins: AtomicUsize,
}

impl Block {
    pub(crate) fn new(pack: PackId, start: u64, data: Bytes) -> Self {
        Self {
            pack,
            start,
            data,
            pins: AtomicUsize::new(0),
        }
    }

    pub fn pack(&self) -> PackId {
        self.pack
    }

    /// Pack position of the first byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Pack position one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, position: u64) -> bool {
        self.start <= position && position < self.end()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Bytes from `position` to the end of the block; empty when
    /// `position` is outside it.
    pub fn tail(&self, position: u64) -> &[u8] {
        if !self.contains(position) {
            return &[];
        }
        &self.data[(position - self.start) as usize..]
    }

    /// Copy as much as fits from `position` into `out`.
    pub fn copy_to(&self, position: u64, out: &mut [u8]) -> usize {
        let tail = self.tail(position);
        let n = tail.len().min(out.len());
        out[..n].copy_from_slice(&tail[..n]);
        n
    }

    /// Number of live [`BlockRef`]s.
    pub fn pin_count(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("pack", &self.pack)
            .field("start", &self.start)
            .field("len", &self.data.len())
            .field("pins", &self.pin_count())
            .finish()
    }
}

/// A reader's hold on a block. The block cannot be evicted while any
/// `BlockRef` to it is alive; dropping the last one releases it.
pub struct BlockRef {
    block: Arc<Block>,
}

impl BlockRef {
    pub(crate) fn new(block: Arc<Block>) -> Self {
        block.pins.fetch_add(1, Ordering::AcqRel);
        Self { block }
    }
}

impl Clone for BlockRef {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.block))
    }
}

impl Drop for BlockRef {
    fn drop(&mut self) {
        self.block.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Deref for BlockRef {
    type Target = Block;

    fn deref(&self) -> &Block {
        &self.block
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.block.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Arc<Block> {
        Arc::new(Block::new(PackId::next(), 1024, Bytes::from_static(b"abcdef")))
    }

    #[test]
    fn bounds() {
        let b = block();
        assert_eq!(b.end(), 1030);
        assert!(b.contains(1024));
        assert!(b.contains(1029));
        assert!(!b.contains(1030));
        assert!(!b.contains(1023));
    }

    #[test]
    fn tail_and_copy() {
        let b = block();
        assert_eq!(b.tail(1027), b"def");
        assert!(b.tail(2000).is_empty());
        let mut out = [0u8; 2];
        assert_eq!(b.copy_to(1025, &mut out), 2);
        assert_eq!(&out, b"bc");
    }

    #[test]
    fn refs_pin_and_release() {
        let b = block();
        let r1 = BlockRef::new(Arc::clone(&b));
        let r2 = r1.clone();
        assert_eq!(b.pin_count(), 2);
        drop(r1);
        assert_eq!(b.pin_count(), 1);
        drop(r2);
        assert_eq!(b.pin_count(), 0);
    }
}
