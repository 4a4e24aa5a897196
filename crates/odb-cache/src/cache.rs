use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use odb_collections::IdBuildHasher;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;

use crate::block::{Block, BlockRef};
use crate::config::BlockCacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::source::{BlockSource, PackId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BlockKey {
    pack: PackId,
    start: u64,
}

/// Signalled once by the thread that owns a loading slot.
#[derive(Default)]
struct PendingLoad {
    done: Mutex<bool>,
    cond: Condvar,
}

impl PendingLoad {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    fn finish(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

enum Slot {
    Loading(Arc<PendingLoad>),
    Ready { block: Arc<Block>, last_use: u64 },
}

#[derive(Default)]
struct Inner {
    slots: HashMap<BlockKey, Slot, IdBuildHasher>,
    retired: HashSet<PackId, IdBuildHasher>,
    used: u64,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    bypassed: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn is_loading(&self, key: &BlockKey, pending: &Arc<PendingLoad>) -> bool {
        matches!(self.slots.get(key), Some(Slot::Loading(p)) if Arc::ptr_eq(p, pending))
    }

    fn purge_pack(&mut self, pack: PackId) -> usize {
        let before = self.slots.len();
        let mut freed = 0u64;
        self.slots.retain(|key, slot| {
            if key.pack != pack {
                return true;
            }
            match slot {
                Slot::Ready { block, .. } => {
                    freed += block.len() as u64;
                    false
                }
                // The loader notices the missing slot and does not publish.
                Slot::Loading(_) => false,
            }
        });
        self.used -= freed;
        before - self.slots.len()
    }
}

/// Point-in-time counters for a [`BlockCache`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Loads served directly from a retired pack without caching.
    pub bypassed: u64,
    pub blocks: usize,
    pub used_bytes: u64,
    pub capacity: u64,
}

/// Shared cache of fixed-size blocks read from pack files.
///
/// Readers call [`get_or_load`](Self::get_or_load) and hold the returned
/// [`BlockRef`] while they use the bytes. A block is never evicted while
/// any reference to it is alive.
///
/// A miss installs a loading slot, drops the lock for the read, then
/// publishes. Concurrent misses on the same block wait for that one read.
pub struct BlockCache {
    config: BlockCacheConfig,
    inner: Mutex<Inner>,
}

impl BlockCache {
    pub fn new(config: BlockCacheConfig) -> CacheResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn config(&self) -> &BlockCacheConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Start of the block holding `position`.
    pub fn align(&self, position: u64) -> u64 {
        position & !(self.config.block_size as u64 - 1)
    }

    /// Return the block of `source` containing `position`, reading it on a
    /// miss.
    pub fn get_or_load(&self, source: &dyn BlockSource, position: u64) -> CacheResult<BlockRef> {
        let size = source.size();
        if position >= size {
            return Err(CacheError::OutOfRange { position, size });
        }
        let key = BlockKey {
            pack: source.pack_id(),
            start: self.align(position),
        };

        let pending = loop {
            let mut inner = self.inner.lock();
            if inner.retired.contains(&key.pack) {
                inner.bypassed += 1;
                drop(inner);
                let block = self.read_block(source, key)?;
                return Ok(BlockRef::new(Arc::new(block)));
            }

            let now = inner.tick();
            match inner.slots.get_mut(&key) {
                Some(Slot::Ready { block, last_use }) => {
                    *last_use = now;
                    let block = BlockRef::new(Arc::clone(block));
                    inner.hits += 1;
                    return Ok(block);
                }
                Some(Slot::Loading(pending)) => {
                    let pending = Arc::clone(pending);
                    drop(inner);
                    pending.wait();
                }
                None => {
                    let pending = Arc::new(PendingLoad::default());
                    inner.slots.insert(key, Slot::Loading(Arc::clone(&pending)));
                    inner.misses += 1;
                    break pending;
                }
            }
        };

        let guard = LoadGuard {
            cache: self,
            key,
            pending,
            published: false,
        };
        let block = Arc::new(self.read_block(source, key)?);
        let held = BlockRef::new(Arc::clone(&block));
        guard.publish(block);
        Ok(held)
    }

    fn read_block(&self, source: &dyn BlockSource, key: BlockKey) -> CacheResult<Block> {
        let len = (source.size() - key.start).min(self.config.block_size as u64) as usize;
        let mut buf = vec![0u8; len];
        source.read_exact_at(key.start, &mut buf)?;
        Ok(Block::new(key.pack, key.start, Bytes::from(buf)))
    }

    /// Give up a block reference. Equivalent to dropping it.
    pub fn release(&self, block: BlockRef) {
        drop(block);
    }

    /// Drop every cached block of `pack` and retire it: later loads for
    /// the pack are read directly and never cached.
    pub fn invalidate(&self, pack: PackId) {
        let mut inner = self.inner.lock();
        let purged = inner.purge_pack(pack);
        inner.retired.insert(pack);
        debug!(pack = pack.get(), purged, "retired pack in block cache");
    }

    /// Drop every cached block of `pack` and forget it entirely.
    pub fn remove_pack(&self, pack: PackId) {
        let mut inner = self.inner.lock();
        let purged = inner.purge_pack(pack);
        inner.retired.remove(&pack);
        if purged > 0 {
            debug!(pack = pack.get(), purged, "removed pack from block cache");
        }
    }

    /// Number of ready blocks cached for `pack`.
    pub fn cached_blocks(&self, pack: PackId) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|(k, s)| k.pack == pack && matches!(s, Slot::Ready { .. }))
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            bypassed: inner.bypassed,
            blocks: inner
                .slots
                .values()
                .filter(|s| matches!(s, Slot::Ready { .. }))
                .count(),
            used_bytes: inner.used,
            capacity: self.config.capacity,
        }
    }

    /// Build a new, empty cache with `config`. `self` is left untouched.
    pub fn reconfigure(&self, config: BlockCacheConfig) -> CacheResult<BlockCache> {
        BlockCache::new(config)
    }

    /// Evict least recently used unpinned blocks until usage is at or
    /// below the purge target. Pinned blocks wait for the next pass.
    fn evict(&self, inner: &mut Inner) {
        if inner.used <= self.config.capacity {
            return;
        }
        let target = self.config.purge_target();
        let mut candidates: Vec<(u64, BlockKey, u64)> = inner
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Ready { block, last_use } if block.pin_count() == 0 => {
                    Some((*last_use, *key, block.len() as u64))
                }
                _ => None,
            })
            .collect();
        candidates.sort_unstable_by_key(|(last_use, _, _)| *last_use);

        let mut evicted = 0u64;
        for (_, key, len) in candidates {
            if inner.used <= target {
                break;
            }
            inner.slots.remove(&key);
            inner.used -= len;
            evicted += 1;
        }
        inner.evictions += evicted;
        debug!(evicted, used = inner.used, target, "block cache purge");
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Owns a loading slot. Dropping it without publishing (error or unwind)
/// removes the slot; either way waiters are woken and look again.
struct LoadGuard<'a> {
    cache: &'a BlockCache,
    key: BlockKey,
    pending: Arc<PendingLoad>,
    published: bool,
}

impl LoadGuard<'_> {
    fn publish(mut self, block: Arc<Block>) {
        let mut inner = self.cache.inner.lock();
        // An invalidation while we were reading removed the slot.
        if inner.is_loading(&self.key, &self.pending) {
            let now = inner.tick();
            inner.used += block.len() as u64;
            inner.slots.insert(
                self.key,
                Slot::Ready {
                    block,
                    last_use: now,
                },
            );
            self.cache.evict(&mut inner);
        }
        self.published = true;
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            let mut inner = self.cache.inner.lock();
            if inner.is_loading(&self.key, &self.pending) {
                inner.slots.remove(&self.key);
            }
        }
        self.pending.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    struct MemSource {
        id: PackId,
        data: Vec<u8>,
        reads: AtomicUsize,
        fail_next: AtomicBool,
        delay: Duration,
    }

    impl MemSource {
        fn new(len: usize) -> Self {
            Self {
                id: PackId::next(),
                data: (0..len).map(|i| (i % 251) as u8).collect(),
                reads: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                delay: Duration::ZERO,
            }
        }
    }

    impl BlockSource for MemSource {
        fn pack_id(&self) -> PackId {
            self.id
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn read_exact_at(&self, position: u64, buf: &mut [u8]) -> io::Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "injected"));
            }
            let start = position as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(())
        }
    }

    fn cache(blocks: u64) -> BlockCache {
        BlockCache::new(BlockCacheConfig {
            block_size: 512,
            capacity: blocks * 512,
            purge_fraction: 0.2,
        })
        .unwrap()
    }

    #[test]
    fn aligns_and_reads() {
        let c = cache(4);
        let src = MemSource::new(2000);
        let b = c.get_or_load(&src, 700).unwrap();
        assert_eq!(b.start(), 512);
        assert_eq!(b.len(), 512);
        assert_eq!(b.tail(700)[0], (700 % 251) as u8);

        let last = c.get_or_load(&src, 1999).unwrap();
        assert_eq!(last.start(), 1536);
        assert_eq!(last.len(), 2000 - 1536);
    }

    #[test]
    fn out_of_range_position() {
        let c = cache(4);
        let src = MemSource::new(100);
        assert!(matches!(
            c.get_or_load(&src, 100),
            Err(CacheError::OutOfRange { position: 100, size: 100 })
        ));
    }

    #[test]
    fn hit_does_not_reread() {
        let c = cache(4);
        let src = MemSource::new(2000);
        drop(c.get_or_load(&src, 10).unwrap());
        drop(c.get_or_load(&src, 20).unwrap());
        assert_eq!(src.reads.load(Ordering::SeqCst), 1);
        let s = c.stats();
        assert_eq!((s.hits, s.misses, s.blocks), (1, 1, 1));
    }

    #[test]
    fn concurrent_misses_load_once() {
        let c = Arc::new(cache(4));
        let mut src = MemSource::new(2000);
        src.delay = Duration::from_millis(50);
        let src = Arc::new(src);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&c);
                let src = Arc::clone(&src);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let b = c.get_or_load(src.as_ref(), 42).unwrap();
                    b.tail(42)[0]
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 42);
        }
        assert_eq!(src.reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_eviction_to_purge_target() {
        let c = cache(100);
        let src = MemSource::new(101 * 512);
        for i in 0..101u64 {
            drop(c.get_or_load(&src, i * 512).unwrap());
        }
        let s = c.stats();
        assert_eq!(s.blocks, 80);
        assert_eq!(s.used_bytes, 80 * 512);
        assert_eq!(s.evictions, 21);
        // The newest block survives.
        assert_eq!(src.reads.load(Ordering::SeqCst), 101);
        drop(c.get_or_load(&src, 100 * 512).unwrap());
        assert_eq!(src.reads.load(Ordering::SeqCst), 101);
    }

    #[test]
    fn pinned_blocks_are_not_evicted() {
        let c = cache(4);
        let src = MemSource::new(10 * 512);
        let pinned = c.get_or_load(&src, 0).unwrap();
        for i in 1..10u64 {
            drop(c.get_or_load(&src, i * 512).unwrap());
        }
        assert_eq!(pinned.pin_count(), 1);
        let reads = src.reads.load(Ordering::SeqCst);
        drop(c.get_or_load(&src, 0).unwrap());
        assert_eq!(src.reads.load(Ordering::SeqCst), reads);
        assert!(c.stats().used_bytes <= 4 * 512);
    }

    #[test]
    fn invalidate_purges_and_bypasses() {
        let c = cache(8);
        let src = MemSource::new(4 * 512);
        for i in 0..4u64 {
            drop(c.get_or_load(&src, i * 512).unwrap());
        }
        assert_eq!(c.cached_blocks(src.id), 4);

        c.invalidate(src.id);
        assert_eq!(c.cached_blocks(src.id), 0);
        assert_eq!(c.stats().used_bytes, 0);

        let b = c.get_or_load(&src, 0).unwrap();
        assert_eq!(b.tail(0)[1], 1);
        assert_eq!(c.cached_blocks(src.id), 0);
        assert_eq!(c.stats().bypassed, 1);

        c.remove_pack(src.id);
        drop(c.get_or_load(&src, 0).unwrap());
        assert_eq!(c.cached_blocks(src.id), 1);
    }

    #[test]
    fn failed_load_lets_next_caller_retry() {
        let c = cache(4);
        let src = MemSource::new(2000);
        src.fail_next.store(true, Ordering::SeqCst);
        assert!(matches!(c.get_or_load(&src, 0), Err(CacheError::Io(_))));
        assert_eq!(c.stats().blocks, 0);
        let b = c.get_or_load(&src, 0).unwrap();
        assert_eq!(b.len(), 512);
    }

    #[test]
    fn waiters_retry_after_leader_fails() {
        let c = Arc::new(cache(4));
        let mut src = MemSource::new(2000);
        src.delay = Duration::from_millis(50);
        src.fail_next.store(true, Ordering::SeqCst);
        let src = Arc::new(src);
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                let src = Arc::clone(&src);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    c.get_or_load(src.as_ref(), 0).is_ok()
                })
            })
            .collect();
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        // Only the first read fails; everyone else retries and succeeds.
        assert_eq!(ok, 3);
        assert_eq!(c.stats().blocks, 1);
    }

    #[test]
    fn reconfigure_returns_new_cache() {
        let c = cache(4);
        let src = MemSource::new(2000);
        drop(c.get_or_load(&src, 0).unwrap());
        let next = c
            .reconfigure(c.config().clone().with_block_size(1024).unwrap())
            .unwrap();
        assert_eq!(next.block_size(), 1024);
        assert_eq!(next.stats().blocks, 0);
        assert_eq!(c.block_size(), 512);
        assert_eq!(c.stats().blocks, 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = BlockCache::new(BlockCacheConfig {
            block_size: 1000,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfiguration(_)));
    }
}
