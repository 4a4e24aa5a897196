use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Smallest block size the cache will use.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Configuration for a [`BlockCache`](crate::BlockCache).
///
/// Built by whoever constructs the cache at startup; a running cache is
/// never reconfigured in place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    /// Size of each cached block in bytes. Power of two, at least 512.
    pub block_size: usize,
    /// Total bytes across all cached blocks.
    pub capacity: u64,
    /// Fraction of capacity freed by one eviction pass, in `(0, 1]`.
    pub purge_fraction: f64,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            block_size: 8 * 1024,
            capacity: 10 * 1024 * 1024,
            purge_fraction: 0.2,
        }
    }
}

impl BlockCacheConfig {
    /// Set the block size.
    ///
    /// Values below [`MIN_BLOCK_SIZE`] are raised to it; anything else that
    /// is not a power of two is rejected.
    pub fn with_block_size(mut self, block_size: usize) -> CacheResult<Self> {
        self.block_size = normalize_block_size(block_size)?;
        Ok(self)
    }

    /// Set the total capacity in bytes.
    pub fn with_capacity(mut self, capacity: u64) -> CacheResult<Self> {
        self.capacity = capacity;
        self.validate()
    }

    /// Set the purge fraction.
    pub fn with_purge_fraction(mut self, purge_fraction: f64) -> CacheResult<Self> {
        self.purge_fraction = purge_fraction;
        self.validate()
    }

    /// Check every field, raising a too-small block size to the minimum.
    pub fn validate(mut self) -> CacheResult<Self> {
        self.block_size = normalize_block_size(self.block_size)?;
        if self.capacity < self.block_size as u64 {
            return Err(CacheError::InvalidConfiguration(format!(
                "capacity {} is smaller than one block ({} bytes)",
                self.capacity, self.block_size
            )));
        }
        if !(self.purge_fraction > 0.0 && self.purge_fraction <= 1.0) {
            return Err(CacheError::InvalidConfiguration(format!(
                "purge fraction must be in (0, 1], got {}",
                self.purge_fraction
            )));
        }
        Ok(self)
    }

    /// Usage an eviction pass brings the cache down to.
    pub fn purge_target(&self) -> u64 {
        (self.capacity as f64 * (1.0 - self.purge_fraction)).round() as u64
    }
}

fn normalize_block_size(requested: usize) -> CacheResult<usize> {
    let size = requested.max(MIN_BLOCK_SIZE);
    if !size.is_power_of_two() {
        return Err(CacheError::InvalidConfiguration(format!(
            "block size {requested} is not a power of 2"
        )));
    }
    Ok(size)
}
