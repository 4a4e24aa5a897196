use std::path::Path;

use odb_cache::BlockCacheConfig;
use odb_pack::{PackWriterConfig, DEFAULT_MAX_DELTA_DEPTH};
use odb_types::HashAlgorithm;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Settings for an [`ObjectDatabase`](crate::ObjectDatabase).
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// hash = "sha256"
/// streaming_threshold = 1048576
///
/// [cache]
/// block_size = 65536
/// capacity = 67108864
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub hash: HashAlgorithm,
    pub cache: BlockCacheConfig,
    /// Delta hops allowed when reading.
    pub max_delta_depth: usize,
    /// Objects larger than this are streamed rather than held in memory.
    pub streaming_threshold: u64,
    /// An inserter flushing at least this many objects writes one pack
    /// instead of loose files.
    pub inserter_pack_threshold: usize,
    /// zlib level for loose objects, 0-9.
    pub compression_level: u32,
    /// Settings for packs written by the inserter and by repack.
    pub writer: PackWriterConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::Sha1,
            cache: BlockCacheConfig::default(),
            max_delta_depth: DEFAULT_MAX_DELTA_DEPTH,
            streaming_threshold: 50 * 1024 * 1024,
            inserter_pack_threshold: 1000,
            compression_level: 6,
            writer: PackWriterConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()
    }

    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn to_toml(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Check every field. The cache block size may be raised to its minimum.
    pub fn validate(mut self) -> StoreResult<Self> {
        self.cache = self.cache.validate()?;
        if self.compression_level > 9 {
            return Err(StoreError::Config(format!(
                "compression level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.writer.compression > 9 {
            return Err(StoreError::Config(format!(
                "pack compression level must be 0-9, got {}",
                self.writer.compression
            )));
        }
        if self.inserter_pack_threshold == 0 {
            return Err(StoreError::Config(
                "inserter pack threshold must be at least 1".into(),
            ));
        }
        Ok(self)
    }
}
