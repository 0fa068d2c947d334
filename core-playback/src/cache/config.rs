//! Cache configuration types.

use serde::{Deserialize, Serialize};

/// Configuration for the byte-range cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum stored bytes across all entries (default: 1 GiB)
    pub max_cache_size_bytes: u64,

    /// Maximum number of cached resources (default: 50)
    pub max_cache_files: usize,

    /// Cache directory name (relative to the cache root)
    pub directory_name: String,

    /// Size of the pieces read back from disk when serving cached bytes
    pub read_chunk_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 1024 * 1024 * 1024,
            max_cache_files: 50,
            directory_name: "audio-cache".to_string(),
            read_chunk_size: 64 * 1024,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size_bytes(mut self, size: u64) -> Self {
        self.max_cache_size_bytes = size;
        self
    }

    /// Set maximum cache size in megabytes.
    pub fn with_max_size_mb(mut self, size_mb: u64) -> Self {
        self.max_cache_size_bytes = size_mb * 1024 * 1024;
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_cache_files = count;
        self
    }

    pub fn with_directory_name(mut self, name: impl Into<String>) -> Self {
        self.directory_name = name.into();
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_cache_size_bytes == 0 {
            return Err("max_cache_size_bytes must be greater than 0".to_string());
        }

        if self.max_cache_files == 0 {
            return Err("max_cache_files must be greater than 0".to_string());
        }

        if self.directory_name.is_empty() {
            return Err("directory_name cannot be empty".to_string());
        }

        if self.read_chunk_size == 0 {
            return Err("read_chunk_size must be greater than 0".to_string());
        }

        Ok(())
    }
}
