//! Storage and File System Abstractions
//!
//! Provides a platform-agnostic trait for the file I/O the cache needs:
//! whole-file reads and writes for metadata, positional reads and writes for
//! sparse media files, directory sizing and recursive clearing.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app cache directories
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn store_chunk(fs: &dyn FileSystemAccess, offset: u64, data: Bytes) -> Result<()> {
///     let cache_dir = fs.get_cache_directory().await?;
///     fs.write_at(&cache_dir.join("track.cache"), offset, data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's cache directory
    ///
    /// This directory is suitable for temporary files that can be deleted
    /// by the system when storage is low.
    async fn get_cache_directory(&self) -> Result<PathBuf>;

    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get metadata for a file or directory
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read entire file contents into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, replacing any previous contents
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Read up to `len` bytes starting at `offset`
    ///
    /// Returns fewer bytes only when the file ends first.
    async fn read_at(&self, path: &Path, offset: u64, len: usize) -> Result<Bytes>;

    /// Write `data` at `offset`, creating the file if needed
    ///
    /// Writing past the current end leaves a hole; the file is never truncated.
    async fn write_at(&self, path: &Path, offset: u64, data: Bytes) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn delete_dir_all(&self, path: &Path) -> Result<()>;

    /// List all entries in a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Calculate total size of a directory recursively
    async fn directory_size(&self, path: &Path) -> Result<u64> {
        let mut total = 0u64;
        let entries = self.list_directory(path).await?;

        for entry in entries {
            let metadata = self.metadata(&entry).await?;
            if metadata.is_directory {
                total += self.directory_size(&entry).await?;
            } else {
                total += metadata.size;
            }
        }

        Ok(total)
    }

    /// Remove everything inside `path` while keeping the directory itself
    ///
    /// Keeps going after individual failures and returns the entries that
    /// could not be removed.
    async fn clean_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut failed = Vec::new();
        for entry in self.list_directory(path).await? {
            let removed = match self.metadata(&entry).await {
                Ok(metadata) if metadata.is_directory => self.delete_dir_all(&entry).await,
                Ok(_) => self.delete_file(&entry).await,
                Err(e) => Err(e),
            };
            if removed.is_err() {
                failed.push(entry);
            }
        }
        Ok(failed)
    }
}
