//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Tokio-based file system implementation
///
/// Provides async file I/O operations using:
/// - `tokio::fs` for async operations
/// - Positional reads and writes through seek
/// - The platform cache directory from `dirs`
pub struct TokioFileSystem {
    cache_dir: PathBuf,
}

impl TokioFileSystem {
    /// Create a new file system accessor with the default cache directory
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("audio-streamer");

        Self { cache_dir }
    }

    /// Create a new file system accessor rooted at a custom cache directory
    pub fn with_cache_directory(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: std::io::Error) -> BridgeError {
        BridgeError::Io(e)
    }
}

impl Default for TokioFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn get_cache_directory(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.cache_dir)
            .await
            .map_err(Self::map_io_error)?
        {
            fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(Self::map_io_error)?;
            debug!(path = ?self.cache_dir, "Created cache directory");
        }
        Ok(self.cache_dir.clone())
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let metadata = fs::metadata(path).await.map_err(Self::map_io_error)?;

        Ok(FileMetadata {
            size: metadata.len(),
            modified_at: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
            is_directory: metadata.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Created directory");
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Read file");
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        fs::write(path, data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, size = data.len(), "Wrote file");
        Ok(())
    }

    async fn read_at(&self, path: &Path, offset: u64, len: usize) -> Result<Bytes> {
        let mut file = fs::File::open(path).await.map_err(Self::map_io_error)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(Self::map_io_error)?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64)
            .read_to_end(&mut buf)
            .await
            .map_err(Self::map_io_error)?;

        Ok(Bytes::from(buf))
    }

    async fn write_at(&self, path: &Path, offset: u64, data: Bytes) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(Self::map_io_error)?;

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(Self::map_io_error)?;
        file.write_all(data.as_ref())
            .await
            .map_err(Self::map_io_error)?;
        file.flush().await.map_err(Self::map_io_error)?;

        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted file");
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Deleted directory");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            entries.push(entry.path());
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}
