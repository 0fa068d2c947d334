//! # Core Configuration Module
//!
//! Provides configuration management for the audio streaming core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all bridges and settings the streamer needs. It
//! enforces fail-fast validation so a missing capability is reported when the
//! host wires the core, not on the first `set_url`.
//!
//! ## Required Dependencies
//!
//! - `MediaPlayerFactory` - Always supplied by the host
//!
//! ## Dependencies with desktop defaults
//!
//! - `HttpClient` - Origin transport (desktop default: reqwest)
//! - `FileSystemAccess` - Cache storage (desktop default: tokio fs)
//! - `AudioFocusManager` - OS focus (desktop default: always granted)
//!
//! When the `desktop-shims` feature is disabled these must be injected too.
//!
//! ## Storage layout
//!
//! The cache lives in `<cache_root>/<cache_directory_name>`. Both the cache
//! store and the cache-size report use this single directory. When no
//! `cache_root` is set, the file system bridge's cache directory is used.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .player_factory(Arc::new(MyPlayerFactory))
//!     .max_cache_files(20)
//!     .max_cache_size_bytes(256 * 1024 * 1024)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    AudioFocusManager, Clock, FileSystemAccess, HttpClient, MediaPlayerFactory, SystemClock,
};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default ceiling on the number of cached resources.
pub const DEFAULT_MAX_CACHE_FILES: usize = 50;

/// Default ceiling on stored bytes (1 GiB).
pub const DEFAULT_MAX_CACHE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Default cache subdirectory under the cache root.
pub const DEFAULT_CACHE_DIRECTORY_NAME: &str = "audio-cache";

/// Core configuration for the audio streaming core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Root directory for cached data; `None` means the file system bridge's
    /// cache directory
    pub cache_root: Option<PathBuf>,

    /// Name of the cache subdirectory under the root
    pub cache_directory_name: String,

    /// Initial byte ceiling of the cache store
    pub max_cache_size_bytes: u64,

    /// Initial entry-count ceiling of the cache store
    pub max_cache_files: usize,

    /// Address the local proxy binds to
    pub proxy_host: IpAddr,

    /// Port the local proxy binds to; 0 picks an ephemeral port
    pub proxy_port: u16,

    /// Timeout for origin length probes
    pub probe_timeout: Duration,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,

    pub http_client: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub audio_focus: Arc<dyn AudioFocusManager>,
    pub player_factory: Arc<dyn MediaPlayerFactory>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_root", &self.cache_root)
            .field("cache_directory_name", &self.cache_directory_name)
            .field("max_cache_size_bytes", &self.max_cache_size_bytes)
            .field("max_cache_files", &self.max_cache_files)
            .field("proxy_host", &self.proxy_host)
            .field("proxy_port", &self.proxy_port)
            .field("probe_timeout", &self.probe_timeout)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_client", &"HttpClient { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("audio_focus", &"AudioFocusManager { ... }")
            .field("player_factory", &"MediaPlayerFactory { ... }")
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Both cache ceilings are positive
    /// - The cache directory name is a single, non-empty path component
    /// - The event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size_bytes == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.max_cache_files == 0 {
            return Err(Error::Config(
                "Cache file limit must be greater than 0".to_string(),
            ));
        }

        let name = self.cache_directory_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::Config(format!(
                "Cache directory name '{}' must be a single path component",
                self.cache_directory_name
            )));
        }

        if let Some(root) = &self.cache_root {
            if root.as_os_str().is_empty() {
                return Err(Error::Config("Cache root cannot be empty".to_string()));
            }
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: ensure the 'desktop-shims' feature is enabled. \
             Mobile: inject the platform-native adapter.",
            capability, purpose
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::new()
        .map_err(|e| Error::Internal(format!("Failed to create default HttpClient: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing("HttpClient", "origin requests"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Ok(Arc::new(bridge_desktop::TokioFileSystem::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(capability_missing("FileSystemAccess", "cache storage"))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_audio_focus() -> Result<Arc<dyn AudioFocusManager>> {
    Ok(Arc::new(bridge_desktop::DesktopAudioFocus::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_audio_focus() -> Result<Arc<dyn AudioFocusManager>> {
    Err(capability_missing("AudioFocusManager", "audio focus arbitration"))
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_root: Option<PathBuf>,
    cache_directory_name: Option<String>,
    max_cache_size_bytes: Option<u64>,
    max_cache_files: Option<usize>,
    proxy_host: Option<IpAddr>,
    proxy_port: Option<u16>,
    probe_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    audio_focus: Option<Arc<dyn AudioFocusManager>>,
    player_factory: Option<Arc<dyn MediaPlayerFactory>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CoreConfigBuilder {
    /// Sets the root directory under which the cache subdirectory is created.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().cache_root("/path/to/cache");
    /// ```
    pub fn cache_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_root = Some(path.into());
        self
    }

    /// Sets the name of the cache subdirectory.
    ///
    /// Default: `audio-cache`
    pub fn cache_directory_name(mut self, name: impl Into<String>) -> Self {
        self.cache_directory_name = Some(name.into());
        self
    }

    /// Sets the maximum number of stored bytes.
    ///
    /// Default: 1 GiB
    pub fn max_cache_size_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_size_bytes = Some(bytes);
        self
    }

    /// Sets the maximum number of cached resources.
    ///
    /// Default: 50
    pub fn max_cache_files(mut self, count: usize) -> Self {
        self.max_cache_files = Some(count);
        self
    }

    /// Sets the address of the local proxy. Default: `127.0.0.1`
    pub fn proxy_host(mut self, host: IpAddr) -> Self {
        self.proxy_host = Some(host);
        self
    }

    /// Sets the port of the local proxy. Default: 0 (ephemeral)
    pub fn proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = Some(port);
        self
    }

    /// Sets the timeout applied to origin length probes. Default: 10 seconds
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the file system access implementation.
    ///
    /// If not provided, the desktop default (tokio fs-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Sets the audio focus implementation.
    pub fn audio_focus(mut self, focus: Arc<dyn AudioFocusManager>) -> Self {
        self.audio_focus = Some(focus);
        self
    }

    /// Sets the media player factory (required).
    pub fn player_factory(mut self, factory: Arc<dyn MediaPlayerFactory>) -> Self {
        self.player_factory = Some(factory);
        self
    }

    /// Sets the clock used for cache access times. Default: system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - The media player factory is missing
    /// - Another bridge is missing and has no platform default
    /// - Configuration values are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let player_factory = self
            .player_factory
            .ok_or_else(|| capability_missing("MediaPlayerFactory", "playback"))?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let audio_focus = match self.audio_focus {
            Some(focus) => focus,
            None => provide_default_audio_focus()?,
        };

        let config = CoreConfig {
            cache_root: self.cache_root,
            cache_directory_name: self
                .cache_directory_name
                .unwrap_or_else(|| DEFAULT_CACHE_DIRECTORY_NAME.to_string()),
            max_cache_size_bytes: self
                .max_cache_size_bytes
                .unwrap_or(DEFAULT_MAX_CACHE_SIZE_BYTES),
            max_cache_files: self.max_cache_files.unwrap_or(DEFAULT_MAX_CACHE_FILES),
            proxy_host: self
                .proxy_host
                .unwrap_or(IpAddr::from([127, 0, 0, 1])),
            proxy_port: self.proxy_port.unwrap_or(0),
            probe_timeout: self.probe_timeout.unwrap_or(Duration::from_secs(10)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client,
            file_system,
            audio_focus,
            player_factory,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::audio_focus::{
        AudioFocusListener, FocusGain, FocusRequestResult, StreamType,
    };
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::http::{HttpRequest, HttpResponse, HttpStreamResponse};
    use bridge_traits::player::{MediaPlayer, PlayerListener};
    use bridge_traits::storage::FileMetadata;
    use bridge_traits::BridgeError;
    use bytes::Bytes;
    use std::path::Path;

    struct NoPlayerFactory;

    impl MediaPlayerFactory for NoPlayerFactory {
        fn create_player(
            &self,
            _listener: Arc<dyn PlayerListener>,
        ) -> BridgeResult<Arc<dyn MediaPlayer>> {
            Err(BridgeError::NotAvailable("test".to_string()))
        }
    }

    struct NoHttp;

    #[async_trait]
    impl HttpClient for NoHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Err(BridgeError::NotAvailable("test".to_string()))
        }

        async fn execute_stream(&self, _request: HttpRequest) -> BridgeResult<HttpStreamResponse> {
            Err(BridgeError::NotAvailable("test".to_string()))
        }
    }

    struct NoFs;

    #[async_trait]
    impl FileSystemAccess for NoFs {
        async fn get_cache_directory(&self) -> BridgeResult<PathBuf> {
            Ok(PathBuf::from("/cache"))
        }
        async fn exists(&self, _path: &Path) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn metadata(&self, _path: &Path) -> BridgeResult<FileMetadata> {
            Err(BridgeError::NotAvailable("test".to_string()))
        }
        async fn create_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_file(&self, _path: &Path) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_file(&self, _path: &Path, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn read_at(&self, _path: &Path, _offset: u64, _len: usize) -> BridgeResult<Bytes> {
            Ok(Bytes::new())
        }
        async fn write_at(&self, _path: &Path, _offset: u64, _data: Bytes) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn delete_dir_all(&self, _path: &Path) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_directory(&self, _path: &Path) -> BridgeResult<Vec<PathBuf>> {
            Ok(Vec::new())
        }
    }

    struct GrantAll;

    #[async_trait]
    impl AudioFocusManager for GrantAll {
        async fn request_focus(
            &self,
            _listener: Arc<dyn AudioFocusListener>,
            _stream: StreamType,
            _gain: FocusGain,
        ) -> BridgeResult<FocusRequestResult> {
            Ok(FocusRequestResult::Granted)
        }

        async fn abandon_focus(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn complete_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .player_factory(Arc::new(NoPlayerFactory))
            .http_client(Arc::new(NoHttp))
            .file_system(Arc::new(NoFs))
            .audio_focus(Arc::new(GrantAll))
    }

    #[test]
    fn test_builder_requires_player_factory() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(NoHttp))
            .file_system(Arc::new(NoFs))
            .audio_focus(Arc::new(GrantAll))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("MediaPlayerFactory"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_http_client_without_shims() {
        let result = CoreConfig::builder()
            .player_factory(Arc::new(NoPlayerFactory))
            .file_system(Arc::new(NoFs))
            .audio_focus(Arc::new(GrantAll))
            .build();

        assert!(matches!(
            result,
            Err(Error::CapabilityMissing { ref capability, .. }) if capability == "HttpClient"
        ));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .player_factory(Arc::new(NoPlayerFactory))
            .build()
            .expect("desktop defaults should succeed");

        assert_eq!(config.max_cache_files, DEFAULT_MAX_CACHE_FILES);
    }

    #[test]
    fn test_builder_defaults() {
        let config = complete_builder().build().unwrap();

        assert_eq!(config.cache_root, None);
        assert_eq!(config.cache_directory_name, "audio-cache");
        assert_eq!(config.max_cache_size_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.max_cache_files, 50);
        assert_eq!(config.proxy_host, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(config.proxy_port, 0);
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_builder_custom_values() {
        let config = complete_builder()
            .cache_root("/tmp/streamer")
            .cache_directory_name("media")
            .max_cache_size_bytes(10 * 1024 * 1024)
            .max_cache_files(3)
            .proxy_port(8089)
            .build()
            .unwrap();

        assert_eq!(config.cache_root, Some(PathBuf::from("/tmp/streamer")));
        assert_eq!(config.cache_directory_name, "media");
        assert_eq!(config.max_cache_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_cache_files, 3);
        assert_eq!(config.proxy_port, 8089);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let err = complete_builder().max_cache_size_bytes(0).build().unwrap_err();
        assert!(err.to_string().contains("Cache size must be greater than 0"));

        let err = complete_builder().max_cache_files(0).build().unwrap_err();
        assert!(err.to_string().contains("Cache file limit"));
    }

    #[test]
    fn test_validate_rejects_nested_directory_name() {
        let err = complete_builder()
            .cache_directory_name("a/b")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        assert!(complete_builder().cache_directory_name("..").build().is_err());
        assert!(complete_builder().cache_directory_name("  ").build().is_err());
    }

    #[test]
    fn test_debug_hides_bridges() {
        let config = complete_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("HttpClient { ... }"));
        assert!(debug.contains("max_cache_files: 50"));
    }
}
