//! Core service façade.
//!
//! [`AudioStreamer`] wires the host-provided bridges from a
//! [`CoreConfig`] into the cache store, the local cache proxy and the
//! playback session, and exposes the caller-facing operations. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) so only a media player factory has to be injected.
//!
//! ```ignore
//! use core_service::{AudioStreamer, CoreConfig};
//!
//! let config = CoreConfig::builder()
//!     .player_factory(my_player_factory)
//!     .build()?;
//! let streamer = AudioStreamer::new(config).await?;
//!
//! streamer.set_url("https://cdn.example.com/episode.mp3").await?;
//! streamer.play().await?;
//! println!("{} cached", streamer.cache_size()?);
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_playback::PlaybackStatus;
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};
pub use core_runtime::events::{CoreEvent, EventBus, STATUS_CHANGED_EVENT};

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;

use core_playback::{
    human_readable_byte_count, CacheConfig, CacheLimits, CacheProxyServer, CacheStore,
    PlaybackError, PlaybackSession, ProxyConfig, SessionDeps,
};
use core_runtime::events::CacheEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Cache-backed audio streamer: one playback session at a time.
pub struct AudioStreamer {
    session: PlaybackSession,
    session_task: JoinHandle<()>,
    server: Arc<CacheProxyServer>,
    store: Arc<CacheStore>,
    event_bus: Arc<EventBus>,
}

impl AudioStreamer {
    /// Open the cache store, bind the local proxy and start the session task.
    #[instrument(skip(config))]
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let root = match &config.cache_root {
            Some(root) => root.clone(),
            None => config.file_system.get_cache_directory().await.map_err(|e| {
                CoreError::InitializationFailed(format!("no cache directory: {}", e))
            })?,
        };
        let directory = root.join(&config.cache_directory_name);

        let cache_config = CacheConfig::default()
            .with_max_size_bytes(config.max_cache_size_bytes)
            .with_max_files(config.max_cache_files)
            .with_directory_name(config.cache_directory_name.clone());
        cache_config.validate().map_err(PlaybackError::Config)?;

        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        let store = Arc::new(
            CacheStore::open(
                cache_config,
                directory,
                config.file_system.clone(),
                config.clock.clone(),
            )
            .await?
            .with_event_bus(event_bus.clone()),
        );

        let proxy_config = ProxyConfig {
            host: config.proxy_host,
            port: config.proxy_port,
            probe_timeout: config.probe_timeout,
            ..ProxyConfig::default()
        };
        let server = Arc::new(
            CacheProxyServer::bind(
                proxy_config,
                store.clone(),
                config.http_client.clone(),
                Some(event_bus.clone()),
            )
            .await?,
        );

        let (session, session_task) = PlaybackSession::spawn(
            SessionDeps {
                server: server.clone(),
                player_factory: config.player_factory.clone(),
                focus_manager: config.audio_focus.clone(),
                event_bus: event_bus.clone(),
            },
            CacheLimits {
                max_size_bytes: config.max_cache_size_bytes,
                max_files: config.max_cache_files,
            },
        );

        info!(
            cache_dir = %store.directory().display(),
            proxy = %server.local_addr(),
            "Audio streamer ready"
        );

        Ok(Self {
            session,
            session_task,
            server,
            store,
            event_bus,
        })
    }

    // ========================================================================
    // Cache management
    // ========================================================================

    /// Entry-count ceiling, applied by the next [`set_url`](Self::set_url).
    pub fn set_cache_file_limit(&self, count: usize) {
        self.session.set_cache_file_limit(count);
    }

    /// Byte ceiling, applied by the next [`set_url`](Self::set_url).
    pub fn set_cache_size(&self, bytes: u64) {
        self.session.set_cache_size(bytes);
    }

    /// Remove every cached entry.
    ///
    /// Failures are returned and also broadcast as
    /// [`CacheEvent::OperationFailed`].
    #[instrument(skip(self))]
    pub async fn clear_cache(&self) -> Result<()> {
        match self.store.clear().await {
            Ok(report) => {
                let _ = self.event_bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
                    entries_removed: report.entries_removed,
                    failed_keys: Vec::new(),
                }));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Clearing the cache failed");
                if let PlaybackError::ClearIncomplete { failed_keys } = &e {
                    let _ = self.event_bus.emit(CoreEvent::Cache(CacheEvent::Cleared {
                        entries_removed: 0,
                        failed_keys: failed_keys.clone(),
                    }));
                }
                let _ = self
                    .event_bus
                    .emit(CoreEvent::Cache(CacheEvent::OperationFailed {
                        operation: "clear_cache".to_string(),
                        message: e.to_string(),
                    }));
                Err(e.into())
            }
        }
    }

    /// Stored bytes as a human-readable string, e.g. `"0 B"` or `"1.5 MB"`.
    pub fn cache_size(&self) -> Result<String> {
        Ok(human_readable_byte_count(self.store.size_in_bytes(), true))
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Replace the current session with one streaming `url`.
    pub async fn set_url(&self, url: &str) -> Result<()> {
        Ok(self.session.set_url(url).await?)
    }

    pub async fn play(&self) -> Result<()> {
        Ok(self.session.play().await?)
    }

    pub async fn pause(&self) -> Result<()> {
        Ok(self.session.pause().await?)
    }

    pub async fn seek_to_time(&self, seconds: f64) -> Result<()> {
        Ok(self.session.seek_to(seconds).await?)
    }

    /// Position in seconds; 0 when nothing is loaded.
    pub async fn current_time(&self) -> Result<f64> {
        Ok(self.session.current_time().await?)
    }

    /// Current status string (`STOPPED`, `BUFFERING`, `PLAYING`, `PAUSED`,
    /// `FINISHED` or `ERROR`).
    pub fn status(&self) -> String {
        self.session.status().as_str().to_string()
    }

    /// Duration in seconds; 0 when unknown.
    pub async fn duration(&self) -> Result<f64> {
        Ok(self.session.duration().await?)
    }

    /// Subscribe to status notifications and cache/proxy events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Address of the local cache proxy.
    pub fn proxy_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    /// Stop the player, release focus, stop the proxy and persist the index.
    #[instrument(skip(self))]
    pub async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.session.shutdown().await {
            warn!(error = %e, "Playback session did not shut down cleanly");
        }
        if let Err(e) = self.session_task.await {
            warn!(error = %e, "Playback session task ended abnormally");
        }
        self.server.shutdown().await;
        self.store.flush_index().await?;
        info!("Audio streamer stopped");
        Ok(())
    }
}
