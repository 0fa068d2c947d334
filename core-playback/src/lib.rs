//! # Streaming Playback Core
//!
//! Cache-backed audio streaming for an external media player.
//!
//! ## Overview
//!
//! This crate handles:
//! - A bounded on-disk byte-range cache (`cache`)
//! - A local HTTP proxy that serves the player from the cache and fetches
//!   only the missing gaps from the origin (`proxy`)
//! - The playback session actor and its status state machine (`session`)
//! - Audio focus arbitration (`focus`)

pub mod cache;
pub mod error;
pub mod focus;
pub mod proxy;
pub mod session;

pub use cache::{human_readable_byte_count, CacheConfig, CacheStats, CacheStore};
pub use error::{PlaybackError, Result};
pub use focus::{AudioFocusArbiter, FocusReaction};
pub use proxy::{CacheProxyServer, ProxyConfig, ProxySession};
pub use session::{CacheLimits, PlaybackSession, PlaybackStatus, SessionDeps};
