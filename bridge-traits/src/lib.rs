//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the streaming core and the
//! platform-specific collaborators it drives. The core owns the cache proxy,
//! the cache store and the playback state machine; everything that touches an
//! operating system service is reached through one of these traits.
//!
//! ## Traits
//!
//! ### Networking & I/O
//! - [`HttpClient`](http::HttpClient) - Origin requests with streamed bodies
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Cache directory, sizing, positional file I/O
//!
//! ### Playback Integration
//! - [`MediaPlayer`](player::MediaPlayer) - The decoding/rendering engine
//! - [`MediaPlayerFactory`](player::MediaPlayerFactory) - Creates one player per session
//! - [`AudioFocusManager`](audio_focus::AudioFocusManager) - OS audio focus/session API
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Player | Focus |
//! |----------|---------------------|--------|-------|
//! | Desktop  | `bridge-desktop`    | host supplied | always granted |
//! | Android  | host module         | host supplied | `AudioManager` |
//! | iOS      | host module         | host supplied | `AVAudioSession` |
//!
//! ## Callbacks
//!
//! Player and focus callbacks arrive on whatever thread the platform uses for
//! event dispatch. Listener implementations provided by the core never block:
//! they enqueue a typed event and return.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type for consistent
//! error handling. Platform implementations should:
//!
//! - Convert platform-specific errors to `BridgeError`
//! - Provide actionable error messages
//! - Include error context (e.g., file paths, HTTP status)
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks. Implementations must ensure thread safety.
//!
//! ## Examples
//!
//! ### Implementing MediaPlayerFactory
//!
//! ```ignore
//! use bridge_traits::player::{MediaPlayer, MediaPlayerFactory, PlayerListener};
//! use bridge_traits::error::Result;
//! use std::sync::Arc;
//!
//! pub struct ExoFactory;
//!
//! impl MediaPlayerFactory for ExoFactory {
//!     fn create_player(&self, listener: Arc<dyn PlayerListener>) -> Result<Arc<dyn MediaPlayer>> {
//!         // Wrap the platform player and forward its callbacks to `listener`
//!         todo!()
//!     }
//! }
//! ```

pub mod audio_focus;
pub mod error;
pub mod http;
pub mod player;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use audio_focus::{
    AudioFocusListener, AudioFocusManager, FocusChange, FocusGain, FocusRequestResult, StreamType,
};
pub use http::{ByteStream, HttpClient, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse};
pub use player::{MediaPlayer, MediaPlayerFactory, PlayerListener, PlayerState};
pub use storage::FileSystemAccess;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
