//! External media player bridge.
//!
//! The decoding/rendering engine is an opaque collaborator: the core hands it
//! a URL served by the local cache proxy, issues transport commands, and
//! receives state callbacks through a [`PlayerListener`]. Host applications
//! wrap their platform player (ExoPlayer, AVPlayer, a desktop backend) in
//! these traits.

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Engine-level state as reported by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    /// Nothing loaded, or stopped.
    Idle,
    /// Waiting for enough data to start or continue.
    Buffering,
    /// Able to render immediately.
    Ready,
    /// Reached the end of the media.
    Ended,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Buffering => "buffering",
            PlayerState::Ready => "ready",
            PlayerState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Callback sink handed to the player at creation time.
///
/// Called from the platform's event-dispatch thread. Implementations must
/// return quickly and must not call back into the player.
pub trait PlayerListener: Send + Sync {
    /// The engine state or the play-when-ready flag changed.
    fn on_state_changed(&self, play_when_ready: bool, state: PlayerState);

    /// The engine started or stopped loading media data.
    fn on_loading_changed(&self, is_loading: bool);

    /// Fatal decode or render error.
    fn on_error(&self, message: String);

    /// The media source failed to load (origin or proxy I/O).
    fn on_load_error(&self, message: String);
}

/// Transport controls of the external player.
///
/// Positions and durations are expressed in milliseconds, matching the
/// granularity of the platform engines.
#[async_trait::async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Load `source_url` and start buffering.
    async fn prepare(&self, source_url: &str) -> Result<()>;

    /// Start (`true`) or pause (`false`) once enough data is available.
    async fn set_play_when_ready(&self, play_when_ready: bool) -> Result<()>;

    /// Current value of the play-when-ready flag.
    async fn play_when_ready(&self) -> Result<bool>;

    /// Stop playback and drop the loaded media.
    async fn stop(&self) -> Result<()>;

    async fn seek_to(&self, position_ms: u64) -> Result<()>;

    async fn current_position_ms(&self) -> Result<u64>;

    /// Media duration, `None` while unknown.
    async fn duration_ms(&self) -> Result<Option<u64>>;

    /// Release native resources. The player is not used afterwards.
    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates one player per playback session.
pub trait MediaPlayerFactory: Send + Sync {
    fn create_player(&self, listener: Arc<dyn PlayerListener>) -> Result<Arc<dyn MediaPlayer>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn player_state_display() {
        assert_eq!(PlayerState::Idle.to_string(), "idle");
        assert_eq!(PlayerState::Ended.to_string(), "ended");
    }
}
