//! # Playback Error Types
//!
//! Error types for the cache store, the cache proxy and the playback session.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur in the streaming core.
#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// A single resource needs more bytes than the whole cache may hold.
    #[error("Storage full: '{key}' needs {required} bytes but the cache holds at most {max}")]
    StorageFull { key: String, required: u64, max: u64 },

    /// Local storage read, write or delete failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// `clear` removed some entries but not all of them.
    #[error("I/O error: failed to remove {} cache entries", failed_keys.len())]
    ClearIncomplete { failed_keys: Vec<String> },

    /// Requested range is empty or lies outside the resource.
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Fetching a gap from the origin failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The proxy session was superseded or shut down.
    #[error("Proxy session closed")]
    SessionClosed,

    // ========================================================================
    // Player Errors
    // ========================================================================
    /// The external player reported or returned a fatal error.
    #[error("Player error: {0}")]
    Player(String),

    /// Seek target is not a finite number of seconds.
    #[error("Invalid seek position: {0}")]
    InvalidSeek(f64),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if a later attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlaybackError::Transport(_) | PlaybackError::Io(_))
    }

    /// Returns `true` for local storage failures.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::Io(_) | PlaybackError::ClearIncomplete { .. }
        )
    }

    /// Returns `true` if the proxy should keep serving the bytes uncached.
    pub fn allows_passthrough(&self) -> bool {
        matches!(self, PlaybackError::StorageFull { .. }) || self.is_io_error()
    }

    pub(crate) fn player(error: BridgeError) -> Self {
        PlaybackError::Player(error.to_string())
    }

    pub(crate) fn transport(error: BridgeError) -> Self {
        PlaybackError::Transport(error.to_string())
    }
}

impl From<BridgeError> for PlaybackError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Network(message) => PlaybackError::Transport(message),
            BridgeError::Player(message) => PlaybackError::Player(message),
            other => PlaybackError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PlaybackError {
    fn from(error: std::io::Error) -> Self {
        PlaybackError::Io(error.to_string())
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let full = PlaybackError::StorageFull {
            key: "k".to_string(),
            required: 10,
            max: 5,
        };
        assert!(full.allows_passthrough());
        assert!(!full.is_io_error());

        let partial = PlaybackError::ClearIncomplete {
            failed_keys: vec!["a".to_string(), "b".to_string()],
        };
        assert!(partial.is_io_error());
        assert_eq!(
            partial.to_string(),
            "I/O error: failed to remove 2 cache entries"
        );

        assert!(PlaybackError::Transport("timeout".to_string()).is_transient());
        assert!(!PlaybackError::Player("decoder".to_string()).allows_passthrough());
    }

    #[test]
    fn test_bridge_error_mapping() {
        let err: PlaybackError = BridgeError::Network("reset".to_string()).into();
        assert!(matches!(err, PlaybackError::Transport(_)));

        let err: PlaybackError =
            BridgeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).into();
        assert!(matches!(err, PlaybackError::Io(_)));
    }
}
