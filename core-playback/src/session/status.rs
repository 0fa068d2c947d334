//! Caller-visible playback status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Playback status reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Buffering,
    Playing,
    Paused,
    Finished,
    Error,
}

impl PlaybackStatus {
    /// Wire name of the status, as carried by status notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "STOPPED",
            PlaybackStatus::Buffering => "BUFFERING",
            PlaybackStatus::Playing => "PLAYING",
            PlaybackStatus::Paused => "PAUSED",
            PlaybackStatus::Finished => "FINISHED",
            PlaybackStatus::Error => "ERROR",
        }
    }

    /// ERROR ends a session until the next `set_url`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackStatus::Error)
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(PlaybackStatus::default().as_str(), "STOPPED");
        assert_eq!(PlaybackStatus::Buffering.to_string(), "BUFFERING");
        assert_eq!(
            serde_json::to_string(&PlaybackStatus::Finished).unwrap(),
            "\"FINISHED\""
        );
    }
}
