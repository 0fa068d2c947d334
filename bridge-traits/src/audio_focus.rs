//! Operating system audio focus bridge.
//!
//! Mirrors the focus APIs of mobile platforms: a request for exclusive
//! output on a stream, an abandon call, and asynchronous change callbacks.

use crate::error::Result;
use std::sync::Arc;

/// Output stream the focus request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Music,
}

/// Kind of focus being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusGain {
    /// Long-term exclusive focus.
    Gain,
    /// Short interruption, e.g. a notification sound.
    GainTransient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequestResult {
    Granted,
    Denied,
}

/// Focus change delivered by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    /// Another application took focus for good.
    Loss,
    /// Focus is taken for a short time and will come back.
    LossTransient,
    /// Focus returned.
    Gain,
}

/// Receives focus changes for an active request.
///
/// Called from the platform's event-dispatch thread.
pub trait AudioFocusListener: Send + Sync {
    fn on_focus_change(&self, change: FocusChange);
}

#[async_trait::async_trait]
pub trait AudioFocusManager: Send + Sync {
    /// Request focus; `listener` receives subsequent changes while held.
    async fn request_focus(
        &self,
        listener: Arc<dyn AudioFocusListener>,
        stream: StreamType,
        gain: FocusGain,
    ) -> Result<FocusRequestResult>;

    /// Give up focus previously requested with `request_focus`.
    async fn abandon_focus(&self) -> Result<()>;

    /// Tell the platform whether background audio is currently active.
    ///
    /// Some hosts keep a foreground service or an audio session alive based
    /// on this flag.
    async fn set_background_audio_active(&self, active: bool) -> Result<()> {
        let _ = active;
        Ok(())
    }
}
