//! Audio focus for desktop hosts.
//!
//! Desktop mixers let every application play at once, so requests are always
//! granted. The registered listener is kept so a host can forward its own
//! interruption signals (a call starting, a screen lock) through
//! [`DesktopAudioFocus::notify`].

use async_trait::async_trait;
use bridge_traits::{
    audio_focus::{
        AudioFocusListener, AudioFocusManager, FocusChange, FocusGain, FocusRequestResult,
        StreamType,
    },
    error::Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Default)]
pub struct DesktopAudioFocus {
    listener: Mutex<Option<Arc<dyn AudioFocusListener>>>,
    background_active: AtomicBool,
}

impl DesktopAudioFocus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the core currently reports background audio as active.
    pub fn background_audio_active(&self) -> bool {
        self.background_active.load(Ordering::SeqCst)
    }

    /// Whether a focus request is outstanding.
    pub fn has_listener(&self) -> bool {
        self.listener
            .lock()
            .map(|listener| listener.is_some())
            .unwrap_or(false)
    }

    /// Deliver a focus change to the current holder, if any.
    pub fn notify(&self, change: FocusChange) {
        let listener = match self.listener.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        if let Some(listener) = listener {
            listener.on_focus_change(change);
        }
    }
}

#[async_trait]
impl AudioFocusManager for DesktopAudioFocus {
    async fn request_focus(
        &self,
        listener: Arc<dyn AudioFocusListener>,
        stream: StreamType,
        gain: FocusGain,
    ) -> Result<FocusRequestResult> {
        debug!(?stream, ?gain, "Granting audio focus");
        if let Ok(mut current) = self.listener.lock() {
            *current = Some(listener);
        }
        Ok(FocusRequestResult::Granted)
    }

    async fn abandon_focus(&self) -> Result<()> {
        debug!("Abandoning audio focus");
        if let Ok(mut current) = self.listener.lock() {
            *current = None;
        }
        Ok(())
    }

    async fn set_background_audio_active(&self, active: bool) -> Result<()> {
        self.background_active.store(active, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Recorder(StdMutex<Vec<FocusChange>>);

    impl AudioFocusListener for Recorder {
        fn on_focus_change(&self, change: FocusChange) {
            self.0.lock().unwrap().push(change);
        }
    }

    #[tokio::test]
    async fn test_grants_and_forwards_changes() {
        let focus = DesktopAudioFocus::new();
        let recorder = Arc::new(Recorder(StdMutex::new(Vec::new())));

        let result = focus
            .request_focus(recorder.clone(), StreamType::Music, FocusGain::Gain)
            .await
            .unwrap();
        assert_eq!(result, FocusRequestResult::Granted);
        assert!(focus.has_listener());

        focus.notify(FocusChange::LossTransient);
        focus.abandon_focus().await.unwrap();
        focus.notify(FocusChange::Gain);

        assert_eq!(*recorder.0.lock().unwrap(), vec![FocusChange::LossTransient]);
        assert!(!focus.has_listener());
    }

    #[tokio::test]
    async fn test_background_flag() {
        let focus = DesktopAudioFocus::new();
        assert!(!focus.background_audio_active());
        focus.set_background_audio_active(true).await.unwrap();
        assert!(focus.background_audio_active());
    }
}
