//! # Audio Focus Arbiter
//!
//! Tracks whether this app holds OS audio focus and decides how playback
//! reacts to focus changes. Playback itself is driven by the caller: the
//! arbiter only says whether to pause or resume.

use crate::error::{PlaybackError, Result};
use bridge_traits::audio_focus::{
    AudioFocusListener, AudioFocusManager, FocusChange, FocusGain, FocusRequestResult, StreamType,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What playback should do in response to a focus change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusReaction {
    None,
    Pause,
    Resume,
}

#[derive(Debug, Default, Clone, Copy)]
struct FocusState {
    has_focus: bool,
    /// A transient loss is outstanding.
    transient_loss: bool,
    /// Whether playback was active when the transient loss arrived.
    was_playing: bool,
}

pub struct AudioFocusArbiter {
    manager: Arc<dyn AudioFocusManager>,
    listener: Arc<dyn AudioFocusListener>,
    state: Mutex<FocusState>,
}

impl AudioFocusArbiter {
    /// `listener` receives the OS focus changes for every request made here.
    pub fn new(manager: Arc<dyn AudioFocusManager>, listener: Arc<dyn AudioFocusListener>) -> Self {
        Self {
            manager,
            listener,
            state: Mutex::new(FocusState::default()),
        }
    }

    pub fn has_focus(&self) -> bool {
        self.state.lock().has_focus
    }

    /// Request long-term focus for music. Returns whether focus is held.
    pub async fn acquire(&self) -> Result<bool> {
        if self.has_focus() {
            return Ok(true);
        }

        let result = self
            .manager
            .request_focus(self.listener.clone(), StreamType::Music, FocusGain::Gain)
            .await
            .map_err(|e| PlaybackError::Internal(format!("audio focus request failed: {}", e)))?;

        match result {
            FocusRequestResult::Granted => {
                self.state.lock().has_focus = true;
                if let Err(e) = self.manager.set_background_audio_active(true).await {
                    warn!(error = %e, "Failed to mark background audio active");
                }
                info!("Audio focus acquired");
                Ok(true)
            }
            FocusRequestResult::Denied => {
                warn!("Audio focus denied");
                Ok(false)
            }
        }
    }

    /// Abandon focus. No-op when focus is not held.
    pub async fn release(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if !state.has_focus {
                return Ok(());
            }
            state.has_focus = false;
        }

        self.manager
            .abandon_focus()
            .await
            .map_err(|e| PlaybackError::Internal(format!("audio focus abandon failed: {}", e)))?;
        if let Err(e) = self.manager.set_background_audio_active(false).await {
            warn!(error = %e, "Failed to mark background audio inactive");
        }
        info!("Audio focus released");
        Ok(())
    }

    /// React to an OS focus change. `is_playing` is the playback state at
    /// the time the change arrived.
    pub async fn on_focus_change(&self, change: FocusChange, is_playing: bool) -> FocusReaction {
        debug!(?change, is_playing, "Audio focus changed");

        match change {
            FocusChange::Loss => {
                {
                    let mut state = self.state.lock();
                    state.transient_loss = false;
                    state.was_playing = false;
                }
                if let Err(e) = self.release().await {
                    warn!(error = %e, "Failed to release focus after permanent loss");
                }
                FocusReaction::Pause
            }
            FocusChange::LossTransient => {
                let mut state = self.state.lock();
                state.transient_loss = true;
                state.was_playing = is_playing;
                if is_playing {
                    FocusReaction::Pause
                } else {
                    FocusReaction::None
                }
            }
            FocusChange::Gain => {
                let mut state = self.state.lock();
                if !state.transient_loss {
                    return FocusReaction::None;
                }
                let resume = state.was_playing;
                state.transient_loss = false;
                state.was_playing = false;
                if resume {
                    FocusReaction::Resume
                } else {
                    FocusReaction::None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Focus {}

        #[async_trait]
        impl AudioFocusManager for Focus {
            async fn request_focus(
                &self,
                listener: Arc<dyn AudioFocusListener>,
                stream: StreamType,
                gain: FocusGain,
            ) -> BridgeResult<FocusRequestResult>;
            async fn abandon_focus(&self) -> BridgeResult<()>;
            async fn set_background_audio_active(&self, active: bool) -> BridgeResult<()>;
        }
    }

    struct NoopListener;

    impl AudioFocusListener for NoopListener {
        fn on_focus_change(&self, _change: FocusChange) {}
    }

    fn arbiter(manager: MockFocus) -> AudioFocusArbiter {
        AudioFocusArbiter::new(Arc::new(manager), Arc::new(NoopListener))
    }

    fn granting() -> MockFocus {
        let mut manager = MockFocus::new();
        manager
            .expect_request_focus()
            .returning(|_, _, _| Ok(FocusRequestResult::Granted));
        manager.expect_abandon_focus().returning(|| Ok(()));
        manager
            .expect_set_background_audio_active()
            .returning(|_| Ok(()));
        manager
    }

    #[tokio::test]
    async fn test_acquire_marks_background_active() {
        let mut manager = MockFocus::new();
        manager
            .expect_request_focus()
            .withf(|_, stream, gain| *stream == StreamType::Music && *gain == FocusGain::Gain)
            .times(1)
            .returning(|_, _, _| Ok(FocusRequestResult::Granted));
        manager
            .expect_set_background_audio_active()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));

        let arbiter = arbiter(manager);
        assert!(arbiter.acquire().await.unwrap());
        // Already held: no second request.
        assert!(arbiter.acquire().await.unwrap());
        assert!(arbiter.has_focus());
    }

    #[tokio::test]
    async fn test_denied_request() {
        let mut manager = MockFocus::new();
        manager
            .expect_request_focus()
            .returning(|_, _, _| Ok(FocusRequestResult::Denied));

        let arbiter = arbiter(manager);
        assert!(!arbiter.acquire().await.unwrap());
        assert!(!arbiter.has_focus());
    }

    #[tokio::test]
    async fn test_release_without_focus_is_noop() {
        let manager = MockFocus::new();
        let arbiter = arbiter(manager);
        arbiter.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_loss_pauses_and_gain_resumes() {
        let arbiter = arbiter(granting());
        arbiter.acquire().await.unwrap();

        assert_eq!(
            arbiter.on_focus_change(FocusChange::LossTransient, true).await,
            FocusReaction::Pause
        );
        assert!(arbiter.has_focus());
        assert_eq!(
            arbiter.on_focus_change(FocusChange::Gain, false).await,
            FocusReaction::Resume
        );
        assert_eq!(
            arbiter.on_focus_change(FocusChange::Gain, false).await,
            FocusReaction::None
        );
    }

    #[tokio::test]
    async fn test_transient_loss_while_paused_does_not_resume() {
        let arbiter = arbiter(granting());
        assert_eq!(
            arbiter.on_focus_change(FocusChange::LossTransient, false).await,
            FocusReaction::None
        );
        assert_eq!(
            arbiter.on_focus_change(FocusChange::Gain, false).await,
            FocusReaction::None
        );
    }

    #[tokio::test]
    async fn test_permanent_loss_pauses_and_forgets() {
        let arbiter = arbiter(granting());
        arbiter.acquire().await.unwrap();

        arbiter.on_focus_change(FocusChange::LossTransient, true).await;
        assert_eq!(
            arbiter.on_focus_change(FocusChange::Loss, false).await,
            FocusReaction::Pause
        );
        assert!(!arbiter.has_focus());
        assert_eq!(
            arbiter.on_focus_change(FocusChange::Gain, false).await,
            FocusReaction::None
        );
    }
}
