//! Playback status state machine.
//!
//! Pure transition logic: the session actor feeds it one input per player
//! callback and acts on the returned focus action. Every accepted input
//! yields a transition (and so one notification), even when the status
//! does not change.

use crate::session::status::PlaybackStatus;
use bridge_traits::player::PlayerState;

/// One player callback, as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    StateChanged {
        play_when_ready: bool,
        state: PlayerState,
    },
    LoadingStarted,
    /// `play_when_ready` is `None` when no player is present.
    LoadingFinished {
        play_when_ready: Option<bool>,
    },
    /// Fatal player error or media load error.
    Error(String),
}

/// What the session must do with audio focus after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusAction {
    None,
    Acquire,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: PlaybackStatus,
    pub focus: FocusAction,
}

impl Transition {
    fn to(status: PlaybackStatus, focus: FocusAction) -> Option<Self> {
        Some(Self { status, focus })
    }
}

/// Status of one playback session.
#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    status: PlaybackStatus,
    /// Set once the media ended; blocks PLAYING until `reset`.
    finished: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    /// Start over for a new session.
    pub fn reset(&mut self) {
        self.status = PlaybackStatus::Stopped;
        self.finished = false;
    }

    /// Apply `input`. Returns `None` when the input is ignored: everything
    /// after ERROR, and any move to PLAYING once the media has finished.
    pub fn apply(&mut self, input: &SessionInput) -> Option<Transition> {
        if self.status.is_terminal() {
            return None;
        }

        let transition = match input {
            SessionInput::StateChanged { play_when_ready, state } => match state {
                PlayerState::Idle => Transition::to(PlaybackStatus::Stopped, FocusAction::Release),
                PlayerState::Buffering => {
                    Transition::to(PlaybackStatus::Buffering, FocusAction::None)
                }
                PlayerState::Ready if *play_when_ready => {
                    Transition::to(PlaybackStatus::Playing, FocusAction::Acquire)
                }
                PlayerState::Ready => Transition::to(PlaybackStatus::Paused, FocusAction::None),
                PlayerState::Ended => {
                    Transition::to(PlaybackStatus::Finished, FocusAction::Release)
                }
            },
            SessionInput::LoadingStarted => {
                Transition::to(PlaybackStatus::Buffering, FocusAction::None)
            }
            SessionInput::LoadingFinished { play_when_ready } => match play_when_ready {
                Some(true) => Transition::to(PlaybackStatus::Playing, FocusAction::None),
                Some(false) => Transition::to(PlaybackStatus::Paused, FocusAction::None),
                None => Transition::to(PlaybackStatus::Stopped, FocusAction::Release),
            },
            SessionInput::Error(_) => Transition::to(PlaybackStatus::Error, FocusAction::Release),
        }?;

        if self.finished && transition.status == PlaybackStatus::Playing {
            return None;
        }
        if transition.status == PlaybackStatus::Finished {
            self.finished = true;
        }

        self.status = transition.status;
        Some(transition)
    }
}
