//! # Playback Session
//!
//! One playback session at a time: an external player reading from the
//! cache proxy, a status state machine fed by the player's callbacks, and
//! audio focus bookkeeping. Everything runs on a single actor task.

pub mod actor;
pub mod machine;
pub mod status;

pub use actor::{CacheLimits, PlaybackSession, SessionDeps};
pub use machine::{FocusAction, SessionInput, SessionMachine, Transition};
pub use status::PlaybackStatus;
