//! # Playback Session Actor
//!
//! Owns the external player, the proxy session and the audio focus arbiter.
//! Caller commands, player callbacks and focus changes are all messages to
//! one task, so the state machine is only ever touched from that task.
//!
//! Each player is created with a listener tagged by the session generation.
//! `set_url` bumps the generation, so callbacks from a superseded player are
//! dropped on arrival.

use crate::error::{PlaybackError, Result};
use crate::focus::{AudioFocusArbiter, FocusReaction};
use crate::proxy::{CacheProxyServer, ProxySession};
use crate::session::machine::{FocusAction, SessionInput, SessionMachine};
use crate::session::status::PlaybackStatus;
use bridge_traits::audio_focus::{AudioFocusListener, AudioFocusManager, FocusChange};
use bridge_traits::player::{MediaPlayer, MediaPlayerFactory, PlayerListener, PlayerState};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use core_runtime::logging::redact_url;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Cache ceilings applied by the next `set_url`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_size_bytes: u64,
    pub max_files: usize,
}

impl CacheLimits {
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 || self.max_files == 0 {
            return Err(PlaybackError::Config(format!(
                "cache limits must be greater than 0 (size {}, files {})",
                self.max_size_bytes, self.max_files
            )));
        }
        Ok(())
    }
}

/// Collaborators of the session actor.
pub struct SessionDeps {
    pub server: Arc<CacheProxyServer>,
    pub player_factory: Arc<dyn MediaPlayerFactory>,
    pub focus_manager: Arc<dyn AudioFocusManager>,
    pub event_bus: Arc<EventBus>,
}

/// Raw player callback, before the actor enriches it.
#[derive(Debug)]
enum PlayerCallback {
    StateChanged {
        play_when_ready: bool,
        state: PlayerState,
    },
    LoadingChanged(bool),
    Error(String),
    LoadError(String),
}

enum Command {
    SetUrl {
        url: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Play {
        reply: oneshot::Sender<Result<()>>,
    },
    Pause {
        reply: oneshot::Sender<Result<()>>,
    },
    SeekTo {
        seconds: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    CurrentTime {
        reply: oneshot::Sender<Result<f64>>,
    },
    Duration {
        reply: oneshot::Sender<Result<f64>>,
    },
    Player {
        generation: u64,
        callback: PlayerCallback,
    },
    Focus(FocusChange),
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Forwards callbacks of one player into the actor.
struct SessionListener {
    generation: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl SessionListener {
    fn send(&self, callback: PlayerCallback) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Player {
                generation: self.generation,
                callback,
            });
        }
    }
}

impl PlayerListener for SessionListener {
    fn on_state_changed(&self, play_when_ready: bool, state: PlayerState) {
        self.send(PlayerCallback::StateChanged {
            play_when_ready,
            state,
        });
    }

    fn on_loading_changed(&self, is_loading: bool) {
        self.send(PlayerCallback::LoadingChanged(is_loading));
    }

    fn on_error(&self, message: String) {
        self.send(PlayerCallback::Error(message));
    }

    fn on_load_error(&self, message: String) {
        self.send(PlayerCallback::LoadError(message));
    }
}

struct FocusListener {
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl AudioFocusListener for FocusListener {
    fn on_focus_change(&self, change: FocusChange) {
        if let Some(commands) = self.commands.upgrade() {
            let _ = commands.send(Command::Focus(change));
        }
    }
}

/// Handle to the playback session task.
#[derive(Clone)]
pub struct PlaybackSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<PlaybackStatus>,
    limits: Arc<Mutex<CacheLimits>>,
}

impl PlaybackSession {
    /// Spawn the session task on the current runtime.
    pub fn spawn(deps: SessionDeps, limits: CacheLimits) -> (Self, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PlaybackStatus::Stopped);
        let limits = Arc::new(Mutex::new(limits));

        let focus_listener = Arc::new(FocusListener {
            commands: commands_tx.downgrade(),
        });

        let actor = SessionActor {
            focus: AudioFocusArbiter::new(deps.focus_manager.clone(), focus_listener),
            deps,
            machine: SessionMachine::new(),
            generation: 0,
            player: None,
            proxy_session: None,
            limits: limits.clone(),
            status: status_tx,
            commands: commands_tx.downgrade(),
        };

        let task = tokio::spawn(actor.run(commands_rx));

        (
            Self {
                commands: commands_tx,
                status: status_rx,
                limits,
            },
            task,
        )
    }

    /// Record the entry-count ceiling for the next `set_url`.
    pub fn set_cache_file_limit(&self, max_files: usize) {
        self.limits.lock().max_files = max_files;
    }

    /// Record the byte ceiling for the next `set_url`.
    pub fn set_cache_size(&self, max_size_bytes: u64) {
        self.limits.lock().max_size_bytes = max_size_bytes;
    }

    pub fn cache_limits(&self) -> CacheLimits {
        *self.limits.lock()
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }

    /// Replace the current session with one playing `url`.
    pub async fn set_url(&self, url: &str) -> Result<()> {
        let url = url.to_string();
        self.request(|reply| Command::SetUrl { url, reply }).await
    }

    pub async fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply }).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn seek_to(&self, seconds: f64) -> Result<()> {
        self.request(|reply| Command::SeekTo { seconds, reply })
            .await
    }

    /// Playback position in seconds; 0 without a player.
    pub async fn current_time(&self) -> Result<f64> {
        self.request(|reply| Command::CurrentTime { reply }).await
    }

    /// Media duration in seconds; 0 without a player or while unknown.
    pub async fn duration(&self) -> Result<f64> {
        self.request(|reply| Command::Duration { reply }).await
    }

    /// Stop the player, release focus and end the task.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| PlaybackError::Internal("playback session has stopped".to_string()))?;
        response
            .await
            .map_err(|_| PlaybackError::Internal("playback session dropped the request".to_string()))?
    }
}

struct SessionActor {
    deps: SessionDeps,
    focus: AudioFocusArbiter,
    machine: SessionMachine,
    generation: u64,
    player: Option<Arc<dyn MediaPlayer>>,
    proxy_session: Option<ProxySession>,
    limits: Arc<Mutex<CacheLimits>>,
    status: watch::Sender<PlaybackStatus>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Playback session task started");

        while let Some(command) = commands.recv().await {
            match command {
                Command::SetUrl { url, reply } => {
                    let _ = reply.send(self.set_url(url).await);
                }
                Command::Play { reply } => {
                    let _ = reply.send(self.set_play_when_ready(true).await);
                }
                Command::Pause { reply } => {
                    let _ = reply.send(self.set_play_when_ready(false).await);
                }
                Command::SeekTo { seconds, reply } => {
                    let _ = reply.send(self.seek_to(seconds).await);
                }
                Command::CurrentTime { reply } => {
                    let _ = reply.send(self.current_time().await);
                }
                Command::Duration { reply } => {
                    let _ = reply.send(self.duration().await);
                }
                Command::Player {
                    generation,
                    callback,
                } => self.on_player_callback(generation, callback).await,
                Command::Focus(change) => self.on_focus_change(change).await,
                Command::Shutdown { reply } => {
                    self.teardown().await;
                    self.deps.server.end_session();
                    let _ = reply.send(Ok(()));
                    break;
                }
            }
        }

        debug!("Playback session task stopped");
    }

    #[instrument(skip(self, url), fields(url = %redact_url(&url), generation = self.generation + 1))]
    async fn set_url(&mut self, url: String) -> Result<()> {
        if url.trim().is_empty() {
            return Err(PlaybackError::Config("url must not be empty".to_string()));
        }
        // Rejected limits leave the current session playing.
        let limits = *self.limits.lock();
        limits.validate()?;

        self.teardown().await;
        self.machine.reset();
        self.publish(PlaybackStatus::Stopped);

        self.generation += 1;

        self.deps
            .server
            .store()
            .set_limits(limits.max_size_bytes, limits.max_files)
            .await?;

        let proxy_session = self.deps.server.start_session(&url);
        let local_url = proxy_session.local_url().to_string();
        self.proxy_session = Some(proxy_session);

        let listener = Arc::new(SessionListener {
            generation: self.generation,
            commands: self.commands.clone(),
        });
        let player = self
            .deps
            .player_factory
            .create_player(listener)
            .map_err(PlaybackError::player)?;
        self.player = Some(player.clone());

        if let Err(e) = player.prepare(&local_url).await {
            let error = PlaybackError::player(e);
            self.apply(SessionInput::Error(error.to_string())).await;
            return Err(error);
        }

        if let Err(e) = self.focus.acquire().await {
            warn!(error = %e, "Could not acquire audio focus");
        }

        info!(generation = self.generation, local_url = %local_url, "Playback session prepared");
        Ok(())
    }

    /// Stop and drop the current player, releasing focus.
    async fn teardown(&mut self) {
        if let Some(player) = self.player.take() {
            if let Err(e) = player.stop().await {
                warn!(error = %e, "Failed to stop player");
            }
            if let Err(e) = player.release().await {
                warn!(error = %e, "Failed to release player");
            }
        }
        self.proxy_session = None;

        if let Err(e) = self.focus.release().await {
            warn!(error = %e, "Failed to release audio focus");
        }
    }

    async fn set_play_when_ready(&mut self, play_when_ready: bool) -> Result<()> {
        let Some(player) = &self.player else {
            return Ok(());
        };
        player
            .set_play_when_ready(play_when_ready)
            .await
            .map_err(PlaybackError::player)
    }

    async fn seek_to(&mut self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() {
            return Err(PlaybackError::InvalidSeek(seconds));
        }
        let Some(player) = &self.player else {
            return Ok(());
        };

        let position = Duration::try_from_secs_f64(seconds.max(0.0))
            .map_err(|_| PlaybackError::InvalidSeek(seconds))?;
        let position_ms = u64::try_from(position.as_millis()).unwrap_or(u64::MAX);

        player
            .seek_to(position_ms)
            .await
            .map_err(PlaybackError::player)
    }

    async fn current_time(&self) -> Result<f64> {
        let Some(player) = &self.player else {
            return Ok(0.0);
        };
        let position_ms = player
            .current_position_ms()
            .await
            .map_err(PlaybackError::player)?;
        Ok(position_ms as f64 / 1000.0)
    }

    async fn duration(&self) -> Result<f64> {
        let Some(player) = &self.player else {
            return Ok(0.0);
        };
        let duration_ms = player.duration_ms().await.map_err(PlaybackError::player)?;
        Ok(duration_ms.map(|ms| ms as f64 / 1000.0).unwrap_or(0.0))
    }

    async fn on_player_callback(&mut self, generation: u64, callback: PlayerCallback) {
        if generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                ?callback,
                "Dropping callback from superseded player"
            );
            return;
        }

        let input = match callback {
            PlayerCallback::StateChanged {
                play_when_ready,
                state,
            } => SessionInput::StateChanged {
                play_when_ready,
                state,
            },
            PlayerCallback::LoadingChanged(true) => SessionInput::LoadingStarted,
            PlayerCallback::LoadingChanged(false) => {
                let play_when_ready = match &self.player {
                    Some(player) => match player.play_when_ready().await {
                        Ok(value) => Some(value),
                        Err(e) => {
                            warn!(error = %e, "Could not read play-when-ready");
                            Some(false)
                        }
                    },
                    None => None,
                };
                SessionInput::LoadingFinished { play_when_ready }
            }
            PlayerCallback::Error(message) | PlayerCallback::LoadError(message) => {
                SessionInput::Error(message)
            }
        };

        self.apply(input).await;
    }

    /// Run `input` through the state machine and carry out the result.
    async fn apply(&mut self, input: SessionInput) {
        let Some(transition) = self.machine.apply(&input) else {
            debug!(status = %self.machine.status(), ?input, "Callback ignored");
            return;
        };

        match transition.focus {
            FocusAction::Acquire => {
                if let Err(e) = self.focus.acquire().await {
                    warn!(error = %e, "Could not acquire audio focus");
                }
            }
            FocusAction::Release => {
                if let Err(e) = self.focus.release().await {
                    warn!(error = %e, "Failed to release audio focus");
                }
            }
            FocusAction::None => {}
        }

        if let SessionInput::Error(message) = &input {
            warn!(generation = self.generation, error = %message, "Player error");
            let _ = self
                .deps
                .event_bus
                .emit(CoreEvent::Playback(PlaybackEvent::PlayerError {
                    message: message.clone(),
                }));
        }

        self.publish(transition.status);
    }

    async fn on_focus_change(&mut self, change: FocusChange) {
        let is_playing = self.machine.status() == PlaybackStatus::Playing;
        let reaction = self.focus.on_focus_change(change, is_playing).await;

        let play_when_ready = match reaction {
            FocusReaction::Pause => false,
            FocusReaction::Resume => true,
            FocusReaction::None => return,
        };
        if let Err(e) = self.set_play_when_ready(play_when_ready).await {
            warn!(error = %e, ?reaction, "Failed to apply focus change to player");
        }
    }

    /// Record `status` and send the status notification.
    fn publish(&self, status: PlaybackStatus) {
        self.status.send_replace(status);
        let event = CoreEvent::Playback(PlaybackEvent::StatusChanged {
            status: status.as_str().to_string(),
        });
        debug!(event = event.name(), %status, generation = self.generation, "Status changed");
        let _ = self.deps.event_bus.emit(event);
    }
}
