//! # Event Bus System
//!
//! Provides an event-driven architecture for the streaming core using `tokio::sync::broadcast`.
//! This module enables decoupled communication between the playback session,
//! the cache proxy and the host application through typed events.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for different domains
//! - **EventBus**: Central broadcast channel for publishing events
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐  emit   ┌───────────┐
//! │ Playback Session ├────────>│           │
//! └──────────────────┘         │           │   subscribe   ┌──────────────┐
//!                              │ EventBus  ├──────────────>│ Host bridge  │
//! ┌──────────────────┐  emit   │ (broadcast│               └──────────────┘
//! │ Cache Proxy      ├────────>│  channel) │
//! └──────────────────┘         │           │   subscribe   ┌──────────────┐
//! ┌──────────────────┐  emit   │           ├──────────────>│ Diagnostics  │
//! │ Cache Store      ├────────>│           │               └──────────────┘
//! └──────────────────┘         └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(64);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus.emit(CoreEvent::Playback(PlaybackEvent::StatusChanged {
//!     status: "BUFFERING".to_string(),
//! })).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.name(), core_runtime::events::STATUS_CHANGED_EVENT);
//! # }
//! ```
//!
//! ## Event Types
//!
//! ### Playback Events
//! - `StatusChanged`: The single status notification forwarded to the host
//! - `PlayerError`: Details of the failure behind an `ERROR` status
//!
//! ### Cache Events
//! - `EntryEvicted`: An entry was dropped to make room
//! - `Cleared`: An explicit clear finished (possibly partially)
//! - `OperationFailed`: A cache-management call failed
//!
//! ### Proxy Events
//! - `SessionStarted` / `SessionSuperseded`: Local endpoint lifecycle
//! - `OriginFetchFailed`: A gap fetch failed; only that request is affected
//! - `PassthroughFallback`: Bytes were served without being stored
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting without subscribers returns an error that producers ignore.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 64;

/// Name under which status notifications are delivered to the host.
pub const STATUS_CHANGED_EVENT: &str = "AudioStreamerStatusChanged";

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Playback status and player failures
    Playback(PlaybackEvent),
    /// Cache store bookkeeping
    Cache(CacheEvent),
    /// Local proxy lifecycle and origin failures
    Proxy(ProxyEvent),
}

impl CoreEvent {
    /// Name used when the event crosses the host bridge.
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::Playback(PlaybackEvent::StatusChanged { .. }) => STATUS_CHANGED_EVENT,
            CoreEvent::Playback(PlaybackEvent::PlayerError { .. }) => "AudioStreamerPlayerError",
            CoreEvent::Cache(_) => "AudioStreamerCache",
            CoreEvent::Proxy(_) => "AudioStreamerProxy",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to the playback session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// The playback status changed. Carries the status string
    /// (`STOPPED`, `BUFFERING`, `PLAYING`, `PAUSED`, `FINISHED`, `ERROR`).
    StatusChanged {
        status: String,
    },
    /// The player reported a fatal error.
    PlayerError {
        message: String,
    },
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// An entry was evicted to respect the size or file-count ceiling.
    EntryEvicted {
        key: String,
        /// Stored bytes released by the eviction.
        bytes: u64,
    },
    /// `clear` finished. `failed_keys` lists entries that could not be removed.
    Cleared {
        entries_removed: usize,
        failed_keys: Vec<String>,
    },
    /// A cache-management call failed.
    OperationFailed {
        operation: String,
        message: String,
    },
}

// ============================================================================
// Proxy Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ProxyEvent {
    /// A new proxy session accepts requests at `local_url`.
    SessionStarted {
        session_id: String,
        local_url: String,
    },
    /// The session stopped accepting new requests.
    SessionSuperseded {
        session_id: String,
    },
    /// The origin fetch for `[range_start, range_end)` failed.
    OriginFetchFailed {
        session_id: String,
        range_start: u64,
        range_end: u64,
        message: String,
    },
    /// Bytes were served straight from the origin without being cached.
    PassthroughFallback {
        session_id: String,
        reason: String,
    },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally, which provides:
/// - Multiple producers (clone the `EventBus`)
/// - Multiple consumers (each `subscribe()` creates a new receiver)
/// - Non-blocking sends (events are cloned for each subscriber)
/// - Lagging detection (slow subscribers get `RecvError::Lagged`)
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(16);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: &str) -> CoreEvent {
        CoreEvent::Playback(PlaybackEvent::StatusChanged {
            status: status.to_string(),
        })
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(status("PLAYING")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Proxy(ProxyEvent::SessionStarted {
            session_id: "s-1".to_string(),
            local_url: "http://127.0.0.1:4000/stream/s-1".to_string(),
        });

        assert_eq!(bus.emit(event.clone()).unwrap(), 2);
        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..5 {
            bus.emit(status("BUFFERING")).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_names() {
        assert_eq!(status("PLAYING").name(), STATUS_CHANGED_EVENT);

        let partial = CoreEvent::Cache(CacheEvent::Cleared {
            entries_removed: 1,
            failed_keys: vec!["k".to_string()],
        });
        assert_eq!(partial.name(), "AudioStreamerCache");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for _ in 0..10 {
                bus1.emit(status("BUFFERING")).ok();
            }
        });

        let handle2 = tokio::spawn(async move {
            for i in 0..10u64 {
                bus2.emit(CoreEvent::Proxy(ProxyEvent::OriginFetchFailed {
                    session_id: "s".to_string(),
                    range_start: i,
                    range_end: i + 1,
                    message: "timeout".to_string(),
                }))
                .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = status("FINISHED");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("StatusChanged"));
        assert!(json.contains("FINISHED"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }

    #[tokio::test]
    async fn test_try_recv() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe();
        assert!(sub.try_recv().is_err());

        bus.emit(status("STOPPED")).ok();
        assert_eq!(sub.try_recv().unwrap(), status("STOPPED"));
    }
}
