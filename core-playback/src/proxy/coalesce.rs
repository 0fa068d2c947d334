//! Coalescing of concurrent origin fetches.
//!
//! At most one origin request is outstanding for any overlapping gap within
//! one scope. The proxy scopes fetches by session and resource, so a new
//! session never joins a fetch its predecessor started. The first requester
//! becomes the owner and fetches; later requesters for an overlapping gap
//! wait on the owner's progress channel, re-read the store as bytes land, and
//! claim whatever is still missing once the owner finishes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Progress of one in-flight origin fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchProgress {
    /// Bytes up to `stored_to` (exclusive) have been admitted to the store.
    Running { stored_to: u64 },
    /// The owner finished. Whatever it could store is in the store.
    Done,
    /// The origin fetch failed.
    Failed(String),
}

struct InFlight {
    id: u64,
    range: Range<u64>,
    progress: watch::Receiver<FetchProgress>,
}

/// Registry of in-flight fetches, keyed by scope.
#[derive(Default)]
pub struct FetchRegistry {
    in_flight: Mutex<HashMap<String, Vec<InFlight>>>,
    next_id: AtomicU64,
}

/// Result of [`FetchRegistry::claim`].
pub enum Claim {
    /// The caller must fetch the gap and report progress.
    Owner(FetchGuard),
    /// Another request is already fetching an overlapping gap.
    Wait(FetchWaiter),
}

impl FetchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the fetcher of `gap`, or wait for the fetch that overlaps it.
    pub fn claim(self: &Arc<Self>, key: &str, gap: Range<u64>) -> Claim {
        let mut in_flight = self.in_flight.lock();
        let fetches = in_flight.entry(key.to_string()).or_default();

        if let Some(existing) = fetches
            .iter()
            .find(|f| f.range.start < gap.end && gap.start < f.range.end)
        {
            trace!(
                key,
                range_start = existing.range.start,
                range_end = existing.range.end,
                "Joining in-flight fetch"
            );
            let mut progress = existing.progress.clone();
            progress.borrow_and_update();
            return Claim::Wait(FetchWaiter {
                range: existing.range.clone(),
                progress,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(FetchProgress::Running {
            stored_to: gap.start,
        });
        fetches.push(InFlight {
            id,
            range: gap.clone(),
            progress: rx,
        });

        Claim::Owner(FetchGuard {
            registry: self.clone(),
            key: key.to_string(),
            id,
            range: gap,
            progress: tx,
        })
    }

    /// Number of fetches in flight for `key`.
    pub fn in_flight(&self, key: &str) -> usize {
        self.in_flight.lock().get(key).map(Vec::len).unwrap_or(0)
    }

    fn remove(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if let Some(fetches) = in_flight.get_mut(key) {
            fetches.retain(|f| f.id != id);
            if fetches.is_empty() {
                in_flight.remove(key);
            }
        }
    }
}

/// Ownership of one in-flight fetch. Dropping it unregisters the fetch and
/// wakes waiters.
pub struct FetchGuard {
    registry: Arc<FetchRegistry>,
    key: String,
    id: u64,
    range: Range<u64>,
    progress: watch::Sender<FetchProgress>,
}

impl FetchGuard {
    pub fn range(&self) -> &Range<u64> {
        &self.range
    }

    /// Announce that bytes up to `stored_to` are in the store.
    pub fn stored_to(&self, stored_to: u64) {
        self.progress
            .send_replace(FetchProgress::Running { stored_to });
    }

    /// Mark the fetch failed; waiters receive `message`.
    pub fn fail(self, message: impl Into<String>) {
        self.registry.remove(&self.key, self.id);
        self.progress
            .send_replace(FetchProgress::Failed(message.into()));
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
        if matches!(*self.progress.borrow(), FetchProgress::Running { .. }) {
            self.progress.send_replace(FetchProgress::Done);
        }
    }
}

/// Handle for waiting on someone else's fetch.
pub struct FetchWaiter {
    range: Range<u64>,
    progress: watch::Receiver<FetchProgress>,
}

impl FetchWaiter {
    /// The gap the owner is fetching.
    pub fn range(&self) -> &Range<u64> {
        &self.range
    }

    /// Wait for the next progress report.
    pub async fn next(&mut self) -> FetchProgress {
        if self.progress.changed().await.is_err() {
            // Owner is gone; report its final state.
            return match &*self.progress.borrow() {
                FetchProgress::Failed(message) => FetchProgress::Failed(message.clone()),
                _ => FetchProgress::Done,
            };
        }
        let progress = self.progress.borrow_and_update().clone();
        progress
    }
}
