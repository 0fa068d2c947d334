//! # Byte-Range Cache
//!
//! Bounded on-disk cache of partially downloaded media resources.
//!
//! ## Overview
//!
//! Each resource (keyed by its origin URL) is stored as one sparse file plus
//! the set of byte ranges known to be present. Key features:
//! - Persistent storage using the `FileSystemAccess` trait
//! - LRU eviction under a byte ceiling and an entry-count ceiling
//! - Leases that keep evicted files readable for in-flight readers
//! - A JSON index so the cache survives restarts
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheStore                         │
//! │  - admit() / lookup()                  │
//! │  - lease() -> EntryLease               │
//! │  - clear() / set_limits()              │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> LruCache<key, CacheEntry> (index + access order)
//!          ├──> RangeSet per entry (stored byte ranges)
//!          └──> FileSystemAccess (sparse entry files, index.json)
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_playback::cache::{CacheConfig, CacheStore};
//!
//! # async fn example(store: &CacheStore) -> core_playback::Result<()> {
//! store.admit("https://example.com/a.mp3", 0, bytes).await?;
//!
//! for range in store.lookup("https://example.com/a.mp3", 0..1024) {
//!     println!("cached: {:?}", range);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod ranges;
pub mod stats;
pub mod store;

pub use config::CacheConfig;
pub use ranges::RangeSet;
pub use stats::{human_readable_byte_count, CacheStats};
pub use store::{CacheStore, ClearReport, EntryLease};
