//! # Cache Store
//!
//! Bounded on-disk store of byte ranges, one sparse file per resource.
//!
//! Aggregate bookkeeping (entry index, stored byte count, eviction) sits
//! behind one store-wide lock. Each entry's range set has its own lock, so
//! readers of one resource never wait on writers of another. File I/O always
//! happens outside both locks.
//!
//! Eviction removes whole entries in least-recently-accessed order. An entry
//! evicted while leases are outstanding leaves the index at once, but its
//! file is deleted only when the last lease drops. Every entry gets a file
//! name of its own, so a re-created entry never shares a file with an evicted
//! one that is still leased.
//!
//! Admissions to one entry are serialized, which keeps the per-entry ceiling
//! check exact when several writers fill different gaps of one resource.

use crate::cache::config::CacheConfig;
use crate::cache::ranges::RangeSet;
use crate::cache::stats::CacheStats;
use crate::error::{PlaybackError, Result};
use bridge_traits::storage::FileSystemAccess;
use bridge_traits::time::Clock;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const INDEX_FILE_NAME: &str = "index.json";
const ENTRY_FILE_EXTENSION: &str = "cache";

/// Metadata of one cached resource.
#[derive(Debug)]
struct EntryMeta {
    ranges: RangeSet,
    total_length: Option<u64>,
    content_type: Option<String>,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheEntry {
    key: String,
    file_name: String,
    path: PathBuf,
    meta: Mutex<EntryMeta>,
    /// Held for the whole of one admit.
    admission: Arc<tokio::sync::Mutex<()>>,
    readers: AtomicUsize,
    evicted: AtomicBool,
}

impl CacheEntry {
    fn new(key: String, file_name: String, dir: &Path, meta: EntryMeta) -> Self {
        Self {
            key,
            path: dir.join(&file_name),
            file_name,
            meta: Mutex::new(meta),
            admission: Arc::new(tokio::sync::Mutex::new(())),
            readers: AtomicUsize::new(0),
            evicted: AtomicBool::new(false),
        }
    }

    fn stored_bytes(&self) -> u64 {
        self.meta.lock().ranges.total_len()
    }

    fn is_pinned(&self) -> bool {
        self.readers.load(Ordering::SeqCst) > 0
    }
}

/// Persisted form of an entry in `index.json`.
#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    file_name: String,
    ranges: RangeSet,
    total_length: Option<u64>,
    content_type: Option<String>,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
}

struct StoreState {
    /// Most recently accessed first; unbounded, limits are enforced by hand.
    entries: LruCache<String, Arc<CacheEntry>>,
    stored_bytes: u64,
    /// Bytes admitted but not yet written.
    reserved_bytes: u64,
    max_size_bytes: u64,
    max_files: usize,
}

/// Outcome of a successful [`CacheStore::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    pub entries_removed: usize,
    pub bytes_released: u64,
}

/// Bounded byte-range cache keyed by resource URL.
pub struct CacheStore {
    config: CacheConfig,
    fs: Arc<dyn FileSystemAccess>,
    clock: Arc<dyn Clock>,
    dir: PathBuf,
    state: Mutex<StoreState>,
    event_bus: Option<Arc<EventBus>>,
}

impl CacheStore {
    /// Open (or create) the store in `dir`.
    ///
    /// Loads `index.json` when present, dropping records whose files are
    /// gone, and deletes stray entry files the index does not know about.
    #[instrument(skip(config, fs, clock, dir), fields(dir = %dir.display()))]
    pub async fn open(
        config: CacheConfig,
        dir: PathBuf,
        fs: Arc<dyn FileSystemAccess>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate().map_err(PlaybackError::Config)?;

        fs.create_dir_all(&dir).await?;

        let store = Self {
            state: Mutex::new(StoreState {
                entries: LruCache::unbounded(),
                stored_bytes: 0,
                reserved_bytes: 0,
                max_size_bytes: config.max_cache_size_bytes,
                max_files: config.max_cache_files,
            }),
            config,
            fs,
            clock,
            dir,
            event_bus: None,
        };

        store.load_index().await;

        let stats = store.stats();
        info!(
            entries = stats.entry_count,
            bytes = stats.total_bytes,
            "Cache store opened"
        );

        Ok(store)
    }

    /// Set event bus for eviction events.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store `data` for `key` starting at byte `start`.
    ///
    /// Bytes beyond a known total length are dropped. Other entries are
    /// evicted, least recently accessed first, until the new bytes and the
    /// entry count fit. Returns the number of newly stored bytes.
    ///
    /// Fails with [`PlaybackError::StorageFull`] only when this entry alone
    /// would exceed the byte ceiling.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn admit(&self, key: &str, start: u64, data: Bytes) -> Result<u64> {
        if data.is_empty() {
            return Ok(0);
        }

        let mut range = start..start + data.len() as u64;

        // An entry evicted while we queued is gone from the index; retry on
        // whatever entry now stands for the key.
        let (entry, created, _admission) = loop {
            let (entry, created) = {
                let mut state = self.state.lock();
                self.entry_for(&mut state, key)
            };
            let admission = entry.admission.clone().lock_owned().await;
            if !entry.evicted.load(Ordering::SeqCst) {
                break (entry, created, admission);
            }
        };

        let (reserved, evicted) = {
            let mut state = self.state.lock();

            let (existing, delta) = {
                let meta = entry.meta.lock();
                if let Some(total) = meta.total_length {
                    range.end = range.end.min(total);
                }
                (meta.ranges.total_len(), meta.ranges.uncovered_len(&range))
            };

            if existing + delta > state.max_size_bytes {
                let ours = state
                    .entries
                    .peek(key)
                    .map(|current| Arc::ptr_eq(current, &entry))
                    .unwrap_or(false);
                if created && ours && existing == 0 {
                    // Admits queued behind us see the flag and start over.
                    entry.evicted.store(true, Ordering::SeqCst);
                    state.entries.pop(key);
                }
                return Err(PlaybackError::StorageFull {
                    key: key.to_string(),
                    required: existing + delta,
                    max: state.max_size_bytes,
                });
            }

            if delta == 0 {
                return Ok(0);
            }

            let evicted = Self::evict_locked(&mut state, Some(key), delta);
            state.reserved_bytes += delta;
            entry.readers.fetch_add(1, Ordering::SeqCst);
            (delta, evicted)
        };

        self.finish_evictions(evicted).await;

        let len = (range.end - range.start) as usize;
        let write = self
            .fs
            .write_at(&entry.path, range.start, data.slice(..len))
            .await;

        let added = {
            let mut state = self.state.lock();
            state.reserved_bytes = state.reserved_bytes.saturating_sub(reserved);

            match &write {
                Ok(()) => {
                    let added = entry.meta.lock().ranges.insert(range.clone());
                    if !entry.evicted.load(Ordering::SeqCst) {
                        state.stored_bytes += added;
                    }
                    added
                }
                Err(_) => 0,
            }
        };

        self.unpin(&entry).await;

        if let Err(e) = write {
            warn!(key, error = %e, "Failed to write cache bytes");
            return Err(e.into());
        }

        debug!(
            key,
            range_start = range.start,
            range_end = range.end,
            added,
            "Admitted bytes"
        );
        Ok(added)
    }

    /// Sub-ranges of `range` present for `key`, in order.
    ///
    /// Counts as an access for eviction ordering.
    pub fn lookup(&self, key: &str, range: Range<u64>) -> Vec<Range<u64>> {
        let mut state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) => {
                let mut meta = entry.meta.lock();
                meta.last_access = self.clock.now();
                meta.ranges.covered(&range)
            }
            None => Vec::new(),
        }
    }

    /// Pin `key` for reading. The entry's file outlives eviction until the
    /// lease is dropped.
    pub fn lease(&self, key: &str) -> Option<EntryLease> {
        let mut state = self.state.lock();
        let entry = state.entries.get(key)?.clone();
        entry.meta.lock().last_access = self.clock.now();
        entry.readers.fetch_add(1, Ordering::SeqCst);

        Some(EntryLease {
            entry,
            fs: self.fs.clone(),
        })
    }

    /// Record the full length (and content type) of a resource, creating the
    /// entry if needed. Stored bytes beyond the length are discarded.
    pub async fn set_total_length(
        &self,
        key: &str,
        total_length: u64,
        content_type: Option<String>,
    ) {
        let evicted = {
            let mut state = self.state.lock();
            let (entry, _) = self.entry_for(&mut state, key);
            let dropped = {
                let mut meta = entry.meta.lock();
                meta.total_length = Some(total_length);
                if content_type.is_some() {
                    meta.content_type = content_type;
                }
                meta.ranges.truncate(total_length)
            };
            state.stored_bytes = state.stored_bytes.saturating_sub(dropped);
            Self::evict_locked(&mut state, Some(key), 0)
        };

        self.finish_evictions(evicted).await;
    }

    pub fn total_length(&self, key: &str) -> Option<u64> {
        let state = self.state.lock();
        let entry = state.entries.peek(key)?;
        let total = entry.meta.lock().total_length;
        total
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        let state = self.state.lock();
        let entry = state.entries.peek(key)?;
        let content_type = entry.meta.lock().content_type.clone();
        content_type
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Stored bytes across all entries.
    pub fn size_in_bytes(&self) -> u64 {
        self.state.lock().stored_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Keys from least to most recently accessed.
    pub fn keys_by_access(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .rev()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Change both ceilings, evicting down to them immediately.
    #[instrument(skip(self))]
    pub async fn set_limits(&self, max_size_bytes: u64, max_files: usize) -> Result<()> {
        if max_size_bytes == 0 || max_files == 0 {
            return Err(PlaybackError::Config(
                "cache limits must be greater than 0".to_string(),
            ));
        }

        let evicted = {
            let mut state = self.state.lock();
            state.max_size_bytes = max_size_bytes;
            state.max_files = max_files;
            Self::evict_locked(&mut state, None, 0)
        };

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Evicted entries to fit new limits");
        }
        self.finish_evictions(evicted).await;
        Ok(())
    }

    pub fn limits(&self) -> (u64, usize) {
        let state = self.state.lock();
        (state.max_size_bytes, state.max_files)
    }

    /// Remove every entry.
    ///
    /// Entries whose files cannot be deleted stay in the index and are
    /// reported through [`PlaybackError::ClearIncomplete`].
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<ClearReport> {
        let drained: Vec<Arc<CacheEntry>> = {
            let mut state = self.state.lock();
            let mut drained = Vec::with_capacity(state.entries.len());
            while let Some((_, entry)) = state.entries.pop_lru() {
                entry.evicted.store(true, Ordering::SeqCst);
                drained.push(entry);
            }
            state.stored_bytes = 0;
            drained
        };

        let mut report = ClearReport::default();
        let mut failed = Vec::new();

        for entry in drained {
            let bytes = entry.stored_bytes();
            if entry.is_pinned() {
                debug!(key = %entry.key, "Deferring deletion of leased entry");
            } else if let Err(e) = self.delete_entry_file(&entry.path).await {
                warn!(key = %entry.key, error = %e, "Failed to remove cache entry");
                failed.push(entry);
                continue;
            }
            report.entries_removed += 1;
            report.bytes_released += bytes;
        }

        if let Err(e) = self.flush_index().await {
            warn!(error = %e, "Failed to rewrite cache index after clear");
        }

        if failed.is_empty() {
            info!(
                entries = report.entries_removed,
                bytes = report.bytes_released,
                "Cache cleared"
            );
            return Ok(report);
        }

        let failed_keys: Vec<String> = failed.iter().map(|entry| entry.key.clone()).collect();
        {
            let mut state = self.state.lock();
            for entry in failed {
                entry.evicted.store(false, Ordering::SeqCst);
                state.stored_bytes += entry.stored_bytes();
                state.entries.push(entry.key.clone(), entry);
            }
        }

        Err(PlaybackError::ClearIncomplete { failed_keys })
    }

    /// Write the entry index to `index.json`.
    pub async fn flush_index(&self) -> Result<()> {
        let records: Vec<IndexRecord> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .rev()
                .map(|(key, entry)| {
                    let meta = entry.meta.lock();
                    IndexRecord {
                        key: key.clone(),
                        file_name: entry.file_name.clone(),
                        ranges: meta.ranges.clone(),
                        total_length: meta.total_length,
                        content_type: meta.content_type.clone(),
                        created_at: meta.created_at,
                        last_access: meta.last_access,
                    }
                })
                .collect()
        };

        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| PlaybackError::Internal(format!("Failed to encode cache index: {}", e)))?;
        self.fs
            .write_file(&self.dir.join(INDEX_FILE_NAME), Bytes::from(json))
            .await?;

        debug!(entries = records.len(), "Cache index flushed");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = CacheStats {
            entry_count: state.entries.len(),
            total_bytes: state.stored_bytes,
            max_size_bytes: state.max_size_bytes,
            max_files: state.max_files,
            calculated_at: self.clock.unix_timestamp(),
            ..Default::default()
        };

        for (_, entry) in state.entries.iter() {
            if entry.is_pinned() {
                stats.pinned_entries += 1;
            }
            let meta = entry.meta.lock();
            if let Some(total) = meta.total_length {
                if meta.ranges.total_len() == total {
                    stats.complete_entries += 1;
                }
            }
        }

        stats
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Fetch or create the entry for `key`, marking it most recently used.
    fn entry_for(&self, state: &mut StoreState, key: &str) -> (Arc<CacheEntry>, bool) {
        let now = self.clock.now();
        if let Some(entry) = state.entries.get(key) {
            entry.meta.lock().last_access = now;
            return (entry.clone(), false);
        }

        let entry = Arc::new(CacheEntry::new(
            key.to_string(),
            file_name_for(key),
            &self.dir,
            EntryMeta {
                ranges: RangeSet::new(),
                total_length: None,
                content_type: None,
                created_at: now,
                last_access: now,
            },
        ));
        state.entries.push(key.to_string(), entry.clone());
        (entry, true)
    }

    /// Evict least recently accessed entries (never `keep`) until `incoming`
    /// more bytes and the current entry count fit the ceilings.
    fn evict_locked(
        state: &mut StoreState,
        keep: Option<&str>,
        incoming: u64,
    ) -> Vec<Arc<CacheEntry>> {
        let mut evicted = Vec::new();

        loop {
            let over_size =
                state.stored_bytes + state.reserved_bytes + incoming > state.max_size_bytes;
            let over_count = state.entries.len() > state.max_files;
            if !over_size && !over_count {
                break;
            }

            let victim = state
                .entries
                .iter()
                .rev()
                .map(|(key, _)| key)
                .find(|key| Some(key.as_str()) != keep)
                .cloned();

            let Some(victim) = victim else {
                break;
            };

            if let Some(entry) = state.entries.pop(&victim) {
                entry.evicted.store(true, Ordering::SeqCst);
                state.stored_bytes = state.stored_bytes.saturating_sub(entry.stored_bytes());
                evicted.push(entry);
            }
        }

        evicted
    }

    async fn finish_evictions(&self, evicted: Vec<Arc<CacheEntry>>) {
        for entry in evicted {
            let bytes = entry.stored_bytes();
            if entry.is_pinned() {
                debug!(key = %entry.key, "Evicted entry is leased, deferring file deletion");
            } else if let Err(e) = self.delete_entry_file(&entry.path).await {
                warn!(key = %entry.key, error = %e, "Failed to delete evicted cache file");
            }

            debug!(key = %entry.key, bytes, "Evicted cache entry");
            if let Some(bus) = &self.event_bus {
                let _ = bus.emit(CoreEvent::Cache(CacheEvent::EntryEvicted {
                    key: entry.key.clone(),
                    bytes,
                }));
            }
        }
    }

    async fn unpin(&self, entry: &Arc<CacheEntry>) {
        let remaining = entry.readers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && entry.evicted.load(Ordering::SeqCst) {
            if let Err(e) = self.delete_entry_file(&entry.path).await {
                warn!(key = %entry.key, error = %e, "Failed to delete evicted cache file");
            }
        }
    }

    async fn delete_entry_file(&self, path: &Path) -> Result<()> {
        if self.fs.exists(path).await? {
            self.fs.delete_file(path).await?;
        }
        Ok(())
    }

    async fn load_index(&self) {
        let index_path = self.dir.join(INDEX_FILE_NAME);

        let mut records: Vec<IndexRecord> = match self.fs.exists(&index_path).await {
            Ok(true) => match self.fs.read_file(&index_path).await {
                Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                    warn!(error = %e, "Cache index is corrupt, starting empty");
                    Vec::new()
                }),
                Err(e) => {
                    warn!(error = %e, "Failed to read cache index, starting empty");
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        records.sort_by_key(|record| record.last_access);

        let mut known_files = Vec::with_capacity(records.len());
        for mut record in records {
            let path = self.dir.join(&record.file_name);
            let size = match self.fs.metadata(&path).await {
                Ok(meta) if !meta.is_directory => meta.size,
                _ => {
                    debug!(key = %record.key, "Dropping index record without a file");
                    continue;
                }
            };
            record.ranges.truncate(size);
            known_files.push(record.file_name.clone());

            let entry = Arc::new(CacheEntry::new(
                record.key.clone(),
                record.file_name,
                &self.dir,
                EntryMeta {
                    ranges: record.ranges,
                    total_length: record.total_length,
                    content_type: record.content_type,
                    created_at: record.created_at,
                    last_access: record.last_access,
                },
            ));

            {
                let mut state = self.state.lock();
                state.stored_bytes += entry.stored_bytes();
                state.entries.push(record.key, entry);
            }
        }

        if let Ok(files) = self.fs.list_directory(&self.dir).await {
            for file in files {
                let is_entry_file = file
                    .extension()
                    .map(|ext| ext == ENTRY_FILE_EXTENSION)
                    .unwrap_or(false);
                let known = file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| known_files.iter().any(|known| known == name))
                    .unwrap_or(false);
                if is_entry_file && !known {
                    debug!(file = %file.display(), "Removing stray cache file");
                    let _ = self.fs.delete_file(&file).await;
                }
            }
        }

        let evicted = {
            let mut state = self.state.lock();
            Self::evict_locked(&mut state, None, 0)
        };
        self.finish_evictions(evicted).await;
    }
}

/// Read access to one entry, pinning it against file deletion.
pub struct EntryLease {
    entry: Arc<CacheEntry>,
    fs: Arc<dyn FileSystemAccess>,
}

impl EntryLease {
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    pub fn total_length(&self) -> Option<u64> {
        self.entry.meta.lock().total_length
    }

    pub fn covered(&self, range: &Range<u64>) -> Vec<Range<u64>> {
        self.entry.meta.lock().ranges.covered(range)
    }

    pub fn contains(&self, range: &Range<u64>) -> bool {
        self.entry.meta.lock().ranges.contains(range)
    }

    /// Read `range`, which must be fully present.
    pub async fn read(&self, range: Range<u64>) -> Result<Bytes> {
        if !self.contains(&range) {
            return Err(PlaybackError::InvalidRange(format!(
                "bytes {}-{} of '{}' are not cached",
                range.start, range.end, self.entry.key
            )));
        }

        let len = (range.end - range.start) as usize;
        let data = self.fs.read_at(&self.entry.path, range.start, len).await?;
        if data.len() != len {
            return Err(PlaybackError::Io(format!(
                "short read for '{}': expected {} bytes, got {}",
                self.entry.key,
                len,
                data.len()
            )));
        }
        Ok(data)
    }
}

impl Drop for EntryLease {
    fn drop(&mut self) {
        let remaining = self.entry.readers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 || !self.entry.evicted.load(Ordering::SeqCst) {
            return;
        }

        let fs = self.fs.clone();
        let path = self.entry.path.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = fs.delete_file(&path).await {
                        debug!(file = %path.display(), error = %e, "Deferred cache delete failed");
                    }
                });
            }
            Err(_) => {
                warn!(file = %path.display(), "No runtime to delete evicted cache file");
            }
        }
    }
}

/// File name for a new incarnation of `key`'s entry.
fn file_name_for(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!(
        "{}-{}.{}",
        hex::encode(digest),
        Uuid::new_v4().simple(),
        ENTRY_FILE_EXTENSION
    )
}
