//! Cache statistics and size formatting

use serde::{Deserialize, Serialize};

/// Snapshot of the cache store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of resources in the index
    pub entry_count: usize,

    /// Stored bytes across all indexed entries
    pub total_bytes: u64,

    /// Entries currently held by in-flight readers
    pub pinned_entries: usize,

    /// Entries that know the full length of their resource
    pub complete_entries: usize,

    /// Configured byte ceiling
    pub max_size_bytes: u64,

    /// Configured entry-count ceiling
    pub max_files: usize,

    /// Timestamp when stats were calculated
    pub calculated_at: i64,
}

/// Format a byte count for display.
///
/// Counts below one unit print as `"{n} B"`. Larger counts print one decimal
/// and a prefix: `si` selects 1000-based `kB, MB, ...`, otherwise 1024-based
/// `KiB, MiB, ...`.
pub fn human_readable_byte_count(bytes: u64, si: bool) -> String {
    let unit: u64 = if si { 1000 } else { 1024 };
    if bytes < unit {
        return format!("{} B", bytes);
    }

    // floor(log_unit(bytes)) without float rounding at exact powers
    let mut exp = 0usize;
    let mut scaled = bytes;
    while scaled >= unit {
        scaled /= unit;
        exp += 1;
    }

    let prefixes = if si { "kMGTPE" } else { "KMGTPE" };
    let index = exp.min(prefixes.len()) - 1;
    let prefix = &prefixes[index..=index];
    let suffix = if si { "" } else { "i" };

    format!(
        "{:.1} {}{}B",
        bytes as f64 / (unit as f64).powi(exp as i32),
        prefix,
        suffix
    )
}
