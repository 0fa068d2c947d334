//! `Range` request header parsing.

use std::ops::Range;

/// Outcome of resolving a `Range` header against a resource length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable header; serve the whole resource.
    Full,
    /// Serve this half-open range with `206 Partial Content`.
    Partial(Range<u64>),
    /// The header cannot be satisfied for this length (`416`).
    Unsatisfiable,
}

/// Parse a single-range `bytes=` header.
///
/// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. The end is clamped to
/// the resource. Headers in other units, or listing several ranges, are
/// ignored and the full resource is served.
pub fn parse_range_header(value: &str, total_length: u64) -> RangeRequest {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if spec.contains(',') {
        return RangeRequest::Full;
    }

    let Some((start, end)) = spec.trim().split_once('-') else {
        return RangeRequest::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    let range = match (start.is_empty(), end.is_empty()) {
        // bytes=-n: the last n bytes
        (true, false) => {
            let Ok(suffix) = end.parse::<u64>() else {
                return RangeRequest::Full;
            };
            if suffix == 0 || total_length == 0 {
                return RangeRequest::Unsatisfiable;
            }
            total_length.saturating_sub(suffix)..total_length
        }
        (false, _) => {
            let Ok(first) = start.parse::<u64>() else {
                return RangeRequest::Full;
            };
            let last = if end.is_empty() {
                u64::MAX
            } else {
                match end.parse::<u64>() {
                    Ok(last) if last >= first => last,
                    _ => return RangeRequest::Full,
                }
            };
            if first >= total_length {
                return RangeRequest::Unsatisfiable;
            }
            first..last.saturating_add(1).min(total_length)
        }
        (true, true) => return RangeRequest::Full,
    };

    RangeRequest::Partial(range)
}

/// `Content-Range` value for a served range.
pub fn content_range(range: &Range<u64>, total_length: u64) -> String {
    format!("bytes {}-{}/{}", range.start, range.end - 1, total_length)
}
