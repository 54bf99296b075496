//! Raw-sample archive interface and channel exclusion patterns.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Channels excluded from mining by default: aggregate min/max/rms channels,
/// vacuum and DAQ housekeeping, downsampled duplicates, and channels flagged
/// unsafe.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "*max",
    "*min",
    "V1:VAC*",
    "V1:Daq*",
    "*rms",
    "*_DS",
    "*_notsafe",
];

/// An auxiliary channel known to the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    /// Samples per second after archive-side resampling.
    pub sample_rate: f64,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, sample_rate: f64) -> Self {
        ChannelDescriptor {
            name: name.into(),
            sample_rate,
        }
    }
}

/// Retrieval failures. Both are channel-fatal for the run: the channel is
/// discarded wholesale, not just skipped for one segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The channel disappeared from the archive.
    #[error("channel not found in archive")]
    NotFound,
    /// The archive returned bytes that could not be decoded into samples.
    #[error("failed to decode samples: {0}")]
    Decode(String),
}

/// The raw-sample archive collaborator.
///
/// Implementations own frame-file/segment-cache I/O, caching, and retries;
/// this crate only consumes the resulting sample arrays.
pub trait DataSource: Sync {
    /// Channels available as of `as_of`, with `exclude_patterns` applied.
    fn available_channels(&self, as_of: f64, exclude_patterns: &[&str]) -> Vec<ChannelDescriptor>;

    /// Raw samples for `channel` over `[start, end)` at the channel's rate.
    fn fetch_samples(&self, channel: &str, start: f64, end: f64) -> Result<Array1<f64>, FetchError>;
}

/// Wildcard match with `*` as "any run of characters" (`*max`, `V1:VAC*`).
fn matches_pattern(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) {
        return false;
    }
    let mut rest = &name[first.len()..];
    // Middle literals are matched greedily left to right.
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Whether `name` matches any of the exclusion patterns.
pub fn is_excluded(name: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| matches_pattern(name, p))
}
