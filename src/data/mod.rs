//! Segment bookkeeping and external collaborator interfaces.
//!
//! This module provides:
//! - [`Segment`], [`SegmentIter`] - ordered time segments with gap detection
//! - [`VetoTracker`], [`VetoPolicy`] - per-segment sample exclusion masks
//! - [`DataSource`] - the raw-sample archive collaborator
//! - [`TriggerSource`] - the glitch-trigger collaborator
//!
//! The archive and trigger pipeline themselves (frame files, HDF5, Omicron,
//! CSV trigger lists) live outside this crate; tests use the in-memory
//! implementations from [`crate::testing`].

mod segment;
mod source;
mod triggers;

pub use segment::{iter_with_gaps, NoVeto, Segment, SegmentIter, VetoPolicy, VetoTracker};
pub use source::{
    is_excluded, ChannelDescriptor, DataSource, FetchError, DEFAULT_EXCLUDE_PATTERNS,
};
pub use triggers::{trigger_index, Trigger, TriggerSource};
