//! excavator: mining auxiliary channels correlated with noise glitches.
//!
//! A single-process streaming aggregation engine: it walks science segments
//! in time order, fetches every auxiliary channel resampled to a common
//! rate, pushes the samples through transformation chains, and accumulates
//! incrementally mergeable fixed-resolution histograms of the full sample
//! population next to the subpopulation observed at glitch-trigger times.
//! Downstream statistics compare the two distributions per channel.
//!
//! # Key Types
//!
//! - [`Hist`] - incremental mergeable fixed-resolution histogram
//! - [`RunController`] / [`RunParams`] - segments x channels orchestration
//! - [`DataSource`] / [`TriggerSource`] - archive and trigger collaborators
//! - [`Transformation`] / [`TransformChain`] - signal conditioning steps
//!
//! # Running
//!
//! Implement [`DataSource`] and [`TriggerSource`] over your archive, build
//! a [`RunController`] with [`RunParams`], and call `run` with the science
//! segments. The result maps `(channel, transform, label)` keys to
//! cumulative histograms for every channel that survived the run.

pub mod data;
pub mod hist;
pub mod run;
pub mod testing;
pub mod transform;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// The histogram engine
pub use hist::{Hist, HistError, HistKind};

// Run orchestration
pub use run::{
    ChannelFault, HistKey, HistogramSet, RunController, RunError, RunOutput, RunParams,
    RunSummary,
};

// Collaborator interfaces and time bookkeeping
pub use data::{
    ChannelDescriptor, DataSource, FetchError, NoVeto, Segment, Trigger, TriggerSource,
    VetoPolicy, DEFAULT_EXCLUDE_PATTERNS,
};

// Signal conditioning
pub use transform::{Abs, AbsDeviation, ChainFactory, HighPass, TransformChain, Transformation};

// Shared utilities
pub use utils::{run_with_threads, Parallelism};
