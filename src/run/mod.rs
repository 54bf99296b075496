//! Run orchestration: per-channel accumulation and the segment loop.
//!
//! This module provides:
//! - [`ChannelState`] - one channel's transformation chains and cumulative
//!   histograms, advanced one segment at a time
//! - [`RunController`] - drives segments x channels, isolates failing
//!   channels, and exposes the finished histogram mapping
//!
//! # Failure Model
//!
//! Any per-channel error ([`ChannelFault`]) discards that channel's entire
//! accumulated state; the run itself continues and completes with a reduced
//! channel set. Only structural problems ([`RunError`]) abort a run before
//! accumulation starts.

mod accumulator;
mod controller;

pub use accumulator::{ChannelFault, ChannelState};
pub use controller::{
    HistKey, HistogramSet, RunController, RunError, RunOutput, RunParams, RunSummary,
};
