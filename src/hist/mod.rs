//! Incremental mergeable histogram engine.
//!
//! This module provides:
//! - [`Hist`] - Fixed-resolution histogram over a power-of-two bin grid
//! - [`HistError`] - Construction and alignment failures
//!
//! # Recommended Usage
//!
//! Build one histogram per data chunk and fold them into a running
//! cumulative histogram with [`Hist::merge`]. Pass the cumulative histogram
//! as the `spanlike` hint when building chunk histograms to avoid needless
//! resizing during the merge.
//!
//! # Design Philosophy
//!
//! All bin-boundary arithmetic is done on an infinite integer grid in `i64`;
//! floating point only enters when mapping a sample onto the grid and when
//! reporting spans, edges, and the CDF. Repeated merges over months of data
//! therefore never accumulate rounding error in bin boundaries.

mod hist;

pub use hist::{Hist, HistError, HistKind};
