//! Signal transformations applied to channel data before histogramming.
//!
//! Each transformation is an opaque array-to-array step. Some keep internal
//! state across segments (a running filter must see segments in time order);
//! that state is reset whenever the segment iterator reports a gap.
//!
//! Channels must not share transformation state, so the run controller
//! builds chains from [`ChainFactory`] closures - one independent chain per
//! (channel, combination).

use std::f64::consts::PI;

use ndarray::{Array1, ArrayView1};

/// An array-to-array conditioning step.
pub trait Transformation: Send {
    /// Short name used to build the chain label.
    fn name(&self) -> &'static str;

    /// Transform one segment's samples. Output length equals input length.
    fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64>;

    /// Drop state carried across segments. Called on a segment gap.
    fn reset(&mut self) {}
}

/// Builds one fresh, independently-stateful chain.
pub type ChainFactory = Box<dyn Fn() -> TransformChain + Send + Sync>;

/// An ordered chain of transformations with a combined label.
///
/// The empty chain is the untransformed run and has an empty label;
/// otherwise the label joins step names with `_` (e.g. `"abs_highpass"`).
pub struct TransformChain {
    label: String,
    steps: Vec<Box<dyn Transformation>>,
}

impl TransformChain {
    pub fn new(steps: Vec<Box<dyn Transformation>>) -> Self {
        let label = steps
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join("_");
        TransformChain { label, steps }
    }

    /// The untransformed run.
    pub fn raw() -> Self {
        TransformChain {
            label: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut out = x.to_owned();
        for step in &mut self.steps {
            out = step.apply(out.view());
        }
        out
    }

    pub fn reset(&mut self) {
        for step in &mut self.steps {
            step.reset();
        }
    }
}

// =============================================================================
// Concrete Transformations
// =============================================================================

/// Absolute value.
pub struct Abs;

impl Transformation for Abs {
    fn name(&self) -> &'static str {
        "abs"
    }

    fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        x.mapv(f64::abs)
    }
}

/// Absolute deviation from the mean.
///
/// The mean is pinned on first use, either explicitly or from the first
/// segment seen, and every later segment deviates from that same mean. A
/// reset clears the pin, so after a gap the next segment re-baselines.
pub struct AbsDeviation {
    mean: Option<f64>,
}

impl AbsDeviation {
    pub fn new() -> Self {
        AbsDeviation { mean: None }
    }

    pub fn with_mean(mean: f64) -> Self {
        AbsDeviation { mean: Some(mean) }
    }
}

impl Default for AbsDeviation {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformation for AbsDeviation {
    fn name(&self) -> &'static str {
        "absmean"
    }

    fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let mean = match self.mean {
            Some(m) => m,
            None => {
                let m = x.mean().unwrap_or(0.0);
                self.mean = Some(m);
                m
            }
        };
        x.mapv(|v| (v - mean).abs())
    }

    fn reset(&mut self) {
        self.mean = None;
    }
}

/// First-order high-pass filter with state persisted across segments.
///
/// Removes slow drifts so the histogram concentrates on fluctuation around
/// the trend. Filter state carries over contiguous segments and is cleared
/// on a gap.
pub struct HighPass {
    alpha: f64,
    /// `(previous input, previous output)` from the last processed sample.
    state: Option<(f64, f64)>,
}

impl HighPass {
    pub const CUTOFF_HZ: f64 = 2.0;

    pub fn new(sample_rate: f64) -> Self {
        Self::with_cutoff(sample_rate, Self::CUTOFF_HZ)
    }

    pub fn with_cutoff(sample_rate: f64, cutoff_hz: f64) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        HighPass {
            alpha: rc / (rc + dt),
            state: None,
        }
    }
}

impl Transformation for HighPass {
    fn name(&self) -> &'static str {
        "highpass"
    }

    fn apply(&mut self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        let mut out = Array1::zeros(x.len());
        if x.is_empty() {
            return out;
        }
        let (mut prev_x, mut prev_y) = self.state.unwrap_or((x[0], 0.0));
        for (i, &v) in x.iter().enumerate() {
            let y = self.alpha * (prev_y + v - prev_x);
            out[i] = y;
            prev_x = v;
            prev_y = y;
        }
        self.state = Some((prev_x, prev_y));
        out
    }

    fn reset(&mut self) {
        self.state = None;
    }
}
