//! Fixed-resolution mergeable histogram.
//!
//! A [`Hist`] covers its samples with `2^l2_nbin` bins whose edges always
//! lie on a power-of-two grid. Two histograms built from disjoint chunks of
//! a longer sequence can be merged into the histogram of the whole sequence,
//! provided they share `l2_nbin`. Because spans are powers of two the bins
//! are not always aligned perfectly with the data, but a filling factor
//! close to 50% is guaranteed.

use std::fmt;

use ndarray::{Array1, ArrayView1};

/// Largest integer exactly representable in an `f64`. Grid indices beyond
/// this cannot round-trip through the float mapping, so they are rejected.
const FLINTMAX: i64 = 1 << 53;

/// Errors raised by histogram construction and alignment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistError {
    /// A sample batch contained NaN or infinite values.
    #[error("non-finite samples in histogram input")]
    NonFinite,
    /// A grid index exceeded 2^53; the span/offset combination is too
    /// extreme for exact integer mapping.
    #[error("data are badly scaled for the histogram grid")]
    BadScale,
    /// Histograms with different bin counts can never be merged.
    #[error("bin count mismatch: 2^{0} vs 2^{1}")]
    BinCountMismatch(u32, u32),
    /// An internal invariant was violated. Callers should treat the
    /// histogram as corrupt and discard it.
    #[error("histogram invariant violated: {0}")]
    Invariant(&'static str),
}

fn invariant(cond: bool, what: &'static str) -> Result<(), HistError> {
    if cond {
        Ok(())
    } else {
        Err(HistError::Invariant(what))
    }
}

/// `floor(x * 2^lg2)` as an exact `i64`, rejecting indices beyond 2^53.
fn grid_floor(x: f64, lg2: i32) -> Result<i64, HistError> {
    let idx = (x * f64::exp2(lg2 as f64)).floor();
    if !idx.is_finite() || idx.abs() > FLINTMAX as f64 {
        return Err(HistError::BadScale);
    }
    Ok(idx as i64)
}

/// Coarse histogram state, exposed for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistKind {
    /// Zero samples ever seen.
    Empty,
    /// All samples seen so far are bit-identical; no bin array exists.
    Constant,
    /// Normal histogram with a bin-count array.
    Expanded,
}

#[derive(Debug, Clone)]
enum State {
    Empty,
    Constant(f64),
    Expanded(Bins),
}

/// Bin storage of an expanded histogram.
///
/// `i_offset` is the index, on the infinite global grid, of the global bin
/// mapped to local bin 0. `i_min`/`i_max` are the global indices of the
/// lowest/highest occupied bin.
#[derive(Debug, Clone)]
struct Bins {
    l2_span: i32,
    i_offset: i64,
    i_min: i64,
    i_max: i64,
    counts: Vec<u64>,
}

/// Fixed-resolution histogram that supports exact merging.
///
/// # Example
///
/// ```
/// use excavator::hist::Hist;
/// use ndarray::array;
///
/// let chunk1 = array![1.0, 1.0, 2.0, 2.0, 2.0, 3.0];
/// let chunk2 = array![3.0, 3.0, 4.0];
///
/// let h1 = Hist::from_samples(chunk1.view(), 2, None).unwrap();
/// let h2 = Hist::from_samples(chunk2.view(), 2, Some(&h1)).unwrap();
/// let cum = h1.merge(h2).unwrap();
///
/// assert_eq!(cum.total_count(), 9);
/// ```
#[derive(Debug, Clone)]
pub struct Hist {
    l2_nbin: u32,
    n_total: u64,
    state: State,
}

impl Hist {
    /// Create an empty histogram with `2^l2_nbin` bins.
    pub fn empty(l2_nbin: u32) -> Self {
        Hist {
            l2_nbin,
            n_total: 0,
            state: State::Empty,
        }
    }

    /// Build a histogram of `x` with `2^l2_nbin` bins.
    ///
    /// If `spanlike` is given and expanded, its span (and where possible its
    /// window offset) is reused so that a later merge with it needs no
    /// resizing or shifting.
    ///
    /// # Errors
    ///
    /// - [`HistError::NonFinite`] if `x` contains NaN or infinities
    /// - [`HistError::BadScale`] if a grid index would exceed 2^53
    pub fn from_samples(
        x: ArrayView1<'_, f64>,
        l2_nbin: u32,
        spanlike: Option<&Hist>,
    ) -> Result<Self, HistError> {
        let nbin = 1usize << l2_nbin;
        if x.is_empty() {
            return Ok(Self::empty(l2_nbin));
        }

        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        for &v in x.iter() {
            if !v.is_finite() {
                return Err(HistError::NonFinite);
            }
            x_min = x_min.min(v);
            x_max = x_max.max(v);
        }

        let n_total = x.len() as u64;
        if x_min == x_max {
            return Ok(Hist {
                l2_nbin,
                n_total,
                state: State::Constant(x_min),
            });
        }

        // The margin guarantees that a sample sitting exactly on the span
        // boundary still lands inside the window.
        let margin = (nbin as f64 + 2.0) / nbin as f64;
        let mut l2_span = ((x_max - x_min) * margin).log2().ceil() as i32;

        let spanlike = spanlike.filter(|h| h.is_expanded());
        if let Some(hint) = spanlike {
            if let State::Expanded(b) = &hint.state {
                l2_span = l2_span.max(b.l2_span);
            }
        }

        let lg2 = l2_nbin as i32 - l2_span;
        let i_min = grid_floor(x_min, lg2)?;
        let i_max = grid_floor(x_max, lg2)?;
        invariant(i_max - i_min < nbin as i64, "span too small for data range")?;

        // Reuse the hint's window when it already contains our occupied
        // range, so merging into it later needs no shift.
        let centered = (i_min + i_max + 1 - nbin as i64).div_euclid(2);
        let i_offset = match spanlike.map(|h| &h.state) {
            Some(State::Expanded(b))
                if b.l2_span == l2_span
                    && b.i_offset <= i_min
                    && i_max < b.i_offset + nbin as i64 =>
            {
                b.i_offset
            }
            _ => centered,
        };

        let mut counts = vec![0u64; nbin];
        for &v in x.iter() {
            let local = grid_floor(v, lg2)? - i_offset;
            debug_assert!(
                (0..nbin as i64).contains(&local),
                "sample bin index {local} outside window"
            );
            invariant(
                (0..nbin as i64).contains(&local),
                "sample bin index outside window",
            )?;
            counts[local as usize] += 1;
        }

        let hist = Hist {
            l2_nbin,
            n_total,
            state: State::Expanded(Bins {
                l2_span,
                i_offset,
                i_min,
                i_max,
                counts,
            }),
        };
        hist.check()?;
        Ok(hist)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Coarse state of this histogram.
    pub fn kind(&self) -> HistKind {
        match self.state {
            State::Empty => HistKind::Empty,
            State::Constant(_) => HistKind::Constant,
            State::Expanded(_) => HistKind::Expanded,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, State::Empty)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.state, State::Constant(_))
    }

    pub fn is_expanded(&self) -> bool {
        matches!(self.state, State::Expanded(_))
    }

    /// Log2 of the bin count, fixed at construction.
    #[inline]
    pub fn l2_nbin(&self) -> u32 {
        self.l2_nbin
    }

    /// Number of bins.
    #[inline]
    pub fn nbin(&self) -> usize {
        1usize << self.l2_nbin
    }

    /// Total number of samples accumulated.
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.n_total
    }

    /// The stored value of a constant histogram.
    pub fn constant_value(&self) -> Option<f64> {
        match self.state {
            State::Constant(v) => Some(v),
            _ => None,
        }
    }

    /// Bin counts, if expanded.
    pub fn counts(&self) -> Option<&[u64]> {
        self.bins().map(|b| b.counts.as_slice())
    }

    /// Log2 of the covered domain width, if expanded.
    pub fn l2_span(&self) -> Option<i32> {
        self.bins().map(|b| b.l2_span)
    }

    /// Total covered domain width, if expanded. Always a power of two.
    pub fn span(&self) -> Option<f64> {
        self.bins().map(|b| f64::exp2(b.l2_span as f64))
    }

    /// Width of a single bin, if expanded.
    pub fn bin_width(&self) -> Option<f64> {
        self.bins()
            .map(|b| f64::exp2((b.l2_span - self.l2_nbin as i32) as f64))
    }

    /// Global grid index of the bin mapped to local bin 0, if expanded.
    pub fn window_offset(&self) -> Option<i64> {
        self.bins().map(|b| b.i_offset)
    }

    /// Lower edge of local bin 0, if expanded.
    pub fn window_lower_bound(&self) -> Option<f64> {
        let b = self.bins()?;
        Some(b.i_offset as f64 * self.bin_width()?)
    }

    /// Global grid indices of the lowest and highest occupied bin.
    pub fn occupied_range(&self) -> Option<(i64, i64)> {
        self.bins().map(|b| (b.i_min, b.i_max))
    }

    /// Lower bin edges, for plotting or reporting. `None` unless expanded.
    pub fn grid(&self) -> Option<Array1<f64>> {
        let b = self.bins()?;
        let w = self.bin_width()?;
        Some(Array1::from_iter(
            (0..self.nbin()).map(|k| (b.i_offset + k as i64) as f64 * w),
        ))
    }

    /// Cumulative distribution function. `None` unless expanded.
    ///
    /// Non-decreasing; the last element equals 1 up to floating drift at
    /// the 1e-12 level. An implicit leading zero point is not included.
    pub fn cdf(&self) -> Option<Array1<f64>> {
        let b = self.bins()?;
        let mut acc = 0u64;
        Some(Array1::from_iter(b.counts.iter().map(|&c| {
            acc += c;
            acc as f64 / self.n_total as f64
        })))
    }

    fn bins(&self) -> Option<&Bins> {
        match &self.state {
            State::Expanded(b) => Some(b),
            _ => None,
        }
    }

    fn expect_bins(&self) -> Result<&Bins, HistError> {
        self.bins()
            .ok_or(HistError::Invariant("expected an expanded histogram"))
    }

    // =========================================================================
    // Resizing Operations
    // =========================================================================

    /// Double the bin width by pairwise-summing adjacent bins.
    ///
    /// Adjacency is defined on the global grid, not the local array: when
    /// the window offset is odd, local bin 0 has no partner in the window
    /// and stays alone. Only valid on an expanded histogram.
    pub fn enlarge(&mut self) -> Result<(), HistError> {
        let nbin = self.nbin();
        let b = match &mut self.state {
            State::Expanded(b) => b,
            _ => return Err(HistError::Invariant("enlarge on non-expanded histogram")),
        };

        let half = nbin / 2;
        let mut merged = vec![0u64; nbin];
        if b.i_offset.rem_euclid(2) == 1 {
            merged[0] = b.counts[0];
            for k in 1..half {
                merged[k] = b.counts[2 * k - 1] + b.counts[2 * k];
            }
            merged[half] = b.counts[nbin - 1];
        } else {
            for k in 0..half {
                merged[k] = b.counts[2 * k] + b.counts[2 * k + 1];
            }
        }
        b.counts = merged;
        b.l2_span += 1;
        b.i_offset = b.i_offset.div_euclid(2);
        b.i_min = b.i_min.div_euclid(2);
        b.i_max = b.i_max.div_euclid(2);
        self.check()
    }

    /// Shift the window right by `delta` grid bins.
    ///
    /// Fails if any occupied bin would be rotated out of the window; callers
    /// must only ever shift into a region proven empty at the vacated end.
    pub fn shift(&mut self, delta: i64) -> Result<(), HistError> {
        if delta == 0 {
            return Ok(());
        }
        let nbin = self.nbin();
        let b = match &mut self.state {
            State::Expanded(b) => b,
            _ => return Err(HistError::Invariant("shift on non-expanded histogram")),
        };
        if delta.unsigned_abs() as usize >= nbin {
            return Err(HistError::Invariant("shift into occupied bins"));
        }
        if delta > 0 {
            let d = delta as usize;
            invariant(
                b.counts[..d].iter().all(|&c| c == 0),
                "shift into occupied bins",
            )?;
            b.counts.rotate_left(d);
        } else {
            let d = (-delta) as usize;
            invariant(
                b.counts[nbin - d..].iter().all(|&c| c == 0),
                "shift into occupied bins",
            )?;
            b.counts.rotate_right(d);
        }
        b.i_offset += delta;
        self.check()
    }

    /// Convert a constant histogram to an expanded one at the given span,
    /// placing the entire count into the bin nearest the constant value and
    /// centering the window on it. No-op on non-constant histograms.
    pub fn expand(&mut self, l2_span: i32) -> Result<(), HistError> {
        let v = match self.state {
            State::Constant(v) => v,
            _ => return Ok(()),
        };
        let nbin = self.nbin();
        let i_min = grid_floor(v, self.l2_nbin as i32 - l2_span)?;
        let mut counts = vec![0u64; nbin];
        counts[nbin / 2] = self.n_total;
        self.state = State::Expanded(Bins {
            l2_span,
            i_offset: i_min - (nbin as i64) / 2,
            i_min,
            i_max: i_min,
            counts,
        });
        self.check()
    }

    // =========================================================================
    // Alignment and Merge
    // =========================================================================

    /// Bring two histograms to the same span and window offset so their bin
    /// arrays can be added or compared directly.
    ///
    /// Both operands may be mutated. Afterwards either both are expanded
    /// with equal offsets, or both are constant with the same value. Empty
    /// histograms cannot be aligned; [`Hist::merge`] handles them before
    /// calling this.
    pub fn align(&mut self, other: &mut Hist) -> Result<(), HistError> {
        invariant(
            !self.is_empty() && !other.is_empty(),
            "cannot align empty histograms",
        )?;
        if self.l2_nbin != other.l2_nbin {
            return Err(HistError::BinCountMismatch(self.l2_nbin, other.l2_nbin));
        }
        let nbin = self.nbin() as i64;

        match (&self.state, &other.state) {
            (State::Constant(a), State::Constant(b)) => {
                if a == b {
                    return Ok(());
                }
                // Minimal span that can represent the difference.
                let l2_span = (a - b).abs().log2().ceil() as i32;
                self.expand(l2_span)?;
                other.expand(l2_span)?;
            }
            (State::Constant(_), State::Expanded(b)) => {
                let l2_span = b.l2_span;
                self.expand(l2_span)?;
            }
            (State::Expanded(a), State::Constant(_)) => {
                let l2_span = a.l2_span;
                other.expand(l2_span)?;
            }
            (State::Expanded(_), State::Expanded(_)) => {}
            // Empty operands were rejected above.
            (State::Empty, _) | (_, State::Empty) => {
                return Err(HistError::Invariant("cannot align empty histograms"));
            }
        }

        // Enlarge the finer histogram until both spans match.
        while self.expect_bins()?.l2_span < other.expect_bins()?.l2_span {
            self.enlarge()?;
        }
        while other.expect_bins()?.l2_span < self.expect_bins()?.l2_span {
            other.enlarge()?;
        }

        // Enlarge both until the union of occupied ranges fits the window.
        loop {
            let (a, b) = (self.expect_bins()?, other.expect_bins()?);
            if a.i_max.max(b.i_max) - a.i_min.min(b.i_min) < nbin {
                break;
            }
            self.enlarge()?;
            other.enlarge()?;
        }

        let (a, b) = (self.expect_bins()?, other.expect_bins()?);
        if a.i_offset <= b.i_min && b.i_max < a.i_offset + nbin {
            // Our window already contains the other's occupied range.
            let delta = a.i_offset - b.i_offset;
            other.shift(delta)?;
        } else {
            let i_offset_new =
                (a.i_min.min(b.i_min) + a.i_max.max(b.i_max) + 1 - nbin).div_euclid(2);
            let delta_self = i_offset_new - a.i_offset;
            let delta_other = i_offset_new - b.i_offset;
            self.shift(delta_self)?;
            other.shift(delta_other)?;
        }

        let (a, b) = (self.expect_bins()?, other.expect_bins()?);
        invariant(a.i_offset == b.i_offset, "alignment left offsets unequal")
    }

    /// Merge the counts of `other` into `self`, returning the combined
    /// histogram.
    ///
    /// Takes both operands by value: alignment may resize either one, and
    /// consuming them makes the surviving object unambiguous.
    pub fn merge(mut self, mut other: Hist) -> Result<Hist, HistError> {
        if other.is_empty() {
            return Ok(self);
        }
        if self.is_empty() {
            return Ok(other);
        }

        self.align(&mut other)?;

        match (&mut self.state, &other.state) {
            (State::Expanded(a), State::Expanded(b)) => {
                for (c, &d) in a.counts.iter_mut().zip(&b.counts) {
                    *c += d;
                }
                a.i_min = a.i_min.min(b.i_min);
                a.i_max = a.i_max.max(b.i_max);
            }
            (State::Constant(a), State::Constant(b)) => {
                invariant(a == b, "aligned constants differ")?;
            }
            _ => return Err(HistError::Invariant("alignment left mismatched states")),
        }
        self.n_total += other.n_total;
        self.check()?;
        Ok(self)
    }

    // =========================================================================
    // Invariants
    // =========================================================================

    /// Validate internal state. Called after every mutating operation.
    fn check(&self) -> Result<(), HistError> {
        match &self.state {
            State::Empty => invariant(self.n_total == 0, "empty histogram with samples"),
            State::Constant(v) => {
                invariant(self.n_total > 0, "constant histogram without samples")?;
                invariant(v.is_finite(), "constant histogram with non-finite value")
            }
            State::Expanded(b) => {
                let nbin = self.nbin() as i64;
                let istart = b.i_min - b.i_offset;
                let istop = b.i_max - b.i_offset;
                debug_assert!(
                    (0..nbin).contains(&istart) && (0..nbin).contains(&istop),
                    "occupied range [{}, {}] outside window at offset {}",
                    b.i_min,
                    b.i_max,
                    b.i_offset
                );
                invariant(
                    (0..nbin).contains(&istart) && (0..nbin).contains(&istop),
                    "occupied range outside window",
                )?;
                let (istart, istop) = (istart as usize, istop as usize);
                invariant(b.counts[istart] > 0, "lowest occupied bin is empty")?;
                invariant(b.counts[istop] > 0, "highest occupied bin is empty")?;
                invariant(
                    b.counts[..istart].iter().all(|&c| c == 0),
                    "counts below occupied range",
                )?;
                invariant(
                    b.counts[istop + 1..].iter().all(|&c| c == 0),
                    "counts above occupied range",
                )?;
                invariant(
                    b.counts.iter().sum::<u64>() == self.n_total,
                    "bin counts do not sum to total",
                )
            }
        }
    }
}

/// Equality via alignment of cloned temporaries; the originals are never
/// mutated. Debug/test oriented - this allocates.
impl PartialEq for Hist {
    fn eq(&self, other: &Self) -> bool {
        if self.l2_nbin != other.l2_nbin {
            return false;
        }
        if self.is_empty() && other.is_empty() {
            return true;
        }
        if self.n_total != other.n_total {
            return false;
        }
        if let (State::Constant(a), State::Constant(b)) = (&self.state, &other.state) {
            return a == b;
        }
        let mut a = self.clone();
        let mut b = other.clone();
        if a.align(&mut b).is_err() {
            return false;
        }
        match (a.bins(), b.bins()) {
            (Some(a), Some(b)) => a.counts == b.counts,
            _ => false,
        }
    }
}

impl fmt::Display for Hist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Empty => write!(f, "empty histogram"),
            State::Constant(v) => write!(
                f,
                "histogram of {} points with constant value {v}",
                self.n_total
            ),
            State::Expanded(b) => write!(
                f,
                "histogram of {} points, span = {}, offset = {}",
                self.n_total,
                f64::exp2(b.l2_span as f64),
                b.i_offset as f64 * f64::exp2((b.l2_span - self.l2_nbin as i32) as f64),
            ),
        }
    }
}
