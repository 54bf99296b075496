//! Time segments, gap detection, and veto masks.

use std::collections::HashMap;

use log::info;
use serde::Serialize;

use super::triggers::Trigger;

/// A half-open time interval `[start, end)` in GPS-style seconds.
///
/// Segments handed to the run controller must be disjoint and given in
/// increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        debug_assert!(start < end, "segment must have positive duration");
        Segment { start, end }
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Number of samples this segment covers at the given sample rate.
    #[inline]
    pub fn expected_samples(&self, sample_rate: f64) -> usize {
        (self.duration() * sample_rate).round() as usize
    }

    #[inline]
    pub fn contains(&self, t: f64) -> bool {
        self.start <= t && t < self.end
    }
}

/// Iterator over segments yielding `(index, segment, is_gap)`.
///
/// `is_gap` is true exactly when the previous segment's end does not equal
/// this segment's start. Stateful transformations are reset on gaps.
pub struct SegmentIter<'a> {
    segments: &'a [Segment],
    index: usize,
    prev_end: Option<f64>,
}

/// Walk `segments` in order, flagging gaps between consecutive segments.
pub fn iter_with_gaps(segments: &[Segment]) -> SegmentIter<'_> {
    SegmentIter {
        segments,
        index: 0,
        prev_end: None,
    }
}

impl Iterator for SegmentIter<'_> {
    type Item = (usize, Segment, bool);

    fn next(&mut self) -> Option<Self::Item> {
        let segment = *self.segments.get(self.index)?;
        let index = self.index;
        self.index += 1;

        let is_gap = match self.prev_end {
            Some(prev_end) if prev_end != segment.start => {
                info!("gap between segments from {prev_end} to {}", segment.start);
                true
            }
            _ => false,
        };
        self.prev_end = Some(segment.end);
        Some((index, segment, is_gap))
    }
}

// =============================================================================
// Veto Masks
// =============================================================================

/// Pluggable veto population policy.
///
/// The engine allocates all-false masks; whether any position ever gets
/// vetoed is a policy decision belonging to the statistics layer. The
/// default [`NoVeto`] policy leaves every mask untouched.
pub trait VetoPolicy {
    /// Mark auxiliary sample positions to exclude for one segment.
    fn veto_aux(&self, _segment_index: usize, _mask: &mut [bool]) {}

    /// Mark trigger positions to exclude for one (label, segment) pair.
    fn veto_triggers(&self, _label: &str, _segment_index: usize, _mask: &mut [bool]) {}
}

/// The "nothing pre-vetoed" policy.
pub struct NoVeto;

impl VetoPolicy for NoVeto {}

/// Per-segment boolean exclusion masks, shared read-only across channels.
///
/// One auxiliary mask per segment (length = expected sample count at the
/// target rate) and, per trigger label, one mask per segment (length = that
/// label's trigger count in the segment). A position once vetoed stays
/// vetoed for that segment.
pub struct VetoTracker {
    aux: Vec<Vec<bool>>,
    trig: HashMap<String, Vec<Vec<bool>>>,
}

impl VetoTracker {
    /// Allocate all-false masks for every segment and trigger label.
    pub fn new(
        segments: &[Segment],
        sample_rate: f64,
        triggers: &[Trigger],
        labels: &[String],
    ) -> Self {
        let aux = segments
            .iter()
            .map(|s| vec![false; s.expected_samples(sample_rate)])
            .collect();

        let trig = labels
            .iter()
            .map(|label| {
                let masks = segments
                    .iter()
                    .map(|s| {
                        let n = triggers
                            .iter()
                            .filter(|t| t.label == *label && s.contains(t.time))
                            .count();
                        vec![false; n]
                    })
                    .collect();
                (label.clone(), masks)
            })
            .collect();

        VetoTracker { aux, trig }
    }

    /// Let a policy flip veto bits. Masks only ever accumulate vetoes.
    pub fn apply_policy(&mut self, policy: &dyn VetoPolicy) {
        for (i, mask) in self.aux.iter_mut().enumerate() {
            policy.veto_aux(i, mask);
        }
        for (label, masks) in self.trig.iter_mut() {
            for (i, mask) in masks.iter_mut().enumerate() {
                policy.veto_triggers(label, i, mask);
            }
        }
    }

    /// Auxiliary veto mask for one segment.
    pub fn aux_mask(&self, segment_index: usize) -> &[bool] {
        &self.aux[segment_index]
    }

    /// Trigger veto mask for one (label, segment) pair. Empty for unknown
    /// labels.
    pub fn trigger_mask(&self, label: &str, segment_index: usize) -> &[bool] {
        self.trig
            .get(label)
            .map(|masks| masks[segment_index].as_slice())
            .unwrap_or(&[])
    }
}
