//! The run controller: segments x channels orchestration.

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::Serialize;

use crate::data::{
    iter_with_gaps, trigger_index, DataSource, NoVeto, Segment, Trigger, TriggerSource,
    VetoPolicy, VetoTracker, DEFAULT_EXCLUDE_PATTERNS,
};
use crate::hist::Hist;
use crate::transform::{ChainFactory, TransformChain};
use crate::utils::run_with_threads;

use super::accumulator::ChannelState;

/// Structural problems that abort a run before any accumulation starts.
/// Everything that goes wrong later is per-channel ([`super::ChannelFault`])
/// and only shrinks the channel set.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("no triggers found in [{start}, {end})")]
    NoTriggers { start: f64, end: f64 },
    #[error("no channels available after exclusion")]
    NoChannels,
    #[error("segment {index} is not ordered after its predecessor")]
    UnorderedSegments { index: usize },
}

// =============================================================================
// Run Parameters
// =============================================================================

/// Run configuration.
///
/// Thread count semantics follow [`run_with_threads`]: 0 = auto (available
/// CPUs minus one), 1 = sequential, n = exactly n workers.
pub struct RunParams {
    /// Log2 of the histogram bin count, identical for every histogram in
    /// the run so they stay mergeable.
    pub l2_nbin: u32,
    /// Target sample rate in Hz; the archive is expected to deliver every
    /// channel resampled to this rate.
    pub f_target: f64,
    pub n_threads: usize,
    /// Wildcard patterns for channels to leave out of the run.
    pub exclude_patterns: Vec<String>,
    /// One factory per transformation combination; each channel gets its
    /// own independently-stateful chain from each factory.
    pub chain_factories: Vec<ChainFactory>,
    /// How veto masks get populated. The default vetoes nothing.
    pub veto_policy: Box<dyn VetoPolicy + Send + Sync>,
}

impl Default for RunParams {
    fn default() -> Self {
        RunParams {
            l2_nbin: 12,
            f_target: 50.0,
            n_threads: 0,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chain_factories: vec![Box::new(TransformChain::raw)],
            veto_policy: Box::new(NoVeto),
        }
    }
}

impl RunParams {
    pub fn with_l2_nbin(mut self, l2_nbin: u32) -> Self {
        self.l2_nbin = l2_nbin;
        self
    }

    pub fn with_target_rate(mut self, f_target: f64) -> Self {
        self.f_target = f_target;
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = patterns;
        self
    }

    pub fn with_chains(mut self, chain_factories: Vec<ChainFactory>) -> Self {
        self.chain_factories = chain_factories;
        self
    }

    pub fn with_veto_policy(mut self, policy: Box<dyn VetoPolicy + Send + Sync>) -> Self {
        self.veto_policy = policy;
        self
    }
}

// =============================================================================
// Run Output
// =============================================================================

/// Key into the finished histogram mapping. The cumulative auxiliary
/// histogram of a (channel, transform) pair has `label == None`; each
/// trigger subpopulation carries its glitch class label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HistKey {
    pub channel: String,
    pub transform: String,
    pub label: Option<String>,
}

impl HistKey {
    pub fn aux(channel: impl Into<String>, transform: impl Into<String>) -> Self {
        HistKey {
            channel: channel.into(),
            transform: transform.into(),
            label: None,
        }
    }

    pub fn trigger(
        channel: impl Into<String>,
        transform: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        HistKey {
            channel: channel.into(),
            transform: transform.into(),
            label: Some(label.into()),
        }
    }
}

/// The finished histogram mapping for all surviving channels.
#[derive(Default)]
pub struct HistogramSet {
    map: HashMap<HistKey, Hist>,
}

impl HistogramSet {
    pub fn get(&self, key: &HistKey) -> Option<&Hist> {
        self.map.get(key)
    }

    /// Cumulative auxiliary histogram for one (channel, transform) pair.
    pub fn get_aux(&self, channel: &str, transform: &str) -> Option<&Hist> {
        self.map.get(&HistKey::aux(channel, transform))
    }

    /// Cumulative trigger histogram for one (channel, transform, label).
    pub fn get_trigger(&self, channel: &str, transform: &str, label: &str) -> Option<&Hist> {
        self.map.get(&HistKey::trigger(channel, transform, label))
    }

    /// Sorted names of channels present in the mapping.
    pub fn channels(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.map.keys().map(|k| k.channel.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HistKey, &Hist)> {
        self.map.iter()
    }

    fn insert(&mut self, key: HistKey, hist: Hist) {
        self.map.insert(key, hist);
    }
}

/// Counters describing what a run touched and kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub channels_found: usize,
    pub channels_survived: usize,
    pub channels_discarded: usize,
    pub segments_processed: usize,
    pub segments_skipped: usize,
    pub triggers: usize,
}

pub struct RunOutput {
    pub histograms: HistogramSet,
    pub summary: RunSummary,
}

// =============================================================================
// Run Controller
// =============================================================================

/// Drives the full accumulation: per segment, every live channel fetches,
/// transforms, histograms, and merges; segments run strictly in time order
/// while channels within a segment run in parallel. Each worker owns its
/// channel's state exclusively, so cumulative merges never contend.
pub struct RunController<'a> {
    source: &'a dyn DataSource,
    triggers: &'a dyn TriggerSource,
    params: RunParams,
}

impl<'a> RunController<'a> {
    pub fn new(
        source: &'a dyn DataSource,
        triggers: &'a dyn TriggerSource,
        params: RunParams,
    ) -> Self {
        RunController {
            source,
            triggers,
            params,
        }
    }

    /// Run the accumulation over the given segments.
    ///
    /// Segments must be disjoint and in increasing time order. Channels
    /// that fault along the way are dropped wholesale; the run completes
    /// with whatever survives.
    pub fn run(&self, segments: &[Segment]) -> Result<RunOutput, RunError> {
        for (i, pair) in segments.windows(2).enumerate() {
            if pair[1].start < pair[0].end {
                return Err(RunError::UnorderedSegments { index: i + 1 });
            }
        }

        let (start, end) = match (segments.first(), segments.last()) {
            (Some(first), Some(last)) => (first.start, last.end),
            _ => return Err(RunError::NoTriggers { start: 0.0, end: 0.0 }),
        };

        let triggers = self.triggers.triggers_in_range(start, end);
        if triggers.is_empty() {
            return Err(RunError::NoTriggers { start, end });
        }
        let labels = self.triggers.labels();

        let patterns: Vec<&str> = self.params.exclude_patterns.iter().map(|s| s.as_str()).collect();
        let channels = self.source.available_channels(start, &patterns);
        if channels.is_empty() {
            return Err(RunError::NoChannels);
        }
        info!(
            "run [{start}, {end}): {} channels, {} triggers, {} labels",
            channels.len(),
            triggers.len(),
            labels.len()
        );

        let mut vetoes = VetoTracker::new(segments, self.params.f_target, &triggers, &labels);
        vetoes.apply_policy(self.params.veto_policy.as_ref());

        let channels_found = channels.len();
        let mut states: Vec<ChannelState> = channels
            .into_iter()
            .map(|descriptor| {
                ChannelState::new(
                    descriptor,
                    &self.params.chain_factories,
                    &labels,
                    self.params.l2_nbin,
                )
            })
            .collect();

        let source = self.source;
        let f_target = self.params.f_target;
        let (processed, skipped) = run_with_threads(self.params.n_threads, |parallelism| {
            let mut processed = 0usize;
            let mut skipped = 0usize;
            for (index, segment, is_gap) in iter_with_gaps(segments) {
                if is_gap {
                    for state in states.iter_mut() {
                        state.reset_chains();
                    }
                }

                let seg_triggers: Vec<&Trigger> =
                    triggers.iter().filter(|t| segment.contains(t.time)).collect();
                if seg_triggers.is_empty() {
                    debug!(
                        "segment {index} [{}, {}) has no triggers, skipping",
                        segment.start, segment.end
                    );
                    skipped += 1;
                    // the skipped samples break filter continuity
                    for state in states.iter_mut() {
                        state.reset_chains();
                    }
                    continue;
                }

                // Per-label indices in the same trigger order the veto
                // masks were sized with.
                let mut indices: HashMap<String, Vec<i64>> = HashMap::new();
                for label in &labels {
                    let idx: Vec<i64> = seg_triggers
                        .iter()
                        .filter(|t| t.label == *label)
                        .map(|t| trigger_index(t.time, segment.start, f_target))
                        .collect();
                    indices.insert(label.clone(), idx);
                }

                parallelism.maybe_par_for_each(&mut states[..], |state| {
                    state.run_segment(source, segment, index, &vetoes, &indices);
                });
                processed += 1;
            }
            (processed, skipped)
        });

        let mut histograms = HistogramSet::default();
        let mut survived = 0usize;
        let mut discarded = 0usize;
        for state in states {
            if let Some(fault) = state.fault() {
                warn!("discarding channel {}: {fault}", state.name());
                discarded += 1;
                continue;
            }
            survived += 1;
            let (descriptor, per_chain) = state.into_histograms();
            for (transform, aux, trig) in per_chain {
                histograms.insert(HistKey::aux(&descriptor.name, &transform), aux);
                for (label, hist) in trig {
                    histograms.insert(HistKey::trigger(&descriptor.name, &transform, label), hist);
                }
            }
        }
        info!("run finished: {survived} channels survived, {discarded} discarded");

        Ok(RunOutput {
            histograms,
            summary: RunSummary {
                channels_found,
                channels_survived: survived,
                channels_discarded: discarded,
                segments_processed: processed,
                segments_skipped: skipped,
                triggers: triggers.len(),
            },
        })
    }
}
