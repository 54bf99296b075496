//! Per-channel accumulation of segment histograms.

use std::collections::HashMap;
use std::mem;

use ndarray::Array1;

use crate::data::{ChannelDescriptor, DataSource, FetchError, Segment, VetoTracker};
use crate::hist::{Hist, HistError};
use crate::transform::{ChainFactory, TransformChain};

/// A channel-fatal error: the channel's entire accumulated state is
/// discarded, for every transformation and label, and the channel is never
/// processed again in this run.
#[derive(Debug, thiserror::Error)]
pub enum ChannelFault {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Hist(#[from] HistError),
    /// A trigger mapped outside the segment's sample array; this indicates
    /// a sample-rate/segment mismatch and is never silently clipped.
    #[error("trigger index {index} outside sample array of length {len}")]
    TriggerIndex { index: i64, len: usize },
    /// The archive returned a different number of samples than the veto
    /// mask was sized for.
    #[error("veto mask length {mask_len} does not match sample count {data_len}")]
    MaskMismatch { mask_len: usize, data_len: usize },
}

/// One channel's accumulation state: transformation chains (stateful across
/// segments) and the running cumulative histograms, one auxiliary histogram
/// per chain plus one trigger histogram per (chain, label).
pub struct ChannelState {
    descriptor: ChannelDescriptor,
    l2_nbin: u32,
    chains: Vec<TransformChain>,
    aux: Vec<Hist>,
    trig: Vec<HashMap<String, Hist>>,
    fault: Option<ChannelFault>,
}

impl ChannelState {
    pub fn new(
        descriptor: ChannelDescriptor,
        chain_factories: &[ChainFactory],
        labels: &[String],
        l2_nbin: u32,
    ) -> Self {
        let chains: Vec<TransformChain> = chain_factories.iter().map(|f| f()).collect();
        let aux = chains.iter().map(|_| Hist::empty(l2_nbin)).collect();
        let trig = chains
            .iter()
            .map(|_| {
                labels
                    .iter()
                    .map(|l| (l.clone(), Hist::empty(l2_nbin)))
                    .collect()
            })
            .collect();
        ChannelState {
            descriptor,
            l2_nbin,
            chains,
            aux,
            trig,
            fault: None,
        }
    }

    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The fault that killed this channel, if any.
    pub fn fault(&self) -> Option<&ChannelFault> {
        self.fault.as_ref()
    }

    /// Drop transformation state carried across segments (segment gap).
    pub fn reset_chains(&mut self) {
        for chain in &mut self.chains {
            chain.reset();
        }
    }

    /// Advance this channel by one segment. A previously faulted channel is
    /// left untouched; a new fault is recorded and poisons the channel.
    pub fn run_segment(
        &mut self,
        source: &dyn DataSource,
        segment: Segment,
        segment_index: usize,
        vetoes: &VetoTracker,
        trigger_indices: &HashMap<String, Vec<i64>>,
    ) {
        if self.fault.is_some() {
            return;
        }
        if let Err(fault) = self.process(source, segment, segment_index, vetoes, trigger_indices) {
            self.fault = Some(fault);
        }
    }

    fn process(
        &mut self,
        source: &dyn DataSource,
        segment: Segment,
        segment_index: usize,
        vetoes: &VetoTracker,
        trigger_indices: &HashMap<String, Vec<i64>>,
    ) -> Result<(), ChannelFault> {
        let x = source.fetch_samples(&self.descriptor.name, segment.start, segment.end)?;

        let aux_mask = vetoes.aux_mask(segment_index);
        if aux_mask.len() != x.len() {
            return Err(ChannelFault::MaskMismatch {
                mask_len: aux_mask.len(),
                data_len: x.len(),
            });
        }

        for ci in 0..self.chains.len() {
            let xt = self.chains[ci].apply(x.view());

            // Segment-local auxiliary histogram, veto-masked, with the
            // cumulative histogram as span hint.
            let kept: Array1<f64> = xt
                .iter()
                .zip(aux_mask)
                .filter(|&(_, &vetoed)| !vetoed)
                .map(|(&v, _)| v)
                .collect();
            let seg_aux = Hist::from_samples(kept.view(), self.l2_nbin, Some(&self.aux[ci]))?;

            // Trigger-indexed subpopulations, hinted by the fresh auxiliary
            // histogram so the two align cheaply downstream.
            for (label, indices) in trigger_indices {
                let trig_mask = vetoes.trigger_mask(label, segment_index);
                let mut selected = Vec::with_capacity(indices.len());
                for (k, &index) in indices.iter().enumerate() {
                    if index < 0 || index as usize >= xt.len() {
                        return Err(ChannelFault::TriggerIndex {
                            index,
                            len: xt.len(),
                        });
                    }
                    if !trig_mask.get(k).copied().unwrap_or(false) {
                        selected.push(xt[index as usize]);
                    }
                }
                let seg_trig = Hist::from_samples(
                    Array1::from(selected).view(),
                    self.l2_nbin,
                    Some(&seg_aux),
                )?;

                let l2_nbin = self.l2_nbin;
                let slot = self.trig[ci]
                    .entry(label.clone())
                    .or_insert_with(|| Hist::empty(l2_nbin));
                let cum = mem::replace(slot, Hist::empty(l2_nbin));
                *slot = cum.merge(seg_trig)?;
            }

            let cum = mem::replace(&mut self.aux[ci], Hist::empty(self.l2_nbin));
            self.aux[ci] = cum.merge(seg_aux)?;
        }
        Ok(())
    }

    /// Tear down into `(chain label, cumulative aux, per-label trigger
    /// histograms)` triples for the final mapping.
    pub fn into_histograms(self) -> (ChannelDescriptor, Vec<(String, Hist, HashMap<String, Hist>)>) {
        let ChannelState {
            descriptor,
            chains,
            aux,
            trig,
            ..
        } = self;
        let mut out = Vec::with_capacity(chains.len());
        for ((chain, aux), trig) in chains.iter().zip(aux).zip(trig) {
            out.push((chain.label().to_string(), aux, trig));
        }
        (descriptor, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::trigger_index;
    use crate::data::Trigger;
    use crate::transform::TransformChain;

    struct FlatArchive {
        rate: f64,
    }

    impl DataSource for FlatArchive {
        fn available_channels(&self, _: f64, _: &[&str]) -> Vec<ChannelDescriptor> {
            vec![ChannelDescriptor::new("X1:TEST", self.rate)]
        }

        fn fetch_samples(
            &self,
            _channel: &str,
            start: f64,
            end: f64,
        ) -> Result<Array1<f64>, FetchError> {
            let n = ((end - start) * self.rate).round() as usize;
            // ramp so aux and trigger populations differ
            Ok(Array1::from_iter((0..n).map(|i| i as f64)))
        }
    }

    fn raw_factory() -> Vec<ChainFactory> {
        vec![Box::new(TransformChain::raw)]
    }

    fn state(labels: &[&str]) -> ChannelState {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        ChannelState::new(
            ChannelDescriptor::new("X1:TEST", 50.0),
            &raw_factory(),
            &labels,
            6,
        )
    }

    #[test]
    fn accumulates_aux_and_trigger_histograms() {
        let source = FlatArchive { rate: 50.0 };
        let segment = Segment::new(1000.0, 1010.0);
        let labels = vec!["glitch".to_string()];
        let triggers = vec![Trigger::new(1000.5, "glitch"), Trigger::new(1004.0, "glitch")];
        let vetoes = VetoTracker::new(&[segment], 50.0, &triggers, &labels);

        let indices: HashMap<String, Vec<i64>> = [(
            "glitch".to_string(),
            triggers
                .iter()
                .map(|t| trigger_index(t.time, segment.start, 50.0))
                .collect(),
        )]
        .into();

        let mut st = state(&["glitch"]);
        st.run_segment(&source, segment, 0, &vetoes, &indices);
        assert!(st.fault().is_none());

        let (_, hists) = st.into_histograms();
        let (label, aux, trig) = &hists[0];
        assert_eq!(label, "");
        assert_eq!(aux.total_count(), 500);
        assert_eq!(trig["glitch"].total_count(), 2);
    }

    #[test]
    fn out_of_range_trigger_index_faults_channel() {
        let source = FlatArchive { rate: 50.0 };
        let segment = Segment::new(1000.0, 1010.0);
        let labels = vec!["glitch".to_string()];
        let vetoes = VetoTracker::new(&[segment], 50.0, &[], &labels);

        let indices: HashMap<String, Vec<i64>> =
            [("glitch".to_string(), vec![5000])].into();

        let mut st = state(&["glitch"]);
        st.run_segment(&source, segment, 0, &vetoes, &indices);
        assert!(matches!(
            st.fault(),
            Some(ChannelFault::TriggerIndex { index: 5000, .. })
        ));
    }

    #[test]
    fn mask_length_mismatch_faults_channel() {
        let source = FlatArchive { rate: 50.0 };
        let segment = Segment::new(1000.0, 1010.0);
        // masks sized for 25 Hz, data arrives at 50 Hz
        let vetoes = VetoTracker::new(&[segment], 25.0, &[], &[]);

        let mut st = state(&[]);
        st.run_segment(&source, segment, 0, &vetoes, &HashMap::new());
        assert!(matches!(
            st.fault(),
            Some(ChannelFault::MaskMismatch {
                mask_len: 250,
                data_len: 500
            })
        ));
    }

    #[test]
    fn faulted_channel_is_not_processed_again() {
        let source = FlatArchive { rate: 50.0 };
        let segment = Segment::new(1000.0, 1010.0);
        let vetoes = VetoTracker::new(&[segment], 50.0, &[], &[]);
        let bad: HashMap<String, Vec<i64>> = [("glitch".to_string(), vec![-1])].into();

        let mut st = state(&["glitch"]);
        st.run_segment(&source, segment, 0, &vetoes, &bad);
        assert!(st.fault().is_some());

        // a later good segment must not clear the fault or accumulate
        st.run_segment(&source, segment, 0, &vetoes, &HashMap::new());
        assert!(st.fault().is_some());
        let (_, hists) = st.into_histograms();
        assert_eq!(hists[0].1.total_count(), 0);
    }

    #[test]
    fn veto_excludes_masked_positions() {
        struct VetoHalf;
        impl crate::data::VetoPolicy for VetoHalf {
            fn veto_aux(&self, _i: usize, mask: &mut [bool]) {
                for v in mask.iter_mut().take(250) {
                    *v = true;
                }
            }
        }

        let source = FlatArchive { rate: 50.0 };
        let segment = Segment::new(1000.0, 1010.0);
        let mut vetoes = VetoTracker::new(&[segment], 50.0, &[], &[]);
        vetoes.apply_policy(&VetoHalf);

        let mut st = state(&[]);
        st.run_segment(&source, segment, 0, &vetoes, &HashMap::new());
        assert!(st.fault().is_none());
        let (_, hists) = st.into_histograms();
        assert_eq!(hists[0].1.total_count(), 250);
    }
}
