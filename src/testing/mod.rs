//! In-memory collaborators for tests: a deterministic sample archive and a
//! list-backed trigger source.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use ndarray::Array1;

use crate::data::{is_excluded, ChannelDescriptor, DataSource, FetchError, Trigger, TriggerSource};

/// An archive serving synthetic but fully deterministic samples.
///
/// Each channel's signal is a sinusoid whose frequency and phase derive from
/// the channel name, so distinct channels always see distinct data and
/// re-fetching a range always returns the same samples. Failures can be
/// injected per channel from a given time onward.
pub struct MemoryArchive {
    sample_rate: f64,
    channels: Vec<ChannelDescriptor>,
    fail_from: HashMap<String, f64>,
}

impl MemoryArchive {
    pub fn new(sample_rate: f64) -> Self {
        MemoryArchive {
            sample_rate,
            channels: Vec::new(),
            fail_from: HashMap::new(),
        }
    }

    pub fn add_channel(&mut self, name: impl Into<String>) {
        self.channels
            .push(ChannelDescriptor::new(name, self.sample_rate));
    }

    /// Make every fetch for `channel` starting at or after `time` fail with
    /// a decode error.
    pub fn fail_from(&mut self, channel: impl Into<String>, time: f64) {
        self.fail_from.insert(channel.into(), time);
    }
}

fn name_seed(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

impl DataSource for MemoryArchive {
    fn available_channels(&self, _as_of: f64, exclude_patterns: &[&str]) -> Vec<ChannelDescriptor> {
        self.channels
            .iter()
            .filter(|c| !is_excluded(&c.name, exclude_patterns))
            .cloned()
            .collect()
    }

    fn fetch_samples(&self, channel: &str, start: f64, end: f64) -> Result<Array1<f64>, FetchError> {
        if let Some(&from) = self.fail_from.get(channel) {
            if start >= from {
                return Err(FetchError::Decode(format!(
                    "injected failure for {channel} at {start}"
                )));
            }
        }
        if !self.channels.iter().any(|c| c.name == channel) {
            return Err(FetchError::NotFound);
        }

        let seed = name_seed(channel);
        let omega = 0.5 + (seed % 8) as f64 * 0.25;
        let phase = (seed % 628) as f64 / 100.0;
        let n = ((end - start) * self.sample_rate).round() as usize;
        Ok(Array1::from_iter((0..n).map(|i| {
            let t = start + i as f64 / self.sample_rate;
            (omega * t + phase).sin()
        })))
    }
}

/// A trigger source backed by a plain list.
pub struct TriggerList {
    triggers: Vec<Trigger>,
}

impl TriggerList {
    pub fn new(mut triggers: Vec<Trigger>) -> Self {
        triggers.sort_by(|a, b| a.time.total_cmp(&b.time));
        TriggerList { triggers }
    }
}

impl TriggerSource for TriggerList {
    fn triggers_in_range(&self, start: f64, end: f64) -> Vec<Trigger> {
        self.triggers
            .iter()
            .filter(|t| start <= t.time && t.time < end)
            .cloned()
            .collect()
    }

    fn labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        for t in &self.triggers {
            if !labels.contains(&t.label) {
                labels.push(t.label.clone());
            }
        }
        labels
    }
}
