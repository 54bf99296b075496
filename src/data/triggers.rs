//! Glitch-trigger interface and trigger-index arithmetic.

use serde::Serialize;

/// One noise-glitch trigger: a time and the glitch class it was tagged with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    /// GPS-style time of the trigger.
    pub time: f64,
    /// Glitch class label, e.g. `"Scattered_Light"`.
    pub label: String,
}

impl Trigger {
    pub fn new(time: f64, label: impl Into<String>) -> Self {
        Trigger {
            time,
            label: label.into(),
        }
    }
}

/// The trigger pipeline collaborator (Omicron, classifier CSV dumps, ...).
pub trait TriggerSource {
    /// Triggers with `start <= time < end`, in increasing time order.
    fn triggers_in_range(&self, start: f64, end: f64) -> Vec<Trigger>;

    /// All glitch class labels this source can produce.
    fn labels(&self) -> Vec<String>;
}

/// Sample index of a trigger within a segment's sample array.
///
/// May be negative or past the array end when the trigger falls outside the
/// segment; callers must treat out-of-range indices as a channel failure,
/// never clip them.
#[inline]
pub fn trigger_index(trigger_time: f64, segment_start: f64, sample_rate: f64) -> i64 {
    ((trigger_time - segment_start) * sample_rate).floor() as i64
}
