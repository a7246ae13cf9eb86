//! Holding area for samples awaiting submission.

use crate::sample::Sample;

/// Append-only buffer of received samples, drained by flushes.
///
/// Order is preserved on both sides of a drain: drained samples come out in
/// arrival order and the retained remainder keeps its relative order.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<Sample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sample and returns the resulting length.
    pub fn push(&mut self, sample: Sample) -> usize {
        self.samples.push(sample);
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Removes and returns every sample that is ready: at least as old as
    /// `flush_before` and, when a plugin filter is given, dispatched by
    /// that plugin. Everything else stays buffered.
    pub fn take_ready(&mut self, flush_before: f64, source_filter: Option<&str>) -> Vec<Sample> {
        let mut ready = Vec::new();
        let mut retained = Vec::new();
        for sample in self.samples.drain(..) {
            let matches = source_filter.is_none_or(|plugin| sample.plugin == plugin);
            if matches && sample.time <= flush_before {
                ready.push(sample);
            } else {
                retained.push(sample);
            }
        }
        self.samples = retained;
        ready
    }
}
