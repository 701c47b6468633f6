//! Thread-safe store of scenario outcomes and device samples.
//!
//! Outcomes and samples sit behind separate `parking_lot` mutexes so the
//! sampler never contends with workers. Summaries copy a snapshot and drop
//! the locks before doing any sorting.

#![allow(missing_docs)]

use parking_lot::Mutex;

use crate::core::model::{ActionOutcome, DeviceSample};
use crate::metrics::summary::AggregatedSummary;

/// Point-in-time copy of everything recorded so far.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub outcomes: Vec<ActionOutcome>,
    pub samples: Vec<DeviceSample>,
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    outcomes: Mutex<Vec<ActionOutcome>>,
    samples: Mutex<Vec<DeviceSample>>,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: ActionOutcome) {
        self.outcomes.lock().push(outcome);
    }

    pub fn record_sample(&self, sample: DeviceSample) {
        self.samples.lock().push(sample);
    }

    #[must_use]
    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().len()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let outcomes = self.outcomes.lock().clone();
        let samples = self.samples.lock().clone();
        MetricsSnapshot { outcomes, samples }
    }

    /// Summary of everything recorded up to now.
    #[must_use]
    pub fn summary(&self) -> AggregatedSummary {
        let snapshot = self.snapshot();
        AggregatedSummary::compute(&snapshot.outcomes, &snapshot.samples)
    }
}
