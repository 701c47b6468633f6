//! Summary statistics derived from a snapshot of outcomes and device samples.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::model::{ActionOutcome, DeviceSample};

/// Value at fraction `p` of an ascending slice.
///
/// Index is `clamp(floor(p * n), 0, n - 1)`, no interpolation. Empty input
/// yields 0.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let raw = (p * n as f64).floor();
    let idx = if raw.is_nan() || raw <= 0.0 {
        0
    } else {
        (raw as usize).min(n - 1)
    };
    sorted[idx]
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Scenario iteration durations, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
}

impl ResponseTimeStats {
    /// Statistics over unsorted durations.
    #[must_use]
    pub fn from_durations(mut durations: Vec<f64>) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_by(f64::total_cmp);
        Self {
            min: durations[0],
            max: durations[durations.len() - 1],
            mean: mean(&durations),
            median: percentile(&durations, 0.5),
            p95: percentile(&durations, 0.95),
            p99: percentile(&durations, 0.99),
        }
    }
}

/// Device resource aggregates. Missing readings are excluded; with no
/// readings the value is 0 and the matching count is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    /// Number of device samples recorded, with or without readings.
    pub samples: usize,
    pub cpu_samples: usize,
    /// Mean cpu percent.
    pub avg_cpu: f64,
    pub memory_samples: usize,
    /// Mean total memory in MB.
    pub avg_memory: f64,
    /// Peak total memory in MB.
    pub peak_memory: f64,
}

impl DeviceStats {
    #[must_use]
    pub fn from_samples(samples: &[DeviceSample]) -> Self {
        let cpu: Vec<f64> = samples.iter().filter_map(|s| s.reading.cpu).collect();
        let memory: Vec<f64> = samples
            .iter()
            .filter_map(|s| s.reading.memory.map(|m| m.total))
            .collect();
        Self {
            samples: samples.len(),
            cpu_samples: cpu.len(),
            avg_cpu: mean(&cpu),
            memory_samples: memory.len(),
            avg_memory: mean(&memory),
            peak_memory: memory.iter().copied().fold(0.0, f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStats {
    pub count: u64,
    pub failures: u64,
    /// Mean duration in seconds, failed iterations included.
    pub avg_duration: f64,
}

/// Everything the threshold evaluator and the report need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSummary {
    pub total_actions: u64,
    pub successful_actions: u64,
    pub failed_actions: u64,
    /// Percent.
    pub success_rate: f64,
    /// Percent.
    pub error_rate: f64,
    pub response_time: ResponseTimeStats,
    pub device: DeviceStats,
    pub scenarios: BTreeMap<String, ScenarioStats>,
}

impl AggregatedSummary {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(outcomes: &[ActionOutcome], samples: &[DeviceSample]) -> Self {
        let total = outcomes.len() as u64;
        let successful = outcomes.iter().filter(|o| o.success).count() as u64;
        let failed = total - successful;
        let (success_rate, error_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                successful as f64 / total as f64 * 100.0,
                failed as f64 / total as f64 * 100.0,
            )
        };

        let mut per_scenario: BTreeMap<String, (ScenarioStats, f64)> = BTreeMap::new();
        for outcome in outcomes {
            let (stats, sum) = per_scenario.entry(outcome.scenario.clone()).or_default();
            stats.count += 1;
            if !outcome.success {
                stats.failures += 1;
            }
            *sum += outcome.duration_secs;
        }
        let scenarios = per_scenario
            .into_iter()
            .map(|(name, (mut stats, sum))| {
                stats.avg_duration = sum / stats.count as f64;
                (name, stats)
            })
            .collect();

        Self {
            total_actions: total,
            successful_actions: successful,
            failed_actions: failed,
            success_rate,
            error_rate,
            response_time: ResponseTimeStats::from_durations(
                outcomes.iter().map(|o| o.duration_secs).collect(),
            ),
            device: DeviceStats::from_samples(samples),
            scenarios,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{DeviceReading, MemoryReading};
    use proptest::prelude::*;
    use std::time::Duration;

    fn tens() -> Vec<f64> {
        (1..=10).map(|i| f64::from(i) * 10.0).collect()
    }

    #[test]
    fn percentile_uses_floor_index() {
        let d = tens();
        assert!((percentile(&d, 0.5) - 60.0).abs() < f64::EPSILON);
        assert!((percentile(&d, 0.95) - 100.0).abs() < f64::EPSILON);
        assert!((percentile(&d, 0.99) - 100.0).abs() < f64::EPSILON);
        assert!((percentile(&d, 0.0) - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percentile_of_empty_is_zero() {
        assert!(percentile(&[], 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn response_time_stats_sort_input() {
        let mut d = tens();
        d.reverse();
        let stats = ResponseTimeStats::from_durations(d);
        assert!((stats.min - 10.0).abs() < f64::EPSILON);
        assert!((stats.max - 100.0).abs() < f64::EPSILON);
        assert!((stats.mean - 55.0).abs() < 1e-9);
        assert!((stats.median - 60.0).abs() < f64::EPSILON);
        assert!((stats.p95 - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn device_stats_skip_missing_readings() {
        let mem = |total| MemoryReading {
            total,
            heap: 0.0,
            native: 0.0,
            graphics: 0.0,
        };
        let samples = vec![
            DeviceSample::now(DeviceReading {
                cpu: Some(40.0),
                memory: Some(mem(200.0)),
                ..DeviceReading::default()
            }),
            DeviceSample::now(DeviceReading::default()),
            DeviceSample::now(DeviceReading {
                cpu: Some(60.0),
                memory: Some(mem(300.0)),
                ..DeviceReading::default()
            }),
        ];
        let stats = DeviceStats::from_samples(&samples);
        assert_eq!(stats.samples, 3);
        assert_eq!(stats.cpu_samples, 2);
        assert!((stats.avg_cpu - 50.0).abs() < 1e-9);
        assert!((stats.avg_memory - 250.0).abs() < 1e-9);
        assert!((stats.peak_memory - 300.0).abs() < 1e-9);
    }

    #[test]
    fn device_stats_empty_are_zero() {
        let stats = DeviceStats::from_samples(&[]);
        assert_eq!(stats, DeviceStats::default());
    }

    #[test]
    fn summary_counts_and_rates() {
        let outcomes = vec![
            ActionOutcome::succeeded(0, "browse", Duration::from_millis(400)),
            ActionOutcome::succeeded(1, "browse", Duration::from_millis(600)),
            ActionOutcome::failed(1, "checkout", "timeout"),
            ActionOutcome::succeeded(2, "checkout", Duration::from_secs(1)),
        ];
        let summary = AggregatedSummary::compute(&outcomes, &[]);
        assert_eq!(summary.total_actions, 4);
        assert_eq!(summary.successful_actions, 3);
        assert_eq!(summary.failed_actions, 1);
        assert!((summary.success_rate - 75.0).abs() < 1e-9);
        assert!((summary.error_rate - 25.0).abs() < 1e-9);
        assert!(summary.response_time.min.abs() < f64::EPSILON);

        let browse = summary.scenarios["browse"];
        assert_eq!(browse.count, 2);
        assert!((browse.avg_duration - 0.5).abs() < 1e-9);
        let checkout = summary.scenarios["checkout"];
        assert_eq!(checkout.failures, 1);
        assert!((checkout.avg_duration - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_is_all_zero() {
        let summary = AggregatedSummary::compute(&[], &[]);
        assert_eq!(summary, AggregatedSummary::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn percentile_is_a_member_and_monotone(
            mut values in prop::collection::vec(0.0f64..10_000.0, 1..200),
            p in 0.0f64..1.0,
            q in 0.0f64..1.0,
        ) {
            values.sort_by(f64::total_cmp);
            let (lo, hi) = if p <= q { (p, q) } else { (q, p) };
            let a = percentile(&values, lo);
            let b = percentile(&values, hi);
            prop_assert!(values.contains(&a));
            prop_assert!(a <= b);
            prop_assert!(percentile(&values, 1.0) <= values[values.len() - 1]);
        }
    }
}
