//! Pass/fail evaluation of named thresholds against a summary.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::MlxError;
use crate::metrics::summary::AggregatedSummary;

/// Threshold name -> numeric limit, as configured.
pub type ThresholdSpec = BTreeMap<String, f64>;

/// Known threshold metrics. Response-time limits are milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdMetric {
    CpuMax,
    MemoryMax,
    MemoryAvgMax,
    ResponseTimeAvg,
    ResponseTimeP50,
    ResponseTimeP95,
    ResponseTimeP99,
    ResponseTimeMax,
    ErrorRateMax,
    SuccessRateMin,
}

impl ThresholdMetric {
    pub const ALL: [Self; 10] = [
        Self::CpuMax,
        Self::MemoryMax,
        Self::MemoryAvgMax,
        Self::ResponseTimeAvg,
        Self::ResponseTimeP50,
        Self::ResponseTimeP95,
        Self::ResponseTimeP99,
        Self::ResponseTimeMax,
        Self::ErrorRateMax,
        Self::SuccessRateMin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CpuMax => "cpu_max",
            Self::MemoryMax => "memory_max",
            Self::MemoryAvgMax => "memory_avg_max",
            Self::ResponseTimeAvg => "response_time_avg",
            Self::ResponseTimeP50 => "response_time_p50",
            Self::ResponseTimeP95 => "response_time_p95",
            Self::ResponseTimeP99 => "response_time_p99",
            Self::ResponseTimeMax => "response_time_max",
            Self::ErrorRateMax => "error_rate_max",
            Self::SuccessRateMin => "success_rate_min",
        }
    }

    /// The summary value this metric compares, in the limit's unit.
    #[must_use]
    pub fn observed(self, summary: &AggregatedSummary) -> f64 {
        let rt = &summary.response_time;
        match self {
            Self::CpuMax => summary.device.avg_cpu,
            Self::MemoryMax => summary.device.peak_memory,
            Self::MemoryAvgMax => summary.device.avg_memory,
            Self::ResponseTimeAvg => rt.mean * 1000.0,
            Self::ResponseTimeP50 => rt.median * 1000.0,
            Self::ResponseTimeP95 => rt.p95 * 1000.0,
            Self::ResponseTimeP99 => rt.p99 * 1000.0,
            Self::ResponseTimeMax => rt.max * 1000.0,
            Self::ErrorRateMax => summary.error_rate,
            Self::SuccessRateMin => summary.success_rate,
        }
    }

    /// `success_rate_min` is a floor; everything else is a ceiling.
    #[must_use]
    pub fn passes(self, observed: f64, limit: f64) -> bool {
        match self {
            Self::SuccessRateMin => observed >= limit,
            _ => observed <= limit,
        }
    }
}

impl fmt::Display for ThresholdMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdMetric {
    type Err = MlxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MlxError::invalid_config(format!("unknown threshold metric {s:?}")))
    }
}

/// Outcome of one named threshold. `passed` is `None` for unknown metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub limit: f64,
    pub observed: Option<f64>,
    pub passed: Option<bool>,
}

/// `Some(pass)` for a known metric, `None` for an unknown name.
#[must_use]
pub fn evaluate_threshold(summary: &AggregatedSummary, metric: &str, limit: f64) -> Option<bool> {
    let metric = metric.parse::<ThresholdMetric>().ok()?;
    Some(metric.passes(metric.observed(summary), limit))
}

/// Evaluate every configured threshold, in name order.
#[must_use]
pub fn evaluate_thresholds(
    summary: &AggregatedSummary,
    thresholds: &ThresholdSpec,
) -> Vec<ThresholdResult> {
    thresholds
        .iter()
        .map(|(name, &limit)| match name.parse::<ThresholdMetric>() {
            Ok(metric) => {
                let observed = metric.observed(summary);
                ThresholdResult {
                    metric: name.clone(),
                    limit,
                    observed: Some(observed),
                    passed: Some(metric.passes(observed, limit)),
                }
            }
            Err(_) => ThresholdResult {
                metric: name.clone(),
                limit,
                observed: None,
                passed: None,
            },
        })
        .collect()
}

/// AND over determinate results. No determinate results means pass.
#[must_use]
pub fn overall_pass(results: &[ThresholdResult]) -> bool {
    results.iter().filter_map(|r| r.passed).all(|p| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::summary::{DeviceStats, ResponseTimeStats};

    fn summary_with_cpu(avg_cpu: f64) -> AggregatedSummary {
        AggregatedSummary {
            device: DeviceStats {
                avg_cpu,
                cpu_samples: 1,
                samples: 1,
                ..DeviceStats::default()
            },
            ..AggregatedSummary::default()
        }
    }

    #[test]
    fn cpu_max_compares_average() {
        assert_eq!(evaluate_threshold(&summary_with_cpu(90.0), "cpu_max", 80.0), Some(false));
        assert_eq!(evaluate_threshold(&summary_with_cpu(70.0), "cpu_max", 80.0), Some(true));
        assert_eq!(evaluate_threshold(&summary_with_cpu(80.0), "cpu_max", 80.0), Some(true));
    }

    #[test]
    fn unknown_metric_is_indeterminate() {
        assert_eq!(evaluate_threshold(&summary_with_cpu(90.0), "fps_min", 30.0), None);
    }

    #[test]
    fn unknown_metric_does_not_affect_overall() {
        let mut limits = ThresholdSpec::new();
        limits.insert("cpu_max".to_string(), 80.0);
        limits.insert("fps_min".to_string(), 30.0);
        let results = evaluate_thresholds(&summary_with_cpu(70.0), &limits);
        assert_eq!(results.len(), 2);
        assert!(overall_pass(&results));

        let failing = evaluate_thresholds(&summary_with_cpu(95.0), &limits);
        assert!(!overall_pass(&failing));
    }

    #[test]
    fn empty_spec_passes_vacuously() {
        assert!(overall_pass(&[]));
        let only_unknown = vec![ThresholdResult {
            metric: "jank".to_string(),
            limit: 1.0,
            observed: None,
            passed: None,
        }];
        assert!(overall_pass(&only_unknown));
    }

    #[test]
    fn response_times_compare_in_milliseconds() {
        let summary = AggregatedSummary {
            response_time: ResponseTimeStats {
                min: 0.1,
                max: 3.0,
                mean: 0.8,
                median: 0.6,
                p95: 2.5,
                p99: 2.9,
            },
            ..AggregatedSummary::default()
        };
        assert_eq!(evaluate_threshold(&summary, "response_time_p95", 2000.0), Some(false));
        assert_eq!(evaluate_threshold(&summary, "response_time_p50", 2000.0), Some(true));
        assert_eq!(evaluate_threshold(&summary, "response_time_avg", 800.0), Some(true));
        assert_eq!(evaluate_threshold(&summary, "response_time_max", 2999.0), Some(false));
    }

    #[test]
    fn success_rate_is_a_floor() {
        let summary = AggregatedSummary {
            success_rate: 97.0,
            error_rate: 3.0,
            ..AggregatedSummary::default()
        };
        assert_eq!(evaluate_threshold(&summary, "success_rate_min", 95.0), Some(true));
        assert_eq!(evaluate_threshold(&summary, "success_rate_min", 99.0), Some(false));
        assert_eq!(evaluate_threshold(&summary, "error_rate_max", 5.0), Some(true));
    }

    #[test]
    fn metric_names_round_trip() {
        for metric in ThresholdMetric::ALL {
            assert_eq!(metric.as_str().parse::<ThresholdMetric>().unwrap(), metric);
        }
        assert!("CPU_MAX".parse::<ThresholdMetric>().is_err());
    }
}
