//! Device sampler: a background thread polling the `DeviceProbe` on a fixed
//! ticker and feeding readings into the aggregator.
//!
//! A failed poll is logged and its sample dropped; sampling continues.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};

use crate::core::errors::{MlxError, Result};
use crate::core::model::{DeviceSample, MetricKind};
use crate::driver::DeviceProbe;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::metrics::aggregator::MetricsAggregator;

/// Sampling knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerConfig {
    pub interval: Duration,
    /// Reading kinds to keep; others are masked out before recording.
    pub collect: Vec<MetricKind>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            collect: MetricKind::ALL.to_vec(),
        }
    }
}

/// Counters returned when the sampler thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub polls: u64,
    pub recorded: u64,
    pub failures: u64,
}

/// Handle to a running sampler thread.
pub struct DeviceSampler {
    shutdown_tx: Sender<()>,
    join: thread::JoinHandle<SamplerStats>,
}

impl DeviceSampler {
    /// Start polling. The first poll happens immediately.
    pub fn spawn(
        probe: Arc<dyn DeviceProbe>,
        aggregator: Arc<MetricsAggregator>,
        config: SamplerConfig,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let interval = config.interval.max(Duration::from_millis(1));

        let join = thread::Builder::new()
            .name("mlx-probe".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut stats = SamplerStats::default();
                poll_once(probe.as_ref(), &aggregator, &config.collect, &logger, &mut stats);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            poll_once(probe.as_ref(), &aggregator, &config.collect, &logger, &mut stats);
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                stats
            })
            .map_err(|e| MlxError::Runtime {
                details: format!("failed to spawn device sampler thread: {e}"),
            })?;

        Ok(Self { shutdown_tx, join })
    }

    /// Stop the thread and wait for it. An in-flight poll completes first.
    pub fn stop(self) -> SamplerStats {
        drop(self.shutdown_tx);
        self.join.join().unwrap_or_else(|_| {
            eprintln!("[MLX-PROBE] sampler thread panicked");
            SamplerStats::default()
        })
    }
}

fn poll_once(
    probe: &dyn DeviceProbe,
    aggregator: &MetricsAggregator,
    collect: &[MetricKind],
    logger: &ActivityLoggerHandle,
    stats: &mut SamplerStats,
) {
    stats.polls += 1;
    match probe.poll() {
        Ok(reading) => {
            aggregator.record_sample(DeviceSample::now(reading.retain(collect)));
            stats.recorded += 1;
        }
        Err(err) => {
            stats.failures += 1;
            logger.send(ActivityEvent::ProbeFailed {
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }
    }
}
