//! Simulated automation driver and device probe for dry runs and tests.
//!
//! Sessions sleep a random latency per action and fail at configurable rates,
//! which is enough to exercise ramping, selection, error accounting and
//! percentile math without a device farm.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::core::errors::{MlxError, Result};
use crate::core::model::{
    Action, BatteryReading, DeviceReading, MemoryReading, NetworkReading, PlatformTarget,
};
use crate::driver::{AutomationDriver, DeviceProbe, Session};

/// Knobs for [`SimulatedDriver`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Lower bound of per-action latency.
    pub min_latency: Duration,
    /// Upper bound of per-action latency (inclusive).
    pub max_latency: Duration,
    /// Probability in `[0, 1]` that any single action fails.
    pub action_failure_rate: f64,
    /// Probability in `[0, 1]` that opening a session fails.
    pub session_failure_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(20),
            max_latency: Duration::from_millis(120),
            action_failure_rate: 0.02,
            session_failure_rate: 0.0,
        }
    }
}

/// Driver whose sessions never touch a real device.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    config: SimulationConfig,
    sessions_opened: AtomicU64,
}

impl SimulatedDriver {
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            sessions_opened: AtomicU64::new(0),
        }
    }

    /// Zero latency, zero failures.
    #[must_use]
    pub fn instant() -> Self {
        Self::new(SimulationConfig {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            action_failure_rate: 0.0,
            session_failure_rate: 0.0,
        })
    }

    /// Number of successfully opened sessions so far.
    #[must_use]
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }
}

impl AutomationDriver for SimulatedDriver {
    fn open_session(
        &self,
        target: &PlatformTarget,
        device: Option<&str>,
    ) -> Result<Box<dyn Session>> {
        let device_label = device.unwrap_or("any").to_string();
        if roll(self.config.session_failure_rate) {
            return Err(MlxError::Session {
                device: device_label,
                details: format!(
                    "simulated {} session refused for {}",
                    target.kind.automation_name(),
                    target.app
                ),
            });
        }
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(SimulatedSession {
            config: self.config.clone(),
            closed: false,
        }))
    }
}

struct SimulatedSession {
    config: SimulationConfig,
    closed: bool,
}

impl Session for SimulatedSession {
    fn perform(&mut self, action: &Action) -> Result<()> {
        if self.closed {
            return Err(MlxError::action(action.kind(), "session already closed"));
        }
        let latency = sample_latency(self.config.min_latency, self.config.max_latency);
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        if roll(self.config.action_failure_rate) {
            return Err(MlxError::action(action.kind(), "simulated element lookup timeout"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Probe producing plausible readings with optional gaps and failures.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulatedProbe {
    /// Probability that an individual reading comes back missing.
    pub unavailable_rate: f64,
    /// Probability that the whole poll fails.
    pub failure_rate: f64,
}

impl DeviceProbe for SimulatedProbe {
    fn poll(&self) -> Result<DeviceReading> {
        if roll(self.failure_rate) {
            return Err(MlxError::Probe {
                details: "simulated probe timeout".to_string(),
            });
        }
        let mut rng = rand::rng();
        let gap = |rng: &mut rand::rngs::ThreadRng| rng.random::<f64>() < self.unavailable_rate;

        let cpu = (!gap(&mut rng)).then(|| rng.random_range(20.0..80.0));
        let memory = (!gap(&mut rng)).then(|| {
            let heap = rng.random_range(100.0..200.0);
            let native = rng.random_range(40.0..100.0);
            let graphics = rng.random_range(10.0..30.0);
            MemoryReading {
                total: heap + native + graphics,
                heap,
                native,
                graphics,
            }
        });
        let battery = (!gap(&mut rng)).then(|| BatteryReading {
            level: rng.random_range(50.0..100.0),
            temperature: rng.random_range(28.0..38.0),
            voltage: rng.random_range(3700.0..4200.0),
        });
        let network = (!gap(&mut rng)).then(|| NetworkReading {
            rx_bytes: rng.random_range(0..2_000_000),
            tx_bytes: rng.random_range(0..1_000_000),
            rx_packets: rng.random_range(0..3_000),
            tx_packets: rng.random_range(0..1_500),
        });

        Ok(DeviceReading {
            cpu,
            memory,
            battery,
            network,
        })
    }
}

fn roll(probability: f64) -> bool {
    probability > 0.0 && rand::rng().random::<f64>() < probability
}

fn sample_latency(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    rand::rng().random_range(min..=max)
}
