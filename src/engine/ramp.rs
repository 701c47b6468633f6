//! Ramp-up admission control.
//!
//! `target_concurrency` is a pure function of elapsed time. `RampScheduler`
//! drives it on a fixed tick: reap finished workers, then spawn enough new
//! ones to reach the target. There is no ramp-down; once admitted, workers
//! run until the stop signal or the deadline.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::errors::{MlxError, Result};
use crate::core::model::{PlatformTarget, VirtualUserState, WorkerStatus};
use crate::engine::worker::{VirtualUserWorker, WorkerHandle, WorkerShared};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// Workers that should be active after `elapsed`.
///
/// `max_users` when the window is zero or has passed, otherwise
/// `floor(elapsed / ramp_window * max_users)`. Computed in integer
/// nanoseconds so it is exact and non-decreasing in `elapsed`.
#[must_use]
pub fn target_concurrency(elapsed: Duration, ramp_window: Duration, max_users: usize) -> usize {
    if ramp_window.is_zero() || elapsed >= ramp_window {
        return max_users;
    }
    let scaled = elapsed.as_nanos() * max_users as u128 / ramp_window.as_nanos();
    usize::try_from(scaled).map_or(max_users, |n| n.min(max_users))
}

// ──────────────────── device roster ────────────────────

/// One (platform target, device) pair a worker can be bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterSlot {
    pub target: Arc<PlatformTarget>,
    pub device: Option<String>,
}

/// Flattened, read-only device roster. Worker `id` gets slot `id % len`.
///
/// A target without devices contributes a single slot with no device, which
/// lets the driver pick one.
#[derive(Debug, Clone)]
pub struct DeviceRoster {
    slots: Vec<RosterSlot>,
}

impl DeviceRoster {
    pub fn from_targets(targets: &[PlatformTarget]) -> Result<Self> {
        let mut slots = Vec::new();
        for target in targets {
            let shared = Arc::new(target.clone());
            if target.devices.is_empty() {
                slots.push(RosterSlot {
                    target: shared,
                    device: None,
                });
            } else {
                slots.extend(target.devices.iter().map(|d| RosterSlot {
                    target: Arc::clone(&shared),
                    device: Some(d.clone()),
                }));
            }
        }
        if slots.is_empty() {
            return Err(MlxError::invalid_config("no platform targets configured"));
        }
        Ok(Self { slots })
    }

    #[must_use]
    pub fn slot(&self, worker_id: usize) -> &RosterSlot {
        &self.slots[worker_id % self.slots.len()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ──────────────────── scheduler ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampConfig {
    pub max_users: usize,
    pub ramp_up: Duration,
    pub tick: Duration,
}

/// Why the control loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Deadline,
    Requested,
}

impl StopReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deadline => "deadline",
            Self::Requested => "requested",
        }
    }
}

/// What the control loop hands back once every worker has terminated.
#[derive(Debug, Clone)]
pub struct RampOutcome {
    /// Final worker states, ordered by id.
    pub workers: Vec<VirtualUserState>,
    pub peak_active: usize,
    pub reason: StopReason,
}

pub struct RampScheduler {
    config: RampConfig,
    roster: DeviceRoster,
    shared: Arc<WorkerShared>,
    logger: ActivityLoggerHandle,
    registry: BTreeMap<usize, WorkerHandle>,
    finished: Vec<VirtualUserState>,
    next_id: usize,
    peak_active: usize,
}

impl RampScheduler {
    #[must_use]
    pub fn new(config: RampConfig, roster: DeviceRoster, shared: Arc<WorkerShared>) -> Self {
        let logger = shared.logger.clone();
        Self {
            config,
            roster,
            shared,
            logger,
            registry: BTreeMap::new(),
            finished: Vec::new(),
            next_id: 0,
            peak_active: 0,
        }
    }

    /// Drive the population from `started` until stop or deadline, then stop
    /// every worker and wait for all of them.
    pub fn run(mut self, started: Instant) -> RampOutcome {
        let mut last_target = 0;
        let reason = loop {
            if self.shared.stop.is_set() {
                break StopReason::Requested;
            }
            if Instant::now() >= self.shared.deadline {
                break StopReason::Deadline;
            }

            let target =
                target_concurrency(started.elapsed(), self.config.ramp_up, self.config.max_users);
            self.reap();
            let active = self.registry.len();
            if target > active {
                for _ in active..target {
                    self.spawn_next();
                }
                if target != last_target {
                    self.logger.send(ActivityEvent::ConcurrencyRaised {
                        target,
                        active: self.registry.len(),
                    });
                }
            }
            last_target = target;
            self.peak_active = self.peak_active.max(self.registry.len());

            let remaining = self
                .shared
                .deadline
                .saturating_duration_since(Instant::now());
            thread::sleep(self.config.tick.min(remaining));
        };

        self.shared.stop.request_stop();
        for (_, handle) in std::mem::take(&mut self.registry) {
            self.finished.push(handle.join());
        }
        self.finished.sort_by_key(|w| w.id);

        RampOutcome {
            workers: self.finished,
            peak_active: self.peak_active,
            reason,
        }
    }

    fn reap(&mut self) {
        let done: Vec<usize> = self
            .registry
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in done {
            if let Some(handle) = self.registry.remove(&id) {
                self.finished.push(handle.join());
            }
        }
    }

    fn spawn_next(&mut self) {
        let id = self.next_id;
        self.next_id += 1;
        let slot = self.roster.slot(id);
        let worker = VirtualUserWorker::new(id, Arc::clone(&slot.target), slot.device.clone());
        let platform = slot.target.kind;
        let device = slot.device.clone();

        match worker.spawn(Arc::clone(&self.shared)) {
            Ok(handle) => {
                self.registry.insert(id, handle);
            }
            Err(err) => {
                eprintln!("[MLX-RUN] {err}");
                self.logger.send(ActivityEvent::error(&err));
                let mut state = VirtualUserState::new(id, platform, device);
                state.status = WorkerStatus::Terminated;
                state.errors = 1;
                state.last_error = Some(err.to_string());
                state.stopped_at = Some(Utc::now());
                self.finished.push(state);
            }
        }
    }
}
