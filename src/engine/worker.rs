//! Virtual user lifecycle: acquire a session, run weighted scenarios until
//! stopped or past the deadline, release the session.
//!
//! ```text
//! Idle -> Starting -> Running -> Stopping -> Terminated
//!            |                                  ^
//!            +---- session open failed ---------+
//! ```

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::core::errors::{MlxError, Result};
use crate::core::model::{ActionOutcome, PlatformTarget, VirtualUserState, WorkerStatus};
use crate::driver::AutomationDriver;
use crate::engine::executor::ScenarioRunner;
use crate::engine::selector::WeightedScenarioSelector;
use crate::engine::signals::StopSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::metrics::aggregator::MetricsAggregator;

// ──────────────────── status cell ────────────────────

/// Lock-free published status of one worker, read by the scheduler.
#[derive(Debug)]
pub struct WorkerStatusCell(AtomicU8);

impl WorkerStatusCell {
    #[must_use]
    pub fn new(status: WorkerStatus) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    #[must_use]
    pub fn get(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: WorkerStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

// ──────────────────── shared run state ────────────────────

/// Everything a worker needs that is shared by all workers of a run.
pub struct WorkerShared {
    pub driver: Arc<dyn AutomationDriver>,
    pub runner: ScenarioRunner,
    pub selector: WeightedScenarioSelector,
    pub aggregator: Arc<MetricsAggregator>,
    pub logger: ActivityLoggerHandle,
    pub stop: StopSignal,
    pub deadline: Instant,
}

impl WorkerShared {
    /// Stop requested or deadline passed.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop.is_set() || Instant::now() >= self.deadline
    }
}

// ──────────────────── worker ────────────────────

/// One virtual user. Owns its state; publishes status through a shared cell.
pub struct VirtualUserWorker {
    state: VirtualUserState,
    target: Arc<PlatformTarget>,
    status: Arc<WorkerStatusCell>,
}

impl VirtualUserWorker {
    #[must_use]
    pub fn new(id: usize, target: Arc<PlatformTarget>, device: Option<String>) -> Self {
        Self {
            state: VirtualUserState::new(id, target.kind, device),
            target,
            status: Arc::new(WorkerStatusCell::new(WorkerStatus::Idle)),
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.state.id
    }

    #[must_use]
    pub fn status_cell(&self) -> Arc<WorkerStatusCell> {
        Arc::clone(&self.status)
    }

    fn transition(&mut self, status: WorkerStatus) {
        self.state.status = status;
        self.status.set(status);
    }

    /// Run the full lifecycle on the current thread and return the final state.
    pub fn run(mut self, shared: &WorkerShared) -> VirtualUserState {
        let id = self.state.id;
        self.transition(WorkerStatus::Starting);
        self.state.started_at = Some(Utc::now());

        let mut session = match shared
            .driver
            .open_session(&self.target, self.state.device.as_deref())
        {
            Ok(session) => session,
            Err(err) => {
                self.state.errors = 1;
                self.state.last_error = Some(err.to_string());
                shared.logger.send(ActivityEvent::SessionFailed {
                    user_id: id,
                    device: self.state.device.clone(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                self.state.stopped_at = Some(Utc::now());
                self.transition(WorkerStatus::Terminated);
                return self.state;
            }
        };

        self.transition(WorkerStatus::Running);
        shared.logger.send(ActivityEvent::WorkerStarted {
            user_id: id,
            device: self.state.device.clone(),
        });

        while !shared.should_stop() {
            let scenario = shared.selector.select();
            let start = Instant::now();
            self.state.iterations += 1;
            let outcome = match shared.runner.run(session.as_mut(), scenario) {
                Ok(()) => {
                    self.state.actions_executed += 1;
                    ActionOutcome::succeeded(id, scenario.name.as_str(), start.elapsed())
                }
                Err(err) => {
                    self.state.errors += 1;
                    self.state.last_error = Some(err.to_string());
                    shared.logger.send(ActivityEvent::ScenarioFailed {
                        user_id: id,
                        scenario: scenario.name.clone(),
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                    ActionOutcome::failed(id, scenario.name.as_str(), err.to_string())
                }
            };
            shared.aggregator.record_outcome(outcome);
        }

        self.transition(WorkerStatus::Stopping);
        if let Err(err) = session.close() {
            shared.logger.send(ActivityEvent::SessionCloseFailed {
                user_id: id,
                code: err.code().to_string(),
                message: err.to_string(),
            });
        }

        self.state.stopped_at = Some(Utc::now());
        self.transition(WorkerStatus::Terminated);
        shared.logger.send(ActivityEvent::WorkerStopped {
            user_id: id,
            iterations: self.state.iterations,
            errors: self.state.errors,
            uptime_ms: duration_ms(self.state.uptime()),
        });
        self.state
    }

    /// Run the lifecycle on a dedicated `mlx-vu-<id>` thread.
    pub fn spawn(self, shared: Arc<WorkerShared>) -> Result<WorkerHandle> {
        let id = self.state.id;
        let fallback = self.state.clone();
        let status = self.status_cell();
        let join = thread::Builder::new()
            .name(format!("mlx-vu-{id}"))
            .spawn(move || self.run(&shared))
            .map_err(|e| MlxError::Runtime {
                details: format!("failed to spawn virtual user {id}: {e}"),
            })?;
        Ok(WorkerHandle {
            id,
            status,
            fallback,
            join,
        })
    }
}

/// Scheduler-side handle to a running worker thread.
pub struct WorkerHandle {
    id: usize,
    status: Arc<WorkerStatusCell>,
    fallback: VirtualUserState,
    join: thread::JoinHandle<VirtualUserState>,
}

impl WorkerHandle {
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status.get()
    }

    /// Terminated, or the thread is gone for any other reason.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal() || self.join.is_finished()
    }

    /// Wait for the worker. A panicked worker is reported as terminated with
    /// one extra error.
    pub fn join(self) -> VirtualUserState {
        match self.join.join() {
            Ok(state) => state,
            Err(_) => {
                eprintln!("[MLX-RUN] virtual user {} panicked", self.id);
                let mut state = self.fallback;
                state.status = WorkerStatus::Terminated;
                state.errors += 1;
                state.last_error = Some("worker thread panicked".to_string());
                state.stopped_at = Some(Utc::now());
                state
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::core::model::{Action, PlatformKind, ScenarioDefinition, WeightedScenario};
    use crate::driver::Session;
    use crate::driver::simulated::{SimulatedDriver, SimulationConfig};

    fn shared_with(driver: Arc<dyn AutomationDriver>, run_for: Duration) -> WorkerShared {
        let scenarios = vec![WeightedScenario::new(
            ScenarioDefinition::new("back").then(Action::Back),
            1,
        )];
        WorkerShared {
            driver,
            runner: ScenarioRunner::default(),
            selector: WeightedScenarioSelector::new(&scenarios).unwrap(),
            aggregator: Arc::new(MetricsAggregator::new()),
            logger: ActivityLoggerHandle::detached(),
            stop: StopSignal::new(),
            deadline: Instant::now() + run_for,
        }
    }

    fn worker(id: usize) -> VirtualUserWorker {
        VirtualUserWorker::new(
            id,
            Arc::new(PlatformTarget::new(PlatformKind::Android, "app.apk")),
            Some("emulator-5554".to_string()),
        )
    }

    #[test]
    fn session_failure_terminates_with_one_error() {
        let driver = SimulatedDriver::new(SimulationConfig {
            session_failure_rate: 1.0,
            ..SimulationConfig::default()
        });
        let shared = shared_with(Arc::new(driver), Duration::from_millis(200));
        let w = worker(3);
        let cell = w.status_cell();
        let state = w.run(&shared);

        assert_eq!(state.status, WorkerStatus::Terminated);
        assert_eq!(cell.get(), WorkerStatus::Terminated);
        assert_eq!(state.errors, 1);
        assert_eq!(state.actions_executed, 0);
        assert!(state.last_error.unwrap().contains("MLX-2001"));
        assert_eq!(shared.aggregator.outcome_count(), 0);
    }

    #[test]
    fn scenario_failures_are_recorded_and_loop_continues() {
        let driver = SimulatedDriver::new(SimulationConfig {
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            action_failure_rate: 1.0,
            session_failure_rate: 0.0,
        });
        let shared = shared_with(Arc::new(driver), Duration::from_millis(30));
        let state = worker(0).run(&shared);

        assert!(state.iterations > 1);
        assert_eq!(state.errors, state.iterations);
        assert_eq!(state.actions_executed, 0);
        let snapshot = shared.aggregator.snapshot();
        assert_eq!(snapshot.outcomes.len() as u64, state.iterations);
        assert!(snapshot.outcomes.iter().all(|o| !o.success && o.duration_secs.abs() < f64::EPSILON));
    }

    #[test]
    fn stop_signal_ends_loop_and_closes_session() {
        struct CountingDriver {
            closed: Arc<AtomicUsize>,
        }
        struct CountingSession {
            closed: Arc<AtomicUsize>,
        }
        impl Session for CountingSession {
            fn perform(&mut self, _action: &Action) -> Result<()> {
                thread::sleep(Duration::from_millis(1));
                Ok(())
            }
            fn close(&mut self) -> Result<()> {
                self.closed.fetch_add(1, Ordering::SeqCst);
                Err(MlxError::Session {
                    device: "emu".to_string(),
                    details: "already gone".to_string(),
                })
            }
        }
        impl AutomationDriver for CountingDriver {
            fn open_session(
                &self,
                _target: &PlatformTarget,
                _device: Option<&str>,
            ) -> Result<Box<dyn Session>> {
                Ok(Box::new(CountingSession {
                    closed: Arc::clone(&self.closed),
                }))
            }
        }

        let closed = Arc::new(AtomicUsize::new(0));
        let shared = Arc::new(shared_with(
            Arc::new(CountingDriver {
                closed: Arc::clone(&closed),
            }),
            Duration::from_secs(60),
        ));
        let handle = worker(1).spawn(Arc::clone(&shared)).unwrap();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(handle.status(), WorkerStatus::Running);
        shared.stop.request_stop();
        let state = handle.join();

        assert_eq!(state.status, WorkerStatus::Terminated);
        assert_eq!(state.errors, 0);
        assert!(state.actions_executed > 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(state.stopped_at >= state.started_at);
    }

    #[test]
    fn stop_waits_for_in_flight_scenario() {
        struct SlowDriver {
            entered: crossbeam_channel::Sender<()>,
        }
        struct SlowSession {
            entered: crossbeam_channel::Sender<()>,
        }
        impl Session for SlowSession {
            fn perform(&mut self, _action: &Action) -> Result<()> {
                let _ = self.entered.send(());
                thread::sleep(Duration::from_millis(100));
                Ok(())
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }
        impl AutomationDriver for SlowDriver {
            fn open_session(
                &self,
                _target: &PlatformTarget,
                _device: Option<&str>,
            ) -> Result<Box<dyn Session>> {
                Ok(Box::new(SlowSession {
                    entered: self.entered.clone(),
                }))
            }
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(shared_with(
            Arc::new(SlowDriver { entered: tx }),
            Duration::from_secs(60),
        ));
        let handle = worker(2).spawn(Arc::clone(&shared)).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        shared.stop.request_stop();
        let state = handle.join();

        assert_eq!(state.iterations, 1);
        assert_eq!(state.actions_executed, 1);
        assert_eq!(state.errors, 0);
        assert!(rx.try_recv().is_err(), "no second iteration started");
        let outcomes = shared.aggregator.snapshot().outcomes;
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert!(outcomes[0].duration_secs >= 0.1);
    }

    #[test]
    fn status_cell_round_trips() {
        let cell = WorkerStatusCell::new(WorkerStatus::Idle);
        cell.set(WorkerStatus::Stopping);
        assert_eq!(cell.get(), WorkerStatus::Stopping);
    }
}
