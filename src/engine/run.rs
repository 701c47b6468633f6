//! Load-test orchestration: validate the plan, start the sampler, drive the
//! ramp, then summarize and evaluate thresholds.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::core::errors::{MlxError, Result};
use crate::core::model::{PlatformTarget, WeightedScenario};
use crate::driver::{ActionRegistry, AutomationDriver, DeviceProbe};
use crate::engine::executor::ScenarioRunner;
use crate::engine::ramp::{DeviceRoster, RampConfig, RampScheduler, StopReason};
use crate::engine::selector::WeightedScenarioSelector;
use crate::engine::signals::StopSignal;
use crate::engine::worker::WorkerShared;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::metrics::aggregator::MetricsAggregator;
use crate::metrics::probe::{DeviceSampler, SamplerConfig};
use crate::metrics::report::RunReport;
use crate::metrics::thresholds::{ThresholdSpec, evaluate_thresholds, overall_pass};

// ──────────────────── plan ────────────────────

/// Longest run a plan may ask for: one year.
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Everything the engine needs to run one test.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTestPlan {
    pub name: String,
    pub targets: Vec<PlatformTarget>,
    pub scenarios: Vec<WeightedScenario>,
    pub max_users: usize,
    pub ramp_up: Duration,
    pub duration: Duration,
    /// Scheduler control-loop period.
    pub tick: Duration,
    pub sampler: SamplerConfig,
    pub thresholds: ThresholdSpec,
    /// Stable hash of the source configuration, for the activity log.
    pub config_hash: Option<String>,
}

impl Default for LoadTestPlan {
    fn default() -> Self {
        Self {
            name: "load test".to_string(),
            targets: Vec::new(),
            scenarios: Vec::new(),
            max_users: 1,
            ramp_up: Duration::ZERO,
            duration: Duration::from_secs(60),
            tick: Duration::from_secs(1),
            sampler: SamplerConfig::default(),
            thresholds: ThresholdSpec::new(),
            config_hash: None,
        }
    }
}

impl LoadTestPlan {
    /// Structural checks that must hold before any thread starts.
    pub fn validate(&self, actions: &ActionRegistry) -> Result<()> {
        if self.targets.is_empty() {
            return Err(MlxError::invalid_config("no platform targets configured"));
        }
        if self.scenarios.is_empty() {
            return Err(MlxError::invalid_config("no scenarios configured"));
        }
        if self.scenarios.iter().all(|s| s.weight == 0) {
            return Err(MlxError::invalid_config(
                "all scenario weights are zero; at least one must be positive",
            ));
        }
        if self.max_users == 0 {
            return Err(MlxError::invalid_config("max_users must be at least 1"));
        }
        if self.tick.is_zero() {
            return Err(MlxError::invalid_config("scheduler tick must be > 0"));
        }
        if self.duration.is_zero() || self.duration > MAX_RUN_DURATION {
            return Err(MlxError::invalid_config(format!(
                "run duration must be > 0 and at most {}s",
                MAX_RUN_DURATION.as_secs()
            )));
        }
        for weighted in &self.scenarios {
            if let Some(handler) = weighted
                .scenario
                .custom_handlers()
                .find(|h| !actions.contains(h))
            {
                return Err(MlxError::invalid_config(format!(
                    "scenario {:?} uses custom action handler {handler:?} which is not registered",
                    weighted.scenario.name
                )));
            }
        }
        Ok(())
    }
}

// ──────────────────── collaborators ────────────────────

/// External collaborators for one run. No global registries: custom action
/// handlers travel here.
#[derive(Clone)]
pub struct RunContext {
    pub driver: Arc<dyn AutomationDriver>,
    pub probe: Option<Arc<dyn DeviceProbe>>,
    pub actions: ActionRegistry,
    pub logger: ActivityLoggerHandle,
}

impl RunContext {
    /// Driver only: no probe, no custom actions, events discarded.
    #[must_use]
    pub fn new(driver: Arc<dyn AutomationDriver>) -> Self {
        Self {
            driver,
            probe: None,
            actions: ActionRegistry::new(),
            logger: ActivityLoggerHandle::detached(),
        }
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    #[must_use]
    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = logger;
        self
    }
}

// ──────────────────── run ────────────────────

/// A load test that can be stopped from another thread while it runs.
#[derive(Debug)]
pub struct LoadTest {
    plan: LoadTestPlan,
    stop: StopSignal,
}

impl LoadTest {
    #[must_use]
    pub fn new(plan: LoadTestPlan) -> Self {
        Self {
            plan,
            stop: StopSignal::new(),
        }
    }

    #[must_use]
    pub fn plan(&self) -> &LoadTestPlan {
        &self.plan
    }

    /// Shared handle to this test's stop flag (for signal handlers, other threads).
    ///
    /// Each `run` works on its own child of this flag, so a finished run leaves
    /// it clear and the test can be run again.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask every worker to finish its current scenario and exit.
    pub fn stop(&self) {
        self.stop.request_stop();
    }

    /// Run to completion. Blocks the calling thread, which drives the ramp.
    pub fn run(&self, ctx: &RunContext) -> Result<RunReport> {
        let plan = &self.plan;
        plan.validate(&ctx.actions)?;
        let selector = WeightedScenarioSelector::new(&plan.scenarios)?;
        let roster = DeviceRoster::from_targets(&plan.targets)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started.checked_add(plan.duration).ok_or_else(|| {
            MlxError::invalid_config(format!(
                "run duration of {}s does not fit the system clock",
                plan.duration.as_secs()
            ))
        })?;
        ctx.logger.send(ActivityEvent::RunStarted {
            test_name: plan.name.clone(),
            max_users: plan.max_users,
            duration_secs: plan.duration.as_secs(),
            config_hash: plan.config_hash.clone(),
        });

        let aggregator = Arc::new(MetricsAggregator::new());
        let sampler = match &ctx.probe {
            Some(probe) => Some(DeviceSampler::spawn(
                Arc::clone(probe),
                Arc::clone(&aggregator),
                plan.sampler.clone(),
                ctx.logger.clone(),
            )?),
            None => None,
        };

        let shared = Arc::new(WorkerShared {
            driver: Arc::clone(&ctx.driver),
            runner: ScenarioRunner::new(ctx.actions.clone()),
            selector,
            aggregator: Arc::clone(&aggregator),
            logger: ctx.logger.clone(),
            stop: self.stop.child(),
            deadline,
        });
        let scheduler = RampScheduler::new(
            RampConfig {
                max_users: plan.max_users,
                ramp_up: plan.ramp_up,
                tick: plan.tick,
            },
            roster,
            shared,
        );
        let outcome = scheduler.run(started);

        if let Some(sampler) = sampler {
            sampler.stop();
        }

        let summary = aggregator.summary();
        let threshold_results = evaluate_thresholds(&summary, &plan.thresholds);
        for result in &threshold_results {
            ctx.logger.send(ActivityEvent::ThresholdEvaluated {
                metric: result.metric.clone(),
                limit: result.limit,
                passed: result.passed,
            });
        }
        let passed = overall_pass(&threshold_results);

        let elapsed = started.elapsed();
        ctx.logger.send(ActivityEvent::RunStopped {
            test_name: plan.name.clone(),
            reason: outcome.reason.as_str().to_string(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            passed: Some(passed),
        });

        Ok(RunReport {
            test_name: plan.name.clone(),
            started_at,
            finished_at: Utc::now(),
            duration_secs: elapsed.as_secs_f64(),
            max_virtual_users: plan.max_users,
            peak_active_users: outcome.peak_active,
            stopped_early: outcome.reason == StopReason::Requested,
            workers: outcome.workers,
            summary,
            thresholds: plan.thresholds.clone(),
            threshold_results,
            passed,
        })
    }
}

/// Validate and run `plan` with `ctx` to completion.
pub fn run_load_test(plan: &LoadTestPlan, ctx: &RunContext) -> Result<RunReport> {
    LoadTest::new(plan.clone()).run(ctx)
}
