//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use mobileload::prelude::*;
//! ```

// Core
pub use crate::core::config::LoadTestConfig;
pub use crate::core::errors::{MlxError, Result};
pub use crate::core::model::{
    Action, ActionOutcome, ActionParams, DeviceReading, DeviceSample, Locator, LocatorStrategy,
    MetricKind, PlatformKind, PlatformTarget, ScenarioDefinition, VirtualUserState,
    WeightedScenario, WorkerStatus,
};

// Driver seams
pub use crate::driver::simulated::{SimulatedDriver, SimulatedProbe, SimulationConfig};
pub use crate::driver::{ActionHandler, ActionRegistry, AutomationDriver, DeviceProbe, Session};

// Engine
pub use crate::engine::ramp::target_concurrency;
pub use crate::engine::run::{LoadTest, LoadTestPlan, RunContext, run_load_test};
pub use crate::engine::signals::StopSignal;

// Logging
pub use crate::logger::activity::{ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger};

// Metrics
pub use crate::metrics::report::RunReport;
pub use crate::metrics::summary::AggregatedSummary;
pub use crate::metrics::thresholds::{ThresholdResult, evaluate_thresholds, overall_pass};
