#![forbid(unsafe_code)]

//! mobileload (mlx): load generation and metrics aggregation for mobile apps.
//!
//! A run ramps a population of virtual users up to a target, each one holding
//! an automation session on a device and executing weighted scenarios until a
//! deadline or a stop request. Outcomes and device samples are aggregated
//! into a summary and gated against performance thresholds.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use mobileload::prelude::*;
//!
//! # fn main() -> mobileload::core::errors::Result<()> {
//! let config = LoadTestConfig::load(Path::new("plan.toml"))?;
//! let ctx = RunContext::new(Arc::new(SimulatedDriver::instant()));
//! let report = run_load_test(&config.to_plan()?, &ctx)?;
//! println!("p95 = {:.3}s, passed = {}", report.summary.response_time.p95, report.passed);
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod driver;
pub mod engine;
pub mod logger;
pub mod metrics;
