//! Test-plan configuration: TOML or JSON file + `MLX_*` env var overrides +
//! defaults, validated and converted into an engine `LoadTestPlan`.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{MlxError, Result};
use crate::core::model::{
    Action, ActionParams, MetricKind, PlatformTarget, ScenarioDefinition, WeightedScenario,
};
use crate::engine::run::{LoadTestPlan, MAX_RUN_DURATION};
use crate::logger::jsonl::{JsonlConfig, default_jsonl_path};
use crate::metrics::probe::SamplerConfig;
use crate::metrics::thresholds::ThresholdMetric;

/// Full load-test configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoadTestConfig {
    pub test: TestConfig,
    pub virtual_users: VirtualUsersConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
    pub platforms: Vec<PlatformTarget>,
    pub scenarios: Vec<ScenarioConfig>,
    /// Threshold name -> limit. Unknown names are kept and evaluate to "unknown".
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestConfig {
    pub name: String,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VirtualUsersConfig {
    pub max: usize,
    /// Linear ramp window; 0 admits every user on the first tick.
    pub ramp_up_secs: u64,
    /// Scheduler control-loop period.
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub interval_ms: u64,
    pub collect: Vec<MetricKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Activity log path. `None` means `$HOME/.local/share/mlx/activity.jsonl`.
    pub jsonl_path: Option<PathBuf>,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// One scenario as written in the file: actions are still untyped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// `kind` plus whatever parameters that kind takes, flattened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub kind: String,
    #[serde(flatten)]
    pub params: ActionParams,
}

const fn default_weight() -> u32 {
    1
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            name: "load test".to_string(),
            duration_secs: 60,
        }
    }
}

impl Default for VirtualUsersConfig {
    fn default() -> Self {
        Self {
            max: 1,
            ramp_up_secs: 0,
            tick_ms: 1_000,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            collect: MetricKind::ALL.to_vec(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let jsonl = JsonlConfig::default();
        Self {
            jsonl_path: None,
            fallback_path: jsonl.fallback_path,
            max_size_bytes: jsonl.max_size_bytes,
            max_rotated_files: jsonl.max_rotated_files,
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn jsonl_config(&self) -> JsonlConfig {
        JsonlConfig {
            path: self.jsonl_path.clone().unwrap_or_else(default_jsonl_path),
            fallback_path: self.fallback_path.clone(),
            max_size_bytes: self.max_size_bytes,
            max_rotated_files: self.max_rotated_files,
            ..JsonlConfig::default()
        }
    }
}

/// On-disk format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` is JSON; anything else is TOML.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl LoadTestConfig {
    /// Load a config file, apply env overrides, validate.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MlxError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|source| MlxError::io(path, source))?;
        let mut cfg = Self::parse(&raw, ConfigFormat::from_path(path))?;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without env overrides or validation.
    pub fn parse(raw: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Toml => Ok(toml::from_str(raw)?),
            ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| MlxError::ConfigParse {
                context: "json",
                details: e.to_string(),
            }),
        }
    }

    /// Deterministic FNV-1a hash of the effective config, for the activity log.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// Threshold names the evaluator does not know.
    pub fn unknown_thresholds(&self) -> impl Iterator<Item = &str> {
        self.thresholds
            .keys()
            .map(String::as_str)
            .filter(|name| name.parse::<ThresholdMetric>().is_err())
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MLX_TEST_NAME") {
            self.test.name = raw;
        }
        if let Some(raw) = lookup("MLX_DURATION_SECS") {
            self.test.duration_secs = parse_env("MLX_DURATION_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MLX_MAX_USERS") {
            self.virtual_users.max = parse_env("MLX_MAX_USERS", &raw)?;
        }
        if let Some(raw) = lookup("MLX_RAMP_UP_SECS") {
            self.virtual_users.ramp_up_secs = parse_env("MLX_RAMP_UP_SECS", &raw)?;
        }
        if let Some(raw) = lookup("MLX_TICK_MS") {
            self.virtual_users.tick_ms = parse_env("MLX_TICK_MS", &raw)?;
        }
        if let Some(raw) = lookup("MLX_METRICS_INTERVAL_MS") {
            self.metrics.interval_ms = parse_env("MLX_METRICS_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("MLX_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.test.name.trim().is_empty() {
            return Err(MlxError::invalid_config("test.name must not be empty"));
        }
        if self.test.duration_secs == 0 {
            return Err(MlxError::invalid_config("test.duration_secs must be > 0"));
        }
        if self.test.duration_secs > MAX_RUN_DURATION.as_secs() {
            return Err(MlxError::invalid_config(format!(
                "test.duration_secs must be at most {}",
                MAX_RUN_DURATION.as_secs()
            )));
        }
        if self.virtual_users.max == 0 {
            return Err(MlxError::invalid_config("virtual_users.max must be >= 1"));
        }
        if self.virtual_users.tick_ms == 0 {
            return Err(MlxError::invalid_config("virtual_users.tick_ms must be > 0"));
        }
        if self.metrics.interval_ms == 0 {
            return Err(MlxError::invalid_config("metrics.interval_ms must be > 0"));
        }

        if self.platforms.is_empty() {
            return Err(MlxError::invalid_config("at least one [[platforms]] entry is required"));
        }
        for (idx, platform) in self.platforms.iter().enumerate() {
            if platform.app.trim().is_empty() {
                return Err(MlxError::invalid_config(format!(
                    "platforms[{idx}] ({}) has an empty app reference",
                    platform.kind
                )));
            }
        }

        if self.scenarios.is_empty() {
            return Err(MlxError::invalid_config("at least one [[scenarios]] entry is required"));
        }
        let mut seen = BTreeSet::new();
        for scenario in &self.scenarios {
            if scenario.name.trim().is_empty() {
                return Err(MlxError::invalid_config("scenario names must not be empty"));
            }
            if !seen.insert(scenario.name.as_str()) {
                return Err(MlxError::invalid_config(format!(
                    "duplicate scenario name {:?}",
                    scenario.name
                )));
            }
        }
        if self.scenarios.iter().all(|s| s.weight == 0) {
            return Err(MlxError::invalid_config(
                "all scenario weights are zero; at least one must be positive",
            ));
        }

        for (name, limit) in &self.thresholds {
            if !limit.is_finite() {
                return Err(MlxError::invalid_config(format!(
                    "threshold {name} must be finite, got {limit}"
                )));
            }
        }

        self.weighted_scenarios().map(|_| ())
    }

    /// Typed scenarios. Fails on unknown action kinds or bad parameters.
    pub fn weighted_scenarios(&self) -> Result<Vec<WeightedScenario>> {
        self.scenarios
            .iter()
            .map(|sc| {
                let actions = sc
                    .actions
                    .iter()
                    .map(|a| Action::parse(&sc.name, &a.kind, &a.params))
                    .collect::<Result<Vec<_>>>()?;
                Ok(WeightedScenario::new(
                    ScenarioDefinition {
                        name: sc.name.clone(),
                        actions,
                    },
                    sc.weight,
                ))
            })
            .collect()
    }

    /// Convert into the engine's plan.
    pub fn to_plan(&self) -> Result<LoadTestPlan> {
        Ok(LoadTestPlan {
            name: self.test.name.clone(),
            targets: self.platforms.clone(),
            scenarios: self.weighted_scenarios()?,
            max_users: self.virtual_users.max,
            ramp_up: Duration::from_secs(self.virtual_users.ramp_up_secs),
            duration: Duration::from_secs(self.test.duration_secs),
            tick: Duration::from_millis(self.virtual_users.tick_ms),
            sampler: SamplerConfig {
                interval: Duration::from_millis(self.metrics.interval_ms),
                collect: self.metrics.collect.clone(),
            },
            thresholds: self.thresholds.clone(),
            config_hash: self.stable_hash().ok(),
        })
    }
}

/// Commented starter config written by `mlx init`.
pub const SAMPLE_CONFIG: &str = r#"# mobileload test plan

[test]
name = "My Performance Test"
duration_secs = 300

[virtual_users]
max = 10
ramp_up_secs = 30
tick_ms = 1000

[metrics]
interval_ms = 1000
collect = ["cpu", "memory", "battery", "network"]

[logging]
# jsonl_path = "./mlx-activity.jsonl"

[[platforms]]
kind = "android"
app = "./app-release.apk"
devices = ["emulator-5554"]

[platforms.capabilities]
appium_server_url = "http://localhost:4723"

[[scenarios]]
name = "Main Flow"
weight = 100

[[scenarios.actions]]
kind = "tap"
id = "buttonId"

[[scenarios.actions]]
kind = "wait"
seconds = 2

[[scenarios.actions]]
kind = "scroll"
direction = "down"
duration = 1

[thresholds]
cpu_max = 80
memory_max = 300
response_time_p95 = 2000
error_rate_max = 5
"#;

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| MlxError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
