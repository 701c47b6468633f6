//! Shared data model: scenarios, typed actions, platform targets, worker state,
//! recorded outcomes and device samples.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::errors::{MlxError, Result};

/// Free-form parameters attached to an action or capability map.
pub type ActionParams = BTreeMap<String, Value>;

const DEFAULT_LOCATOR_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WAIT: Duration = Duration::from_secs(1);
const DEFAULT_GESTURE: Duration = Duration::from_secs(1);

// ──────────────────── platform ────────────────────

/// Mobile platform family of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Android,
    Ios,
}

impl PlatformKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
        }
    }

    /// Automation backend conventionally used for this platform.
    #[must_use]
    pub const fn automation_name(self) -> &'static str {
        match self {
            Self::Android => "UiAutomator2",
            Self::Ios => "XCUITest",
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = MlxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            other => Err(MlxError::invalid_config(format!(
                "unsupported platform {other:?} (expected android or ios)"
            ))),
        }
    }
}

/// One application under test on one platform, with its device pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub kind: PlatformKind,
    /// App artifact reference (apk/ipa path, bundle id, ...).
    pub app: String,
    /// Ordered device identifiers. Empty means "whatever the driver picks".
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub capabilities: ActionParams,
}

impl PlatformTarget {
    #[must_use]
    pub fn new(kind: PlatformKind, app: impl Into<String>) -> Self {
        Self {
            kind,
            app: app.into(),
            devices: Vec::new(),
            capabilities: ActionParams::new(),
        }
    }

    #[must_use]
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_capability(mut self, key: impl Into<String>, value: Value) -> Self {
        self.capabilities.insert(key.into(), value);
        self
    }
}

// ──────────────────── actions ────────────────────

/// Strategy used to find the UI element an action targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum LocatorStrategy {
    Id(String),
    Xpath(String),
    AccessibilityId(String),
    ClassName(String),
}

/// Element locator plus how long the driver may wait for it to appear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub timeout: Duration,
}

impl Locator {
    #[must_use]
    pub fn id(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::Id(value.into()),
            timeout: DEFAULT_LOCATOR_TIMEOUT,
        }
    }

    #[must_use]
    pub fn accessibility_id(value: impl Into<String>) -> Self {
        Self {
            strategy: LocatorStrategy::AccessibilityId(value.into()),
            timeout: DEFAULT_LOCATOR_TIMEOUT,
        }
    }

    /// Extract a locator from action parameters. Key precedence:
    /// `id`, `xpath`, `accessibility_id`, `class_name`.
    fn from_params(params: &ActionParams) -> Result<Option<Self>> {
        let strategy = if let Some(v) = str_param(params, "id") {
            LocatorStrategy::Id(v)
        } else if let Some(v) = str_param(params, "xpath") {
            LocatorStrategy::Xpath(v)
        } else if let Some(v) = str_param(params, "accessibility_id") {
            LocatorStrategy::AccessibilityId(v)
        } else if let Some(v) = str_param(params, "class_name") {
            LocatorStrategy::ClassName(v)
        } else {
            return Ok(None);
        };
        let timeout = duration_param(params, "timeout")?.unwrap_or(DEFAULT_LOCATOR_TIMEOUT);
        Ok(Some(Self { strategy, timeout }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// A single step of a scenario. The set of kinds is closed; plugins hook in
/// through `Custom`, resolved against an explicit handler registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Tap {
        locator: Locator,
    },
    Input {
        text: String,
        /// `None` types into the currently focused element.
        locator: Option<Locator>,
    },
    Wait {
        duration: Duration,
    },
    Scroll {
        direction: ScrollDirection,
        duration: Duration,
    },
    Swipe {
        start_x: i64,
        start_y: i64,
        end_x: i64,
        end_y: i64,
        duration: Duration,
    },
    Back,
    Custom {
        handler: String,
        params: ActionParams,
    },
}

impl Action {
    /// Stable tag for logs and error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tap { .. } => "tap",
            Self::Input { .. } => "input",
            Self::Wait { .. } => "wait",
            Self::Scroll { .. } => "scroll",
            Self::Swipe { .. } => "swipe",
            Self::Back => "back",
            Self::Custom { .. } => "custom",
        }
    }

    /// Build a typed action from a kind tag and its parameter map.
    ///
    /// `scenario` is only used to give errors context.
    pub fn parse(scenario: &str, kind: &str, params: &ActionParams) -> Result<Self> {
        let invalid = |details: String| {
            MlxError::invalid_config(format!("scenario {scenario:?}, action {kind}: {details}"))
        };

        match kind.trim().to_ascii_lowercase().as_str() {
            "tap" => {
                let locator = Locator::from_params(params)?
                    .ok_or_else(|| invalid("no valid locator provided".to_string()))?;
                Ok(Self::Tap { locator })
            }
            "input" => Ok(Self::Input {
                text: str_param(params, "text").unwrap_or_default(),
                locator: Locator::from_params(params)?,
            }),
            "wait" => {
                let duration = match duration_param(params, "seconds")? {
                    Some(d) => Some(d),
                    None => duration_param(params, "timeout")?,
                };
                Ok(Self::Wait {
                    duration: duration.unwrap_or(DEFAULT_WAIT),
                })
            }
            "scroll" => {
                let direction = match str_param(params, "direction").as_deref() {
                    None | Some("down") => ScrollDirection::Down,
                    Some("up") => ScrollDirection::Up,
                    Some(other) => return Err(invalid(format!("invalid direction {other:?}"))),
                };
                Ok(Self::Scroll {
                    direction,
                    duration: duration_param(params, "duration")?.unwrap_or(DEFAULT_GESTURE),
                })
            }
            "swipe" => {
                let coord = |key: &str| {
                    params
                        .get(key)
                        .and_then(Value::as_i64)
                        .ok_or_else(|| invalid(format!("missing integer coordinate {key}")))
                };
                Ok(Self::Swipe {
                    start_x: coord("start_x")?,
                    start_y: coord("start_y")?,
                    end_x: coord("end_x")?,
                    end_y: coord("end_y")?,
                    duration: duration_param(params, "duration")?.unwrap_or(DEFAULT_GESTURE),
                })
            }
            "back" => Ok(Self::Back),
            "custom" => {
                let handler = str_param(params, "handler")
                    .ok_or_else(|| invalid("custom action requires a handler name".to_string()))?;
                let mut rest = params.clone();
                rest.remove("handler");
                Ok(Self::Custom {
                    handler,
                    params: rest,
                })
            }
            _ => Err(MlxError::UnknownActionKind {
                scenario: scenario.to_string(),
                kind: kind.to_string(),
            }),
        }
    }
}

fn str_param(params: &ActionParams, key: &str) -> Option<String> {
    params.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn duration_param(params: &ActionParams, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    let secs = raw.as_f64().ok_or_else(|| {
        MlxError::invalid_config(format!("{key} must be a number of seconds, got {raw}"))
    })?;
    Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
        MlxError::invalid_config(format!(
            "{key} must be a finite, non-negative number of seconds, got {secs}"
        ))
    })
}

// ──────────────────── scenarios ────────────────────

/// Named, ordered action sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub name: String,
    pub actions: Vec<Action>,
}

impl ScenarioDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    /// Builder-style append, mirroring how scenarios are scripted by hand.
    #[must_use]
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Handler names referenced by `Custom` actions.
    pub fn custom_handlers(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().filter_map(|action| match action {
            Action::Custom { handler, .. } => Some(handler.as_str()),
            _ => None,
        })
    }
}

/// A scenario with its relative selection weight. Weight 0 disables it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedScenario {
    pub scenario: ScenarioDefinition,
    pub weight: u32,
}

impl WeightedScenario {
    #[must_use]
    pub fn new(scenario: ScenarioDefinition, weight: u32) -> Self {
        Self { scenario, weight }
    }
}

// ──────────────────── virtual users ────────────────────

/// Lifecycle of one virtual user. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl WorkerStatus {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Terminated => 4,
        }
    }

    #[must_use]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Terminated,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

/// Per-worker bookkeeping, owned and mutated by the worker thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualUserState {
    pub id: usize,
    pub platform: PlatformKind,
    pub device: Option<String>,
    pub status: WorkerStatus,
    /// Scenario iterations that completed without error.
    pub actions_executed: u64,
    /// Session and scenario failures.
    pub errors: u64,
    /// Scenario iterations attempted, successful or not.
    #[serde(default)]
    pub iterations: u64,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl VirtualUserState {
    #[must_use]
    pub fn new(id: usize, platform: PlatformKind, device: Option<String>) -> Self {
        Self {
            id,
            platform,
            device,
            status: WorkerStatus::Idle,
            actions_executed: 0,
            errors: 0,
            iterations: 0,
            last_error: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Percentage of iterations that succeeded; 0 when nothing ran.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.actions_executed.min(self.iterations) as f64 / self.iterations as f64 * 100.0
    }

    /// Wall-clock time between session start and termination.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        match (self.started_at, self.stopped_at) {
            (Some(start), Some(stop)) => (stop - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

// ──────────────────── recorded data ────────────────────

/// Result of one scenario iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub timestamp: DateTime<Utc>,
    pub user_id: usize,
    pub scenario: String,
    /// Seconds. Failed iterations record 0.
    pub duration_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    #[must_use]
    pub fn succeeded(user_id: usize, scenario: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            scenario: scenario.into(),
            duration_secs: elapsed.as_secs_f64(),
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(user_id: usize, scenario: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            scenario: scenario.into(),
            duration_secs: 0.0,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Category of device reading a probe may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Battery,
    Network,
}

impl MetricKind {
    pub const ALL: [Self; 4] = [Self::Cpu, Self::Memory, Self::Battery, Self::Network];
}

/// App memory footprint in MB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryReading {
    pub total: f64,
    pub heap: f64,
    pub native: f64,
    pub graphics: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    /// Charge percentage.
    pub level: f64,
    /// Celsius.
    pub temperature: f64,
    /// Millivolts.
    pub voltage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkReading {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

/// What a device probe returns from one poll. Each reading may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceReading {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryReading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkReading>,
}

impl DeviceReading {
    /// Drop every reading whose kind is not in `kinds`.
    #[must_use]
    pub fn retain(mut self, kinds: &[MetricKind]) -> Self {
        if !kinds.contains(&MetricKind::Cpu) {
            self.cpu = None;
        }
        if !kinds.contains(&MetricKind::Memory) {
            self.memory = None;
        }
        if !kinds.contains(&MetricKind::Battery) {
            self.battery = None;
        }
        if !kinds.contains(&MetricKind::Network) {
            self.network = None;
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.battery.is_none() && self.network.is_none()
    }
}

/// A timestamped device reading as stored by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub reading: DeviceReading,
}

impl DeviceSample {
    #[must_use]
    pub fn now(reading: DeviceReading) -> Self {
        Self {
            timestamp: Utc::now(),
            reading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> ActionParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn tap_prefers_id_over_other_locators() {
        let action = Action::parse(
            "login",
            "tap",
            &params(json!({"xpath": "//button", "id": "login_button"})),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Tap {
                locator: Locator::id("login_button")
            }
        );
    }

    #[test]
    fn tap_without_locator_is_rejected() {
        let err = Action::parse("login", "tap", &params(json!({}))).unwrap_err();
        assert_eq!(err.code(), "MLX-1001");
        assert!(err.to_string().contains("locator"));
    }

    #[test]
    fn locator_timeout_is_read_in_seconds() {
        let action = Action::parse(
            "s",
            "tap",
            &params(json!({"accessibility_id": "cart", "timeout": 2.5})),
        )
        .unwrap();
        let Action::Tap { locator } = action else {
            panic!("expected tap");
        };
        assert_eq!(locator.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn unknown_kind_is_typed_error() {
        let err = Action::parse("browse", "pinch", &params(json!({}))).unwrap_err();
        assert!(matches!(err, MlxError::UnknownActionKind { ref kind, .. } if kind == "pinch"));
    }

    #[test]
    fn kind_tags_are_case_insensitive() {
        let action = Action::parse("s", "BACK", &ActionParams::new()).unwrap();
        assert_eq!(action, Action::Back);
    }

    #[test]
    fn wait_accepts_seconds_or_legacy_timeout() {
        let a = Action::parse("s", "wait", &params(json!({"seconds": 0.5}))).unwrap();
        let b = Action::parse("s", "wait", &params(json!({"timeout": 2}))).unwrap();
        let c = Action::parse("s", "wait", &ActionParams::new()).unwrap();
        assert_eq!(a, Action::Wait {
            duration: Duration::from_millis(500)
        });
        assert_eq!(b, Action::Wait {
            duration: Duration::from_secs(2)
        });
        assert_eq!(c, Action::Wait {
            duration: Duration::from_secs(1)
        });
    }

    #[test]
    fn negative_wait_is_rejected() {
        let err = Action::parse("s", "wait", &params(json!({"seconds": -1.0}))).unwrap_err();
        assert_eq!(err.code(), "MLX-1001");
    }

    #[test]
    fn scroll_direction_validated() {
        let up = Action::parse("s", "scroll", &params(json!({"direction": "up"}))).unwrap();
        assert!(matches!(up, Action::Scroll { direction: ScrollDirection::Up, .. }));
        let err = Action::parse("s", "scroll", &params(json!({"direction": "left"}))).unwrap_err();
        assert!(err.to_string().contains("left"));
    }

    #[test]
    fn swipe_requires_all_coordinates() {
        let err = Action::parse(
            "s",
            "swipe",
            &params(json!({"start_x": 1, "start_y": 2, "end_x": 3})),
        )
        .unwrap_err();
        assert!(err.to_string().contains("end_y"));
    }

    #[test]
    fn custom_action_strips_handler_key() {
        let action = Action::parse(
            "s",
            "custom",
            &params(json!({"handler": "biometric", "finger": "left"})),
        )
        .unwrap();
        let Action::Custom { handler, params } = action else {
            panic!("expected custom");
        };
        assert_eq!(handler, "biometric");
        assert!(!params.contains_key("handler"));
        assert_eq!(params["finger"], json!("left"));
    }

    #[test]
    fn platform_kind_parses_case_insensitively() {
        assert_eq!("Android".parse::<PlatformKind>().unwrap(), PlatformKind::Android);
        assert_eq!(" ios ".parse::<PlatformKind>().unwrap(), PlatformKind::Ios);
        assert!("windows".parse::<PlatformKind>().is_err());
    }

    #[test]
    fn worker_status_round_trips_through_u8() {
        for status in [
            WorkerStatus::Idle,
            WorkerStatus::Starting,
            WorkerStatus::Running,
            WorkerStatus::Stopping,
            WorkerStatus::Terminated,
        ] {
            assert_eq!(WorkerStatus::from_u8(status.as_u8()), status);
        }
    }

    #[test]
    fn success_rate_counts_failed_iterations() {
        let mut state = VirtualUserState::new(0, PlatformKind::Android, None);
        assert!(state.success_rate().abs() < f64::EPSILON);
        state.iterations = 4;
        state.actions_executed = 3;
        state.errors = 1;
        assert!((state.success_rate() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn failed_outcome_records_zero_duration() {
        let outcome = ActionOutcome::failed(3, "checkout", "element not found");
        assert!(!outcome.success);
        assert!(outcome.duration_secs.abs() < f64::EPSILON);
        assert_eq!(outcome.error.as_deref(), Some("element not found"));
    }

    #[test]
    fn device_reading_retain_masks_unselected_kinds() {
        let reading = DeviceReading {
            cpu: Some(40.0),
            memory: Some(MemoryReading {
                total: 200.0,
                heap: 120.0,
                native: 60.0,
                graphics: 20.0,
            }),
            battery: None,
            network: None,
        };
        let masked = reading.retain(&[MetricKind::Memory]);
        assert!(masked.cpu.is_none());
        assert!(masked.memory.is_some());
        assert!(!masked.is_empty());
        assert!(reading.retain(&[]).is_empty());
    }
}
