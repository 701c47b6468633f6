#![allow(dead_code)]

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use mobileload::core::errors::{MlxError, Result};
use mobileload::core::model::{Action, DeviceReading, LocatorStrategy, MemoryReading, PlatformTarget};
use mobileload::driver::{AutomationDriver, DeviceProbe, Session};

// ──────────────────── CLI harness ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_mlx") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "mlx.exe" } else { "mlx" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve mlx binary path for integration test"),
    }
}

/// Run the `mlx` binary with `args`, keeping a log of the invocation.
///
/// `envs` are added on top of the inherited environment. Activity logs go to
/// a per-case temp file unless `MLX_JSONL_PATH` is given.
pub fn run_cli_case(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("mlx-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let stamp = format!("{}-{}", sanitize(case_name), now_millis());
    let log_path = root.join(format!("{stamp}.log"));
    let jsonl_path = root.join(format!("{stamp}.jsonl"));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("MLX_JSONL_PATH", &jsonl_path)
        .env("RUST_BACKTRACE", "1");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute mlx command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── scripted collaborators ────────────────────

/// Deterministic driver for engine tests.
///
/// - opening a session on a device listed in `failing_devices` fails
/// - tapping an element whose id is `"boom"` fails
/// - every performed action sleeps `latency`
#[derive(Default)]
pub struct ScriptedDriver {
    pub failing_devices: HashSet<String>,
    pub latency: Duration,
    opened: Mutex<Vec<Option<String>>>,
    performed: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_on(mut self, device: &str) -> Self {
        self.failing_devices.insert(device.to_string());
        self
    }

    /// Devices sessions were opened on, in open order.
    pub fn opened_devices(&self) -> Vec<Option<String>> {
        self.opened.lock().clone()
    }

    pub fn performed(&self) -> usize {
        self.performed.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::Relaxed)
    }
}

impl AutomationDriver for ScriptedDriver {
    fn open_session(
        &self,
        _target: &PlatformTarget,
        device: Option<&str>,
    ) -> Result<Box<dyn Session>> {
        if let Some(d) = device.filter(|d| self.failing_devices.contains(*d)) {
            return Err(MlxError::Session {
                device: d.to_string(),
                details: "device offline".to_string(),
            });
        }
        self.opened.lock().push(device.map(str::to_string));
        Ok(Box::new(ScriptedSession {
            latency: self.latency,
            performed: Arc::clone(&self.performed),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedSession {
    latency: Duration,
    performed: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Session for ScriptedSession {
    fn perform(&mut self, action: &Action) -> Result<()> {
        self.performed.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        match action {
            Action::Tap { locator } if locator.strategy == boom() => {
                Err(MlxError::action("tap", "element boom not found"))
            }
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn boom() -> LocatorStrategy {
    LocatorStrategy::Id("boom".to_string())
}

/// Probe that always reports the same cpu and memory.
pub struct FixedProbe {
    pub cpu: f64,
    pub memory_mb: f64,
}

impl DeviceProbe for FixedProbe {
    fn poll(&self) -> Result<DeviceReading> {
        Ok(DeviceReading {
            cpu: Some(self.cpu),
            memory: Some(MemoryReading {
                total: self.memory_mb,
                heap: self.memory_mb,
                native: 0.0,
                graphics: 0.0,
            }),
            ..DeviceReading::default()
        })
    }
}
