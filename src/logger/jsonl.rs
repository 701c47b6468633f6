//! Run activity as JSON Lines: one self-contained object per line, written
//! with a single `write_all` so a tailing reader never sees half a line.
//!
//! If the log file cannot be opened or written the writer falls back to a
//! second file, then to `[MLX-JSONL]`-prefixed stderr, then drops lines.
//! Logging trouble never fails a run.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::errors::{MlxError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Log event types of a load-test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStart,
    RunStop,
    ConcurrencyChange,
    WorkerStart,
    WorkerStop,
    SessionFailure,
    ScenarioFailure,
    SessionCloseFailure,
    ProbeFailure,
    ThresholdEvaluated,
    Error,
}

/// A single JSONL log entry. All fields optional except `ts`, `event`, `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Virtual user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    /// Device identifier a session ran on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Scenario or run duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// MLX error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Ramp target at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_users: Option<usize>,
    /// Live (non-terminated) workers at the time of the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_users: Option<usize>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    #[must_use]
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: utc_now_millis(),
            event,
            severity,
            user_id: None,
            scenario: None,
            device: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            target_users: None,
            active_users: None,
            details: None,
        }
    }
}

/// Where log lines currently go. Only ever moves down the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLevel {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

/// Writer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Tried when `path` cannot be opened or written.
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would exceed this many bytes.
    pub max_size_bytes: u64,
    /// `activity.jsonl.1` .. `activity.jsonl.N` are kept.
    pub max_rotated_files: u32,
    pub fsync_interval_secs: u64,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: default_jsonl_path(),
            fallback_path: Some(std::env::temp_dir().join("mlx-activity.jsonl")),
            max_size_bytes: 50 * 1024 * 1024,
            max_rotated_files: 5,
            fsync_interval_secs: 5,
        }
    }
}

/// `$HOME/.local/share/mlx/activity.jsonl`, or under the temp dir without `$HOME`.
#[must_use]
pub fn default_jsonl_path() -> PathBuf {
    let home = std::env::var_os("HOME").map_or_else(std::env::temp_dir, PathBuf::from);
    home.join(".local/share/mlx/activity.jsonl")
}

/// An open log file and how much it already holds.
struct OpenLog {
    path: PathBuf,
    out: BufWriter<File>,
    size: u64,
}

impl OpenLog {
    fn open(path: &Path) -> Result<Self> {
        let (file, size) = open_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::with_capacity(64 * 1024, file),
            size,
        })
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.size += line.len() as u64;
        Ok(())
    }
}

/// Append-only JSONL writer. Never fails: errors push it down the
/// primary → fallback → stderr → discard chain.
pub struct JsonlWriter {
    config: JsonlConfig,
    level: SinkLevel,
    log: Option<OpenLog>,
    last_fsync: Instant,
}

impl JsonlWriter {
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            level: SinkLevel::Primary,
            log: None,
            last_fsync: Instant::now(),
        };
        match OpenLog::open(&writer.config.path) {
            Ok(log) => writer.log = Some(log),
            Err(e) => writer.step_down(&e.to_string()),
        }
        writer
    }

    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => eprintln!("[MLX-JSONL] cannot serialize {:?} entry: {e}", entry.event),
        }
    }

    pub fn flush(&mut self) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.out.flush();
        }
    }

    pub fn fsync(&mut self) {
        if let Some(log) = self.log.as_mut() {
            let _ = log.out.flush();
            let _ = log.out.get_ref().sync_data();
        }
        self.last_fsync = Instant::now();
    }

    #[must_use]
    pub fn level(&self) -> SinkLevel {
        self.level
    }

    /// Size of the file currently written, 0 when not writing to a file.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.log.as_ref().map_or(0, |log| log.size)
    }

    fn write_line(&mut self, line: &str) {
        loop {
            match self.level {
                SinkLevel::Primary | SinkLevel::Fallback => {
                    if self.needs_rotation(line.len()) {
                        self.rotate();
                        continue;
                    }
                    let result = match self.log.as_mut() {
                        Some(log) => log.append(line).map_err(|e| e.to_string()),
                        None => Err("log file not open".to_string()),
                    };
                    match result {
                        Ok(()) => {
                            self.maybe_fsync();
                            return;
                        }
                        Err(reason) => self.step_down(&reason),
                    }
                }
                SinkLevel::Stderr => {
                    if io::stderr().write_all(format!("[MLX-JSONL] {line}").as_bytes()).is_err() {
                        self.level = SinkLevel::Discard;
                    }
                    return;
                }
                SinkLevel::Discard => return,
            }
        }
    }

    fn needs_rotation(&self, incoming: usize) -> bool {
        self.log
            .as_ref()
            .is_some_and(|log| log.size > 0 && log.size + incoming as u64 > self.config.max_size_bytes)
    }

    fn maybe_fsync(&mut self) {
        if self.last_fsync.elapsed() >= Duration::from_secs(self.config.fsync_interval_secs) {
            self.fsync();
        }
    }

    /// Move one level down and open whatever that level needs.
    fn step_down(&mut self, reason: &str) {
        self.log = None;
        match self.level {
            SinkLevel::Primary => {
                if let Some(fallback) = self.config.fallback_path.clone() {
                    if let Ok(log) = OpenLog::open(&fallback) {
                        eprintln!(
                            "[MLX-JSONL] {} unusable ({reason}); logging to {}",
                            self.config.path.display(),
                            fallback.display()
                        );
                        self.log = Some(log);
                        self.level = SinkLevel::Fallback;
                        return;
                    }
                }
                eprintln!("[MLX-JSONL] no writable log file ({reason}); logging to stderr");
                self.level = SinkLevel::Stderr;
            }
            SinkLevel::Fallback => {
                eprintln!("[MLX-JSONL] fallback log unusable ({reason}); logging to stderr");
                self.level = SinkLevel::Stderr;
            }
            SinkLevel::Stderr | SinkLevel::Discard => self.level = SinkLevel::Discard,
        }
    }

    fn rotate(&mut self) {
        let Some(mut log) = self.log.take() else {
            return;
        };
        let _ = log.out.flush();
        let path = log.path.clone();
        drop(log);

        shift_rotated(&path, self.config.max_rotated_files);
        match OpenLog::open(&path) {
            Ok(fresh) => self.log = Some(fresh),
            Err(e) => self.step_down(&e.to_string()),
        }
    }
}

// ──────────────────────── helpers ────────────────────────

/// Rename `base.(n-1)` → `base.n` down to `base` → `base.1`, dropping the oldest.
/// With `keep == 0` the current file is simply truncated away.
fn shift_rotated(base: &Path, keep: u32) {
    if keep == 0 {
        let _ = fs::remove_file(base);
        return;
    }
    let _ = fs::remove_file(rotated_name(base, keep));
    for index in (1..keep).rev() {
        let _ = fs::rename(rotated_name(base, index), rotated_name(base, index + 1));
    }
    let _ = fs::rename(base, rotated_name(base, 1));
}

fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| MlxError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| MlxError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn utc_now_millis() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
