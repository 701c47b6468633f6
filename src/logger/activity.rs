//! Activity logger: a dedicated thread owns the `JsonlWriter`; workers, the
//! scheduler and the sampler send `ActivityEvent`s over a bounded crossbeam
//! channel. `try_send()` keeps virtual users from ever blocking on logging.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{MlxError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 4096;

// ──────────────────── public event type ────────────────────

/// Events emitted during a load-test run.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        test_name: String,
        max_users: usize,
        duration_secs: u64,
        config_hash: Option<String>,
    },
    RunStopped {
        test_name: String,
        reason: String,
        duration_ms: u64,
        passed: Option<bool>,
    },
    ConcurrencyRaised {
        target: usize,
        active: usize,
    },
    WorkerStarted {
        user_id: usize,
        device: Option<String>,
    },
    WorkerStopped {
        user_id: usize,
        iterations: u64,
        errors: u64,
        uptime_ms: u64,
    },
    SessionFailed {
        user_id: usize,
        device: Option<String>,
        code: String,
        message: String,
    },
    ScenarioFailed {
        user_id: usize,
        scenario: String,
        code: String,
        message: String,
    },
    SessionCloseFailed {
        user_id: usize,
        code: String,
        message: String,
    },
    ProbeFailed {
        code: String,
        message: String,
    },
    ThresholdEvaluated {
        metric: String,
        limit: f64,
        passed: Option<bool>,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to request graceful shutdown of the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Build an `Error` event from an `MlxError`.
    #[must_use]
    pub fn error(err: &MlxError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ──────────────────── public handle ────────────────────

/// Thread-safe, cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle with no logger thread behind it. Every event is discarded.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send an event to the logger thread. Non-blocking.
    ///
    /// If the channel is full the event is dropped and the dropped-events counter
    /// is incremented.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine for detached handles and during shutdown.
    }

    /// Number of events dropped due to channel back-pressure.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request graceful shutdown. Join the thread to wait for the final flush.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

impl std::fmt::Debug for ActivityLoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLoggerHandle")
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

// ──────────────────── configuration ────────────────────

/// Options for building the activity logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    /// Bounded channel capacity.
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle.
///
/// The logger thread runs until `handle.shutdown()` is called or all senders
/// are dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("mlx-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, &dropped_clone);
        })
        .map_err(|e| MlxError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    for event in rx {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            jsonl.write_entry(&LogEntry::new(EventType::Error, Severity::Warning).with_details(
                format!("{lost} activity events lost to a full channel"),
            ));
        }
        match event.to_entry() {
            Some(entry) => jsonl.write_entry(&entry),
            None => break,
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

// ──────────────────── event conversion ────────────────────

impl LogEntry {
    fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    fn with_user(mut self, user_id: usize) -> Self {
        self.user_id = Some(user_id);
        self
    }

    fn failed(mut self, code: &str, message: &str) -> Self {
        self.ok = Some(false);
        self.error_code = Some(code.to_string());
        self.error_message = Some(message.to_string());
        self
    }
}

impl ActivityEvent {
    /// The JSONL line for this event; `None` for `Shutdown`.
    fn to_entry(&self) -> Option<LogEntry> {
        let info = |kind| LogEntry::new(kind, Severity::Info);
        let warning = |kind| LogEntry::new(kind, Severity::Warning);

        let entry = match self {
            Self::RunStarted {
                test_name,
                max_users,
                duration_secs,
                config_hash,
            } => {
                let hash = config_hash
                    .as_deref()
                    .map(|h| format!(" config_hash={h}"))
                    .unwrap_or_default();
                let mut e = info(EventType::RunStart)
                    .with_details(format!("test={test_name} duration={duration_secs}s{hash}"));
                e.target_users = Some(*max_users);
                e.ok = Some(true);
                e
            }
            Self::RunStopped {
                test_name,
                reason,
                duration_ms,
                passed,
            } => {
                let mut e = info(EventType::RunStop)
                    .with_details(format!("test={test_name} reason={reason}"));
                e.duration_ms = Some(*duration_ms);
                e.ok = *passed;
                e
            }
            Self::ConcurrencyRaised { target, active } => {
                let mut e = info(EventType::ConcurrencyChange);
                e.target_users = Some(*target);
                e.active_users = Some(*active);
                e
            }
            Self::WorkerStarted { user_id, device } => {
                let mut e = info(EventType::WorkerStart).with_user(*user_id);
                e.device.clone_from(device);
                e.ok = Some(true);
                e
            }
            Self::WorkerStopped {
                user_id,
                iterations,
                errors,
                uptime_ms,
            } => {
                let mut e = info(EventType::WorkerStop)
                    .with_user(*user_id)
                    .with_details(format!("iterations={iterations} errors={errors}"));
                e.duration_ms = Some(*uptime_ms);
                e
            }
            Self::SessionFailed {
                user_id,
                device,
                code,
                message,
            } => {
                let mut e = warning(EventType::SessionFailure)
                    .with_user(*user_id)
                    .failed(code, message);
                e.device.clone_from(device);
                e
            }
            Self::ScenarioFailed {
                user_id,
                scenario,
                code,
                message,
            } => {
                let mut e = warning(EventType::ScenarioFailure)
                    .with_user(*user_id)
                    .failed(code, message);
                e.scenario = Some(scenario.clone());
                e
            }
            Self::SessionCloseFailed {
                user_id,
                code,
                message,
            } => warning(EventType::SessionCloseFailure)
                .with_user(*user_id)
                .failed(code, message),
            Self::ProbeFailed { code, message } => {
                warning(EventType::ProbeFailure).failed(code, message)
            }
            Self::ThresholdEvaluated {
                metric,
                limit,
                passed,
            } => {
                let suffix = if passed.is_none() { " unknown metric" } else { "" };
                let mut e = if *passed == Some(false) {
                    warning(EventType::ThresholdEvaluated)
                } else {
                    info(EventType::ThresholdEvaluated)
                };
                e.ok = *passed;
                e.with_details(format!("metric={metric} limit={limit}{suffix}"))
            }
            Self::Error { code, message } => {
                LogEntry::new(EventType::Error, Severity::Critical).failed(code, message)
            }
            Self::Shutdown => return None,
        };
        Some(entry)
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path, capacity: usize) -> ActivityLoggerConfig {
        ActivityLoggerConfig {
            jsonl_config: JsonlConfig {
                path: dir.join("activity.jsonl"),
                fallback_path: None,
                max_size_bytes: 10 * 1024 * 1024,
                max_rotated_files: 3,
                fsync_interval_secs: 60,
            },
            channel_capacity: capacity,
        }
    }

    #[test]
    fn spawn_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();
        handle.send(ActivityEvent::RunStarted {
            test_name: "smoke".to_string(),
            max_users: 5,
            duration_secs: 30,
            config_hash: Some("abc".to_string()),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert!(contents.contains("run_start"));
        assert!(contents.contains("config_hash=abc"));
    }

    #[test]
    fn worker_failures_carry_codes() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 64)).unwrap();

        handle.send(ActivityEvent::SessionFailed {
            user_id: 2,
            device: Some("emulator-5556".to_string()),
            code: "MLX-2001".to_string(),
            message: "refused".to_string(),
        });
        handle.send(ActivityEvent::ScenarioFailed {
            user_id: 3,
            scenario: "checkout".to_string(),
            code: "MLX-2002".to_string(),
            message: "element not found".to_string(),
        });
        handle.send(ActivityEvent::ThresholdEvaluated {
            metric: "cpu_max".to_string(),
            limit: 80.0,
            passed: Some(false),
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "session_failure");
        assert_eq!(lines[0]["device"], "emulator-5556");
        assert_eq!(lines[1]["scenario"], "checkout");
        assert_eq!(lines[1]["error_code"], "MLX-2002");
        assert_eq!(lines[2]["severity"], "warning");
        assert_eq!(lines[2]["ok"], false);
    }

    #[test]
    fn handles_cloneable_across_threads() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, join) = spawn_logger(test_config(dir.path(), 256)).unwrap();

        let senders: Vec<_> = (0..4)
            .map(|id| {
                let h = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        h.send(ActivityEvent::WorkerStarted {
                            user_id: id,
                            device: None,
                        });
                    }
                })
            })
            .collect();
        for s in senders {
            s.join().unwrap();
        }
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 40);
    }

    #[test]
    fn shutdown_has_no_log_line() {
        assert!(ActivityEvent::Shutdown.to_entry().is_none());
        let unknown = ActivityEvent::ThresholdEvaluated {
            metric: "fps_min".to_string(),
            limit: 30.0,
            passed: None,
        }
        .to_entry()
        .unwrap();
        assert_eq!(unknown.severity, Severity::Info);
        assert_eq!(unknown.details.as_deref(), Some("metric=fps_min limit=30 unknown metric"));
    }

    #[test]
    fn detached_handle_discards_silently() {
        let handle = ActivityLoggerHandle::detached();
        for _ in 0..10 {
            handle.send(ActivityEvent::ProbeFailed {
                code: "MLX-2003".to_string(),
                message: "timeout".to_string(),
            });
        }
        handle.shutdown();
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn error_event_from_mlx_error() {
        let event = ActivityEvent::error(&MlxError::invalid_config("no scenarios"));
        let entry = event.to_entry().unwrap();
        assert_eq!(entry.error_code.as_deref(), Some("MLX-1001"));
        assert_eq!(entry.severity, Severity::Critical);
    }
}
