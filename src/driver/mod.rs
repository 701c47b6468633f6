//! Collaborator contracts: automation driver, automation session, device probe,
//! and the registry of custom action handlers.
//!
//! The engine never talks to Appium, adb or Instruments directly. Anything
//! that can open a session and perform typed actions plugs in here.

#![allow(missing_docs)]

pub mod simulated;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::core::errors::Result;
use crate::core::model::{Action, ActionParams, DeviceReading, PlatformTarget};

/// Opens live automation sessions against an app on a device.
pub trait AutomationDriver: Send + Sync {
    /// Acquire a session. Failures should be `MlxError::Session`.
    fn open_session(&self, target: &PlatformTarget, device: Option<&str>)
    -> Result<Box<dyn Session>>;
}

/// One live handle to a running app instance.
///
/// `perform` is never called with `Action::Wait` (the engine sleeps itself)
/// or `Action::Custom` (routed to the [`ActionRegistry`]).
pub trait Session: Send {
    /// Execute one action. Failures should be `MlxError::Action`; timeouts
    /// for element lookup are the driver's responsibility.
    fn perform(&mut self, action: &Action) -> Result<()>;

    /// Release the session. Best-effort: callers log failures and move on.
    fn close(&mut self) -> Result<()>;
}

/// Periodically polled source of device resource readings.
pub trait DeviceProbe: Send + Sync {
    /// One poll. Failures should be `MlxError::Probe`; the sample is dropped.
    fn poll(&self) -> Result<DeviceReading>;
}

/// User-supplied implementation of a `custom` action.
pub trait ActionHandler: Send + Sync {
    fn execute(&self, session: &mut dyn Session, params: &ActionParams) -> Result<()>;
}

/// Custom action handlers, keyed by the name scenarios reference.
///
/// Built once before the run and shared read-only by every worker.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns `false` (and keeps the existing one) when
    /// the name is already taken.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> bool {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return false;
        }
        self.handlers.insert(name, handler);
        true
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
