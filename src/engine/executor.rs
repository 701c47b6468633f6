//! Runs one scenario's action sequence against a live session.

#![allow(missing_docs)]

use std::thread;

use crate::core::errors::{MlxError, Result};
use crate::core::model::{Action, ScenarioDefinition};
use crate::driver::{ActionRegistry, Session};

/// Dispatches each action of a scenario in order and stops at the first
/// failure.
///
/// `wait` actions sleep on the worker thread, `custom` actions go to the
/// registered handler, everything else is handed to the session.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    actions: ActionRegistry,
}

impl ScenarioRunner {
    #[must_use]
    pub fn new(actions: ActionRegistry) -> Self {
        Self { actions }
    }

    #[must_use]
    pub fn registry(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn run(&self, session: &mut dyn Session, scenario: &ScenarioDefinition) -> Result<()> {
        for action in &scenario.actions {
            self.execute(session, action)?;
        }
        Ok(())
    }

    pub fn execute(&self, session: &mut dyn Session, action: &Action) -> Result<()> {
        match action {
            Action::Wait { duration } => {
                thread::sleep(*duration);
                Ok(())
            }
            Action::Custom { handler, params } => {
                let Some(h) = self.actions.get(handler) else {
                    return Err(MlxError::action(
                        "custom",
                        format!("no handler registered under {handler:?}"),
                    ));
                };
                h.execute(session, params)
            }
            _ => session.perform(action),
        }
    }
}
