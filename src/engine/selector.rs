//! Weighted random scenario selection.

#![allow(missing_docs)]

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::core::errors::{MlxError, Result};
use crate::core::model::{ScenarioDefinition, WeightedScenario};

/// Picks scenario *i* with probability `weight_i / sum(positive weights)`.
///
/// Zero-weight entries are kept in the configuration but excluded here, so
/// they can never be drawn.
#[derive(Debug, Clone)]
pub struct WeightedScenarioSelector {
    scenarios: Vec<ScenarioDefinition>,
    index: WeightedIndex<u32>,
}

impl WeightedScenarioSelector {
    /// Fails with `InvalidConfig` when the set is empty or every weight is 0.
    pub fn new(weighted: &[WeightedScenario]) -> Result<Self> {
        if weighted.is_empty() {
            return Err(MlxError::invalid_config("no scenarios configured"));
        }
        let (scenarios, weights): (Vec<ScenarioDefinition>, Vec<u32>) = weighted
            .iter()
            .filter(|w| w.weight > 0)
            .map(|w| (w.scenario.clone(), w.weight))
            .unzip();
        if scenarios.is_empty() {
            return Err(MlxError::invalid_config(
                "all scenario weights are zero; at least one must be positive",
            ));
        }
        let index = WeightedIndex::new(weights)
            .map_err(|e| MlxError::invalid_config(format!("invalid scenario weights: {e}")))?;
        Ok(Self { scenarios, index })
    }

    /// Draw with the thread-local RNG.
    #[must_use]
    pub fn select(&self) -> &ScenarioDefinition {
        self.select_with(&mut rand::rng())
    }

    /// Draw with a caller-supplied RNG.
    pub fn select_with<R: Rng + ?Sized>(&self, rng: &mut R) -> &ScenarioDefinition {
        &self.scenarios[self.index.sample(rng)]
    }

    /// Number of selectable (positive-weight) scenarios.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}
