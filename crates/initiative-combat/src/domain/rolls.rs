//! Initiative roll requests and their partial-success reports.

use initiative_core::error::RollError;
use initiative_core::roller::RollContext;
use serde::Serialize;
use uuid::Uuid;

/// Which combatants to roll for, and how.
#[derive(Debug, Clone, Default)]
pub struct RollRequest {
    /// Combatants to roll for. Duplicates are rolled once.
    pub ids: Vec<Uuid>,
    /// Formula override; the configured default is used when `None`.
    pub formula: Option<String>,
    /// Re-roll combatants that already have initiative.
    pub overwrite: bool,
}

impl RollRequest {
    /// Rolls for `ids`, skipping combatants that already have initiative.
    #[must_use]
    pub fn for_ids(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            formula: None,
            overwrite: false,
        }
    }

    /// Uses `formula` instead of the configured default.
    #[must_use]
    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// Re-rolls combatants that already have initiative.
    #[must_use]
    pub fn overwriting(mut self) -> Self {
        self.overwrite = true;
        self
    }
}

/// One roll to perform: the formula and what the roller is told.
#[derive(Debug, Clone)]
pub struct PlannedRoll {
    /// Formula to roll.
    pub formula: String,
    /// Combatant context for the roller.
    pub context: RollContext,
}

/// A roll that produced a value which was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolledInitiative {
    /// The combatant rolled for.
    pub combatant_id: Uuid,
    /// The applied initiative.
    pub initiative: f64,
}

/// A roll that failed; the batch continued without it.
#[derive(Debug, Clone, PartialEq)]
pub struct RollFailure {
    /// The combatant the roll was for.
    pub combatant_id: Uuid,
    /// What went wrong.
    pub error: RollError,
}

/// Outcome of a batch of initiative rolls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollReport {
    /// Rolls applied, in request order.
    pub succeeded: Vec<RolledInitiative>,
    /// Rolls that failed. Unknown ids come first, then roller failures in
    /// request order.
    pub failed: Vec<RollFailure>,
    /// Combatants skipped because they already had initiative.
    pub skipped: Vec<Uuid>,
}

impl RollReport {
    /// Returns `true` when no roll failed.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the failure recorded for `combatant_id`, if any.
    #[must_use]
    pub fn failure_for(&self, combatant_id: Uuid) -> Option<&RollError> {
        self.failed
            .iter()
            .find(|f| f.combatant_id == combatant_id)
            .map(|f| &f.error)
    }
}
