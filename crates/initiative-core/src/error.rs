//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Failure of a single initiative roll.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RollError {
    /// The roller rejected the formula.
    #[error("invalid initiative formula `{formula}`: {reason}")]
    InvalidFormula {
        /// The formula that was rejected.
        formula: String,
        /// Why the roller rejected it.
        reason: String,
    },

    /// The roller failed for any other reason.
    #[error("roller failed: {0}")]
    Roller(String),

    /// The roller produced a value that cannot be used as initiative.
    #[error("roller produced a non-finite value")]
    NonFinite,

    /// The combatant named in the request does not exist.
    #[error("combatant not found: {0}")]
    UnknownCombatant(Uuid),

    /// The roll was cancelled before it completed.
    #[error("roll cancelled")]
    Cancelled,

    /// The roll did not complete within the configured timeout.
    #[error("roll timed out after {0} ms")]
    TimedOut(u64),
}

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum EncounterError {
    /// An encounter was not found.
    #[error("encounter not found: {0}")]
    EncounterNotFound(Uuid),

    /// A combatant was not found within its encounter.
    #[error("combatant not found: {0}")]
    CombatantNotFound(Uuid),

    /// A combatant for the same token (or with the same id) already exists.
    #[error("duplicate combatant: {0}")]
    DuplicateCombatant(String),

    /// A value was rejected by domain validation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The operation needs at least one combatant.
    #[error("encounter {0} has no combatants")]
    EmptyEncounter(Uuid),

    /// The operation needs a started encounter.
    #[error("encounter {0} has not started")]
    NotStarted(Uuid),

    /// A single initiative roll failed.
    #[error("initiative roll failed for combatant {combatant_id}: {source}")]
    RollFailed {
        /// The combatant whose roll failed.
        combatant_id: Uuid,
        /// The underlying roll failure.
        #[source]
        source: RollError,
    },

    /// More than one encounter of a scene reports active.
    #[error("activation conflict in scene {scene}: {active} active encounters")]
    ActivationConflict {
        /// The scene whose invariant was violated.
        scene: String,
        /// How many encounters reported active.
        active: usize,
    },

    /// The encounter was deleted while an operation was in flight.
    #[error("operation on encounter {0} was cancelled")]
    Cancelled(Uuid),

    /// The persistence hook failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}
