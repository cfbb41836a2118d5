//! Initiative roller abstraction.
//!
//! In production the host supplies a roller backed by its own dice engine.
//! In tests a scripted implementation is injected, which keeps the tracker
//! deterministic.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::RollError;
use crate::refs::{ActorRef, TokenRef};

/// What a roller is told about the combatant it rolls for.
#[derive(Debug, Clone, PartialEq)]
pub struct RollContext {
    /// The encounter the combatant belongs to.
    pub encounter_id: Uuid,
    /// The combatant being rolled for.
    pub combatant_id: Uuid,
    /// Host actor reference.
    pub actor_ref: ActorRef,
    /// Host token reference.
    pub token_ref: TokenRef,
    /// Display name.
    pub name: String,
    /// Whether a player owns the combatant.
    pub player_owned: bool,
}

/// Produces an initiative value for a combatant from a formula.
#[async_trait]
pub trait InitiativeRoller: Send + Sync {
    /// Roll `formula` for the combatant described by `context`.
    async fn roll(&self, formula: &str, context: &RollContext) -> Result<f64, RollError>;
}

/// Adapts a synchronous function into an [`InitiativeRoller`].
pub struct FnRoller<F>(pub F);

impl<F> std::fmt::Debug for FnRoller<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnRoller")
    }
}

#[async_trait]
impl<F> InitiativeRoller for FnRoller<F>
where
    F: Fn(&str, &RollContext) -> Result<f64, RollError> + Send + Sync,
{
    async fn roll(&self, formula: &str, context: &RollContext) -> Result<f64, RollError> {
        (self.0)(formula, context)
    }
}
