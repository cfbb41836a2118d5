//! Query handlers for the combat context.
//!
//! These read an encounter under its lock and return read-only view DTOs.

use initiative_core::error::EncounterError;
use serde::Serialize;
use uuid::Uuid;

use crate::application::store::EncounterStore;
use crate::domain::encounter::Encounter;
use crate::domain::snapshot::TurnSnapshot;

/// Read-only view of one combatant in turn order.
#[derive(Debug, Serialize)]
pub struct CombatantView {
    /// The combatant identifier.
    pub combatant_id: Uuid,
    /// Display name.
    pub name: String,
    /// Rolled or assigned initiative, if any.
    pub initiative: Option<f64>,
    /// Hidden from players.
    pub hidden: bool,
    /// Out of the fight.
    pub defeated: bool,
    /// Controlled by a player.
    pub player_owned: bool,
    /// Holds the current turn.
    pub current: bool,
}

/// Read-only view of an encounter.
#[derive(Debug, Serialize)]
pub struct EncounterView {
    /// The encounter identifier.
    pub encounter_id: Uuid,
    /// Scene the encounter belongs to.
    pub scene_ref: String,
    /// Current round; 0 before combat starts.
    pub round: u32,
    /// Index into `turns`.
    pub turn: usize,
    /// Active encounter of its scene.
    pub active: bool,
    /// Combat has started.
    pub started: bool,
    /// Combatant holding the turn, if combat has started.
    pub current_combatant_id: Option<Uuid>,
    /// Combatants in turn order.
    pub turns: Vec<CombatantView>,
}

impl EncounterView {
    /// Builds the view of `encounter`.
    #[must_use]
    pub fn from_encounter(encounter: &Encounter) -> Self {
        let current = encounter.current_combatant().map(|c| c.id);
        let turns = encounter
            .turns()
            .into_iter()
            .map(|c| CombatantView {
                combatant_id: c.id,
                name: c.name.clone(),
                initiative: c.initiative,
                hidden: c.hidden,
                defeated: c.defeated,
                player_owned: c.player_owned,
                current: Some(c.id) == current,
            })
            .collect();

        Self {
            encounter_id: encounter.id,
            scene_ref: encounter.scene_ref().to_string(),
            round: encounter.round(),
            turn: encounter.turn(),
            active: encounter.is_active(),
            started: encounter.is_started(),
            current_combatant_id: current,
            turns,
        }
    }
}

/// Retrieves an encounter view by ID.
///
/// # Errors
///
/// Returns `EncounterError::EncounterNotFound` if no such encounter exists.
pub async fn get_encounter_view(
    encounter_id: Uuid,
    store: &EncounterStore,
) -> Result<EncounterView, EncounterError> {
    store
        .read(encounter_id, EncounterView::from_encounter)
        .await
}

/// Retrieves the current round, turn and turn holder of an encounter.
///
/// # Errors
///
/// Returns `EncounterError::EncounterNotFound` if no such encounter exists.
pub async fn get_turn_snapshot(
    encounter_id: Uuid,
    store: &EncounterStore,
) -> Result<TurnSnapshot, EncounterError> {
    store.read(encounter_id, Encounter::snapshot).await
}
