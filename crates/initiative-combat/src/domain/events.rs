//! Change events for the combat context.

use initiative_core::event::{DomainEvent, EventMetadata};
use initiative_core::refs::{ActorRef, SceneRef, TokenRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted when an encounter is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncounterCreated {
    /// The encounter identifier.
    pub encounter_id: Uuid,
    /// The scene the encounter belongs to.
    pub scene_ref: SceneRef,
}

/// Emitted when a combatant joins an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantAdded {
    /// The new combatant.
    pub combatant_id: Uuid,
    /// Host actor reference.
    pub actor_ref: ActorRef,
    /// Host token reference.
    pub token_ref: TokenRef,
    /// Display name.
    pub name: String,
}

/// Emitted when a combatant leaves an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantRemoved {
    /// The removed combatant.
    pub combatant_id: Uuid,
}

/// Emitted when a combatant's descriptive flags change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatantUpdated {
    /// The updated combatant.
    pub combatant_id: Uuid,
    /// Display name after the update.
    pub name: String,
    /// Hidden flag after the update.
    pub hidden: bool,
    /// Defeated flag after the update.
    pub defeated: bool,
    /// Player ownership after the update.
    pub player_owned: bool,
}

/// Emitted when initiative is set or cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiativeChanged {
    /// The combatant whose initiative changed.
    pub combatant_id: Uuid,
    /// The new value; `None` when cleared.
    pub initiative: Option<f64>,
}

/// Emitted whenever the round/turn pointer moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnChanged {
    /// Round after the change.
    pub round: u32,
    /// Turn index after the change.
    pub turn: usize,
    /// Combatant holding the turn, if the encounter is started.
    pub combatant_id: Option<Uuid>,
}

/// Emitted when the encounter's active flag flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationChanged {
    /// Active flag after the change.
    pub active: bool,
}

/// Change payload variants for the combat context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncounterEventKind {
    /// An encounter was created.
    EncounterCreated(EncounterCreated),
    /// A combatant joined.
    CombatantAdded(CombatantAdded),
    /// A combatant left.
    CombatantRemoved(CombatantRemoved),
    /// A combatant's flags changed.
    CombatantUpdated(CombatantUpdated),
    /// A combatant's initiative changed.
    InitiativeChanged(InitiativeChanged),
    /// Combat started at round 1.
    CombatStarted(TurnChanged),
    /// The round/turn pointer moved.
    TurnChanged(TurnChanged),
    /// Combat ended; round and turn are back to 0.
    CombatEnded,
    /// The encounter was activated or deactivated.
    ActivationChanged(ActivationChanged),
}

impl EncounterEventKind {
    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EncounterCreated(_) => "combat.encounter_created",
            Self::CombatantAdded(_) => "combat.combatant_added",
            Self::CombatantRemoved(_) => "combat.combatant_removed",
            Self::CombatantUpdated(_) => "combat.combatant_updated",
            Self::InitiativeChanged(_) => "combat.initiative_changed",
            Self::CombatStarted(_) => "combat.combat_started",
            Self::TurnChanged(_) => "combat.turn_changed",
            Self::CombatEnded => "combat.combat_ended",
            Self::ActivationChanged(_) => "combat.activation_changed",
        }
    }
}

/// Change event envelope for the combat context.
#[derive(Debug, Clone)]
pub struct EncounterEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: EncounterEventKind,
}

impl DomainEvent for EncounterEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Every payload field is a string, number, bool or null, so this cannot fail.
        serde_json::to_value(&self.kind).unwrap_or(serde_json::Value::Null)
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
