//! Combatant entries within an encounter.

use initiative_core::refs::{ActorRef, TokenRef};
use initiative_core::roller::RollContext;
use uuid::Uuid;

/// A single participant in an encounter.
#[derive(Debug, Clone, PartialEq)]
pub struct Combatant {
    /// Identifier, unique within the owning encounter.
    pub id: Uuid,
    /// Host actor this combatant represents.
    pub actor_ref: ActorRef,
    /// Host token this combatant is placed as.
    pub token_ref: TokenRef,
    /// Display name, used to break initiative ties.
    pub name: String,
    /// Initiative value; `None` until rolled or set.
    pub initiative: Option<f64>,
    /// Hidden from players.
    pub hidden: bool,
    /// Marked as defeated.
    pub defeated: bool,
    /// Owned by a player rather than the game master.
    pub player_owned: bool,
}

impl Combatant {
    /// Creates a combatant with no initiative.
    #[must_use]
    pub fn new(id: Uuid, actor_ref: ActorRef, token_ref: TokenRef, name: impl Into<String>) -> Self {
        Self {
            id,
            actor_ref,
            token_ref,
            name: name.into(),
            initiative: None,
            hidden: false,
            defeated: false,
            player_owned: false,
        }
    }

    /// Returns `true` once an initiative value has been set.
    #[must_use]
    pub fn has_initiative(&self) -> bool {
        self.initiative.is_some()
    }

    /// Builds the context handed to an initiative roller.
    #[must_use]
    pub fn roll_context(&self, encounter_id: Uuid) -> RollContext {
        RollContext {
            encounter_id,
            combatant_id: self.id,
            actor_ref: self.actor_ref.clone(),
            token_ref: self.token_ref.clone(),
            name: self.name.clone(),
            player_owned: self.player_owned,
        }
    }
}

/// Parameters for adding a combatant.
#[derive(Debug, Clone)]
pub struct NewCombatant {
    /// Host actor reference.
    pub actor_ref: ActorRef,
    /// Host token reference; must be unique within the encounter.
    pub token_ref: TokenRef,
    /// Display name.
    pub name: String,
    /// Start hidden.
    pub hidden: bool,
    /// Owned by a player.
    pub player_owned: bool,
}

impl NewCombatant {
    /// A visible, game-master-owned combatant.
    #[must_use]
    pub fn new(actor_ref: ActorRef, token_ref: TokenRef, name: impl Into<String>) -> Self {
        Self {
            actor_ref,
            token_ref,
            name: name.into(),
            hidden: false,
            player_owned: false,
        }
    }

    /// Marks the combatant as player-owned.
    #[must_use]
    pub fn player_owned(mut self) -> Self {
        self.player_owned = true;
        self
    }

    /// Marks the combatant as hidden.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Partial update of a combatant's descriptive flags.
///
/// Initiative is changed through `set_initiative` / `clear_initiative`.
#[derive(Debug, Clone, Default)]
pub struct CombatantUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New hidden flag.
    pub hidden: Option<bool>,
    /// New defeated flag.
    pub defeated: Option<bool>,
    /// New player ownership.
    pub player_owned: Option<bool>,
}

impl CombatantUpdate {
    /// Returns `true` when the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.hidden.is_none()
            && self.defeated.is_none()
            && self.player_owned.is_none()
    }

    pub(crate) fn apply_to(&self, combatant: &mut Combatant) {
        if let Some(name) = &self.name {
            combatant.name.clone_from(name);
        }
        if let Some(hidden) = self.hidden {
            combatant.hidden = hidden;
        }
        if let Some(defeated) = self.defeated {
            combatant.defeated = defeated;
        }
        if let Some(player_owned) = self.player_owned {
            combatant.player_owned = player_owned;
        }
    }
}
