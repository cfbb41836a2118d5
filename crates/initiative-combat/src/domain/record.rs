//! Persisted record shape of an encounter.
//!
//! This is the plain structure a host stores and hands back; conversion to
//! and from the aggregate lives on `Encounter`.

use initiative_core::refs::{ActorRef, SceneRef, TokenRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted form of a combatant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatantRecord {
    /// Combatant identifier.
    pub id: Uuid,
    /// Host actor reference.
    pub actor_ref: ActorRef,
    /// Host token reference.
    pub token_ref: TokenRef,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Initiative, `null` until rolled.
    pub initiative: Option<f64>,
    /// Hidden flag.
    #[serde(default)]
    pub hidden: bool,
    /// Defeated flag.
    #[serde(default)]
    pub defeated: bool,
    /// Player ownership.
    #[serde(default)]
    pub player_owned: bool,
}

/// Persisted form of an encounter. Combatants are kept in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterRecord {
    /// Encounter identifier.
    pub id: Uuid,
    /// Host scene reference.
    pub scene_ref: SceneRef,
    /// Round counter; 0 when not started.
    pub round: u32,
    /// Index into the turn order.
    pub turn: usize,
    /// Active within its scene.
    pub active: bool,
    /// Combatants in insertion order.
    pub combatants: Vec<CombatantRecord>,
}
