//! Turn snapshots and the difference between two of them.
//!
//! Hosts that redraw on turn changes keep the previous snapshot themselves
//! and compare it with the current one.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Round/turn position of an encounter at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnSnapshot {
    /// Round counter.
    pub round: u32,
    /// Turn index.
    pub turn: usize,
    /// Combatant holding the turn, if any.
    pub combatant_id: Option<Uuid>,
}

/// Direction the pointer moved between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    /// Later round, or later turn in the same round.
    Forward,
    /// Earlier round, or earlier turn in the same round.
    Backward,
    /// Same round and turn.
    Unmoved,
}

/// What changed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnChange {
    /// The earlier snapshot.
    pub previous: TurnSnapshot,
    /// The later snapshot.
    pub current: TurnSnapshot,
    /// The round number differs.
    pub round_changed: bool,
    /// The turn index differs.
    pub turn_changed: bool,
    /// A different combatant holds the turn.
    pub combatant_changed: bool,
    /// Which way the pointer moved.
    pub direction: TurnDirection,
}

impl TurnChange {
    /// Compares two snapshots of the same encounter.
    #[must_use]
    pub fn between(previous: TurnSnapshot, current: TurnSnapshot) -> Self {
        let direction = match (current.round, current.turn).cmp(&(previous.round, previous.turn)) {
            Ordering::Greater => TurnDirection::Forward,
            Ordering::Less => TurnDirection::Backward,
            Ordering::Equal => TurnDirection::Unmoved,
        };
        Self {
            previous,
            current,
            round_changed: previous.round != current.round,
            turn_changed: previous.turn != current.turn,
            combatant_changed: previous.combatant_id != current.combatant_id,
            direction,
        }
    }

    /// Returns `true` when nothing a host would redraw changed.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        !self.round_changed && !self.turn_changed && !self.combatant_changed
    }
}
