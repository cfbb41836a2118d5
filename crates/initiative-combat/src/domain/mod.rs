//! Domain layer: aggregates, value types and change events.

pub mod combatant;
pub mod encounter;
pub mod events;
pub mod record;
pub mod rolls;
pub mod snapshot;
pub mod turn_order;
