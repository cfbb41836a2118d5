//! Application layer: the encounter store, concurrent rolling and read views.

pub mod query_handlers;
pub mod rolling;
pub mod store;
