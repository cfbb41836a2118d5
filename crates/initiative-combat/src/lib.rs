//! Initiative: combat encounter bounded context.
//!
//! Responsible for tracking who takes part in an encounter, deriving the
//! turn order from initiative, advancing the round/turn pointer and
//! orchestrating initiative rolls through an injected roller.

pub mod application;
pub mod config;
pub mod domain;
