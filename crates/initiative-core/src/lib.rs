//! Initiative Core: shared abstractions for the combat tracker.
//!
//! This crate defines the traits and types the combat context depends on:
//! errors, time, opaque host references, change events, the initiative
//! roller boundary and the persistence hook. It contains no infrastructure
//! code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod refs;
pub mod repository;
pub mod roller;
