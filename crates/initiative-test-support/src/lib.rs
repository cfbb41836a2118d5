//! Shared test mocks and utilities for the Initiative combat tracker.

mod clock;
mod logging;
mod repository;
mod roller;

pub use clock::FixedClock;
pub use logging::init_tracing;
pub use repository::{FailingEncounterRepository, RecordingEncounterRepository};
pub use roller::{FailingRoller, GatedRoller, PendingRoller, ScriptedRoller, SequenceRoller};
