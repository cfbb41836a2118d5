//! Aggregate root abstraction.

use uuid::Uuid;

/// Trait for aggregate roots that record the changes they make.
///
/// Aggregates mutate their own state directly and keep a list of change
/// payloads until the owner drains them for persistence.
pub trait AggregateRoot: Send + Sync {
    /// The change payload this aggregate records.
    type Change: Clone + Send + Sync + std::fmt::Debug;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of changes applied).
    fn version(&self) -> i64;

    /// Returns changes recorded since the last drain.
    fn uncommitted_changes(&self) -> &[Self::Change];

    /// Removes and returns the recorded changes.
    fn take_uncommitted_changes(&mut self) -> Vec<Self::Change>;
}
