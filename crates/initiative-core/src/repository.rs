//! Persistence hook abstraction.

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::EncounterError;

/// Stored representation of a change event.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate.
    pub sequence_number: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

/// Host-side persistence hook for encounters.
///
/// `R` is the persisted record shape. The tracker calls `save` after every
/// mutation that changed an encounter, passing the full record and the
/// events that produced it.
#[async_trait]
pub trait EncounterRepository<R>: Send + Sync
where
    R: Send + Sync,
{
    /// Persist the latest record of an encounter together with its new events.
    async fn save(&self, record: &R, events: &[StoredEvent]) -> Result<(), EncounterError>;

    /// Remove a deleted encounter.
    async fn delete(&self, encounter_id: Uuid) -> Result<(), EncounterError>;
}
