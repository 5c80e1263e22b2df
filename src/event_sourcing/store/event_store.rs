use async_trait::async_trait;
use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, DomainEvent, EventEnvelope};
use crate::utils::IsTransient;

// ============================================================================
// Event Store - Repository for Events
// ============================================================================
//
// Responsibilities:
// 1. Append events to the log of one aggregate (append-only)
// 2. Load event history for aggregates, optionally after a checkpoint
// 3. Ensure optimistic concurrency control
//
// Backends: `ScyllaEventStore` (production) and `InMemoryEventStore`.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, but current is {actual}")]
    Conflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("Cannot append empty event list")]
    EmptyAppend,

    #[error("Event store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl IsTransient for EventStoreError {
    fn is_transient(&self) -> bool {
        // Backend errors may be transient network failures as well
        matches!(self, EventStoreError::Conflict { .. } | EventStoreError::Backend(_))
    }
}

#[async_trait]
pub trait EventStore<E: DomainEvent>: Send + Sync {
    /// Append events with optimistic concurrency
    /// Returns the new version number after appending
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError>;

    /// Load events with a sequence number greater than `after`
    async fn load_events_after(
        &self,
        aggregate_id: Uuid,
        after: i64,
    ) -> Result<Vec<EventEnvelope<E>>, EventStoreError>;

    /// Get current version of aggregate, 0 when it has no events
    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError>;

    /// Load all events for an aggregate
    async fn load_events(&self, aggregate_id: Uuid) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        self.load_events_after(aggregate_id, 0).await
    }

    /// Check if aggregate exists
    async fn aggregate_exists(&self, aggregate_id: Uuid) -> Result<bool, EventStoreError> {
        Ok(self.get_current_version(aggregate_id).await? > 0)
    }
}

/// Replay an aggregate from the store. An unknown id yields the empty aggregate.
pub async fn load_aggregate<A, S>(store: &S, aggregate_id: Uuid) -> Result<A, EventStoreError>
where
    A: Aggregate,
    A::Event: DomainEvent,
    A::Error: std::fmt::Display,
    S: EventStore<A::Event> + ?Sized,
{
    let events = store.load_events(aggregate_id).await?;

    tracing::debug!(
        aggregate_id = %aggregate_id,
        event_count = events.len(),
        "Replaying aggregate"
    );

    Ok(A::load_from_events(aggregate_id, &events)?)
}
