use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope};
use super::event_store::{EventStore, EventStoreError};

// ============================================================================
// In-Memory Event Store
// ============================================================================
//
// Same contract as the ScyllaDB store: per-aggregate ordered streams and an
// expected-version check performed atomically with the append.
//
// ============================================================================

pub struct InMemoryEventStore<E: DomainEvent> {
    streams: RwLock<HashMap<Uuid, Vec<EventEnvelope<E>>>>,
}

impl<E: DomainEvent> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite a stored envelope, used to simulate tampering in tests
    #[cfg(test)]
    pub(crate) async fn replace(&self, aggregate_id: Uuid, index: usize, envelope: EventEnvelope<E>) {
        let mut streams = self.streams.write().await;
        if let Some(slot) = streams.get_mut(&aggregate_id).and_then(|s| s.get_mut(index)) {
            *slot = envelope;
        }
    }
}

impl<E: DomainEvent> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for InMemoryEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend);
        }

        let mut streams = self.streams.write().await;
        let stream = streams.entry(aggregate_id).or_default();

        let current_version = stream.last().map_or(0, |e| e.sequence_number);
        if current_version != expected_version {
            return Err(EventStoreError::Conflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut new_version = expected_version;
        let event_count = events.len();
        for mut envelope in events {
            new_version += 1;
            envelope.sequence_number = new_version;
            stream.push(envelope);
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            new_version = new_version,
            event_count = event_count,
            "Appended events to in-memory store"
        );

        Ok(new_version)
    }

    async fn load_events_after(
        &self,
        aggregate_id: Uuid,
        after: i64,
    ) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.sequence_number > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(&aggregate_id)
            .and_then(|s| s.last())
            .map_or(0, |e| e.sequence_number))
    }
}
