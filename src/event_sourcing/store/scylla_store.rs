use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::value::{CqlValue, Row};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use crate::event_sourcing::core::{DomainEvent, EventEnvelope, serialize_event};
use super::event_store::{EventStore, EventStoreError};

// ============================================================================
// ScyllaDB Event Store
// ============================================================================
//
// One partition per aggregate in `event_store`, clustered by sequence number.
// An append is a conditional batch of `INSERT ... IF NOT EXISTS` rows that
// all live in the aggregate's partition, so either the whole batch lands at
// the expected sequence numbers or nothing is written and the caller gets a
// `Conflict`.
//
// ============================================================================

const CREATE_EVENT_STORE_TABLE: &str = "CREATE TABLE IF NOT EXISTS event_store (
        aggregate_id uuid,
        sequence_number bigint,
        aggregate_type text,
        event_id uuid,
        event_type text,
        event_version int,
        event_data text,
        causation_id uuid,
        correlation_id uuid,
        actor text,
        tenant text,
        timestamp timestamp,
        metadata map<text, text>,
        signature text,
        PRIMARY KEY (aggregate_id, sequence_number)
    ) WITH CLUSTERING ORDER BY (sequence_number ASC)";

type EventRow = (
    Uuid,
    i64,
    Uuid,
    String,
    i32,
    String,
    Option<Uuid>,
    Uuid,
    Option<String>,
    Option<String>,
    DateTime<Utc>,
    Option<HashMap<String, String>>,
    Option<String>,
);

pub struct ScyllaEventStore<E: DomainEvent> {
    session: Arc<Session>,
    aggregate_type_name: String, // e.g. "PoliticalBusinessResult", "ResultBundle"
    _phantom: PhantomData<E>,
}

impl<E: DomainEvent> ScyllaEventStore<E> {
    pub fn new(session: Arc<Session>, aggregate_type_name: &str) -> Self {
        Self {
            session,
            aggregate_type_name: aggregate_type_name.to_string(),
            _phantom: PhantomData,
        }
    }

    /// Create the keyspace and event table when missing
    pub async fn ensure_schema(session: &Session, keyspace: &str) -> anyhow::Result<()> {
        session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
                ),
                &[],
            )
            .await?;
        session.use_keyspace(keyspace, false).await?;
        session.query_unpaged(CREATE_EVENT_STORE_TABLE, &[]).await?;

        tracing::info!(keyspace = %keyspace, "Event store schema ready");
        Ok(())
    }

    fn backend(err: impl Into<anyhow::Error>) -> EventStoreError {
        EventStoreError::Backend(err.into())
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore<E> for ScyllaEventStore<E> {
    async fn append_events(
        &self,
        aggregate_id: Uuid,
        expected_version: i64,
        events: Vec<EventEnvelope<E>>,
    ) -> Result<i64, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::EmptyAppend);
        }

        // Fast path: reject stale writers before building the batch
        let current_version = self.get_current_version(aggregate_id).await?;
        if current_version != expected_version {
            return Err(EventStoreError::Conflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let mut batch = scylla::statement::batch::Batch::default();
        let mut values: Vec<Box<dyn scylla::serialize::row::SerializeRow + Send + Sync>> = vec![];
        let mut new_version = expected_version;

        for envelope in &events {
            new_version += 1;
            let event_json = serialize_event(&envelope.event_data)?;

            batch.append_statement(
                "INSERT INTO event_store (
                    aggregate_id, sequence_number, aggregate_type, event_id, event_type,
                    event_version, event_data, causation_id, correlation_id, actor, tenant,
                    timestamp, metadata, signature
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"
            );

            values.push(Box::new((
                aggregate_id,
                new_version,
                self.aggregate_type_name.clone(),
                envelope.event_id,
                envelope.event_type.clone(),
                envelope.event_version,
                event_json,
                envelope.causation_id,
                envelope.correlation_id,
                envelope.actor.clone(),
                envelope.tenant.clone(),
                envelope.timestamp,
                envelope.metadata.clone(),
                envelope.signature.clone(),
            )));
        }

        let result = self.session.batch(&batch, values).await.map_err(Self::backend)?;

        // Conditional batches report `[applied]` in the first column
        let applied = match result.into_rows_result() {
            Ok(rows) => match rows.maybe_first_row::<Row>().map_err(Self::backend)? {
                Some(row) => matches!(row.columns.first(), Some(Some(CqlValue::Boolean(true)))),
                None => false,
            },
            Err(e) => return Err(Self::backend(e)),
        };

        if !applied {
            let actual = self.get_current_version(aggregate_id).await?;
            tracing::warn!(
                aggregate_id = %aggregate_id,
                expected_version = expected_version,
                actual_version = actual,
                "Conditional append lost the race"
            );
            return Err(EventStoreError::Conflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        tracing::info!(
            aggregate_id = %aggregate_id,
            aggregate_type = %self.aggregate_type_name,
            new_version = new_version,
            event_count = events.len(),
            "✅ Appended events to event store"
        );

        Ok(new_version)
    }

    async fn load_events_after(
        &self,
        aggregate_id: Uuid,
        after: i64,
    ) -> Result<Vec<EventEnvelope<E>>, EventStoreError> {
        let result = self.session
            .query_unpaged(
                "SELECT aggregate_id, sequence_number, event_id, event_type, event_version,
                        event_data, causation_id, correlation_id, actor, tenant, timestamp,
                        metadata, signature
                 FROM event_store
                 WHERE aggregate_id = ? AND sequence_number > ?
                 ORDER BY sequence_number ASC",
                (aggregate_id, after),
            )
            .await
            .map_err(Self::backend)?;

        let mut events = Vec::new();

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(events), // No rows
        };

        for row in rows_result.rows::<EventRow>().map_err(Self::backend)? {
            let (
                agg_id,
                sequence_number,
                event_id,
                event_type,
                event_version,
                event_data_json,
                causation_id,
                correlation_id,
                actor,
                tenant,
                timestamp,
                metadata,
                signature,
            ) = row.map_err(Self::backend)?;

            let event_data: E = serde_json::from_str(&event_data_json).map_err(Self::backend)?;

            events.push(EventEnvelope {
                event_id,
                aggregate_id: agg_id,
                sequence_number,
                event_type,
                event_version,
                event_data,
                causation_id,
                correlation_id,
                actor,
                tenant,
                timestamp,
                metadata: metadata.unwrap_or_default(),
                signature,
            });
        }

        tracing::debug!(
            aggregate_id = %aggregate_id,
            after = after,
            event_count = events.len(),
            "Loaded events"
        );
        Ok(events)
    }

    async fn get_current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let result = self.session
            .query_unpaged(
                "SELECT sequence_number FROM event_store WHERE aggregate_id = ? \
                 ORDER BY sequence_number DESC LIMIT 1",
                (aggregate_id,),
            )
            .await
            .map_err(Self::backend)?;

        let rows_result = match result.into_rows_result() {
            Ok(rows) => rows,
            Err(_) => return Ok(0), // No rows = new aggregate
        };

        match rows_result.maybe_first_row::<(i64,)>() {
            Ok(Some((version,))) => Ok(version),
            _ => Ok(0),
        }
    }
}

// Database operations (conditional append, ordered load, version lookup)
// need a running ScyllaDB node; the store contract itself is exercised
// against `InMemoryEventStore` in the unit and integration tests.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bundle::BundleEvent;
    use crate::domain::result::ResultEvent;

    fn shared<E: DomainEvent + 'static>(store: ScyllaEventStore<E>) -> Arc<dyn EventStore<E>> {
        Arc::new(store)
    }

    fn spawnable<F: std::future::Future + Send>(_future: F) {}

    // Compiles only while append and load futures are Send
    #[allow(dead_code)]
    fn append_runs_on_spawned_tasks(session: Arc<Session>, envelopes: Vec<EventEnvelope<ResultEvent>>) {
        let results = shared(ScyllaEventStore::<ResultEvent>::new(session.clone(), "PoliticalBusinessResult"));
        let bundles = shared(ScyllaEventStore::<BundleEvent>::new(session, "ResultBundle"));
        spawnable(async move {
            let _ = results.append_events(Uuid::nil(), 0, envelopes).await;
            let _ = bundles.load_events(Uuid::nil()).await;
        });
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ScyllaEventStore<ResultEvent>>();
        assert_send_sync::<ScyllaEventStore<BundleEvent>>();
    }
}
