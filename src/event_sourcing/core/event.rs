use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use anyhow::Result;

// ============================================================================
// Event Envelope - Event Metadata
// ============================================================================
//
// Wraps domain events with the audit metadata every tabulation event carries:
// who issued it, for which tenant, when, and the signature over all of it.
//
// ============================================================================

/// Generic Event Envelope - wraps any domain event with metadata
///
/// Type Parameter:
/// - `E`: The domain event type (must implement DomainEvent trait)
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct EventEnvelope<E> {
    // Event Identity
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: i64,

    // Event Type Information
    pub event_type: String,
    pub event_version: i32,

    // Event Payload
    pub event_data: E,

    // Causation & Correlation
    pub causation_id: Option<Uuid>,
    pub correlation_id: Uuid,

    // Actor Information
    pub actor: Option<String>,
    pub tenant: Option<String>,

    // Timing
    pub timestamp: DateTime<Utc>,

    // Additional Metadata
    pub metadata: HashMap<String, String>,

    /// Hex encoded HMAC over the envelope content, see `EventSigner`.
    pub signature: Option<String>,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        aggregate_id: Uuid,
        sequence_number: i64,
        event_type: String,
        event_data: E,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            event_type,
            event_version: 1,
            event_data,
            causation_id: None,
            correlation_id,
            actor: None,
            tenant: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            signature: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_metadata(mut self, key: String, value: String) -> Self {
        self.metadata.insert(key, value);
        self
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Generic Domain Event trait
///
/// All domain events must implement this trait to be used with the event store.
/// `event_name` is the per-variant name written to the `event_type` column.
pub trait DomainEvent: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync + 'static {
    fn event_type() -> &'static str where Self: Sized;
    fn event_version() -> i32 where Self: Sized { 1 }
    fn event_name(&self) -> &'static str;
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn serialize_event<E: Serialize>(event: &E) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

pub fn deserialize_event<E: for<'de> Deserialize<'de>>(json: &str) -> Result<E> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[serde(tag = "type", content = "data")]
    enum TestEvent {
        Happened { value: u32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type() -> &'static str { "TestEvent" }
        fn event_name(&self) -> &'static str { "Happened" }
    }

    #[test]
    fn test_event_envelope_creation() {
        let aggregate_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let envelope = EventEnvelope::new(
            aggregate_id,
            1,
            "Happened".to_string(),
            TestEvent::Happened { value: 3 },
            correlation_id,
        )
        .with_actor("operator-1")
        .with_tenant("canton-sg");

        assert_eq!(envelope.aggregate_id, aggregate_id);
        assert_eq!(envelope.sequence_number, 1);
        assert_eq!(envelope.correlation_id, correlation_id);
        assert_eq!(envelope.actor.as_deref(), Some("operator-1"));
        assert_eq!(envelope.tenant.as_deref(), Some("canton-sg"));
        assert!(envelope.signature.is_none());
    }

    #[test]
    fn test_event_serialization_is_adjacently_tagged() {
        let json = serialize_event(&TestEvent::Happened { value: 7 }).unwrap();
        assert_eq!(json, r#"{"type":"Happened","data":{"value":7}}"#);

        let back: TestEvent = deserialize_event(&json).unwrap();
        assert_eq!(back, TestEvent::Happened { value: 7 });
    }
}
