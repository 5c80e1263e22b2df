use uuid::Uuid;

use crate::event_sourcing::core::{Aggregate, DomainEvent, EventEnvelope, EventSigner};
use crate::event_sourcing::store::EventStoreError;
use crate::utils::IsTransient;
use super::context::CommandContext;
use super::errors::TallyError;

// ============================================================================
// Shared Command Handling Pieces
// ============================================================================

/// Everything a command handler can fail with
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Domain(#[from] TallyError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("Contest lookup failed: {0}")]
    Contest(anyhow::Error),

    #[error("Event signing failed: {0}")]
    Signing(anyhow::Error),
}

impl CommandError {
    /// Stable label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Domain(e) => e.kind(),
            CommandError::Store(EventStoreError::Conflict { .. }) => "conflict",
            CommandError::Store(_) => "store",
            CommandError::NotFound { .. } => "not_found",
            CommandError::Contest(_) => "contest_lookup",
            CommandError::Signing(_) => "signing",
        }
    }

    /// The domain rejection, if this is one
    pub fn as_domain(&self) -> Option<&TallyError> {
        match self {
            CommandError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl IsTransient for CommandError {
    fn is_transient(&self) -> bool {
        // Only a lost version race is retried, the next attempt decides on fresh state
        matches!(self, CommandError::Store(EventStoreError::Conflict { .. }))
    }
}

/// Outcome of a persisted command
#[derive(Debug)]
pub struct Handled<A: Aggregate> {
    /// Stream version after the append
    pub version: i64,
    pub events: Vec<A::Event>,
    /// State with the new events applied
    pub aggregate: A,
}

/// Wrap decided events in envelopes numbered after `expected_version`,
/// stamped with the context's actor, tenant and clock, and signed when a
/// signer is configured.
pub fn build_envelopes<E: DomainEvent>(
    aggregate_id: Uuid,
    expected_version: i64,
    events: Vec<E>,
    ctx: &CommandContext,
    signer: Option<&EventSigner>,
) -> Result<Vec<EventEnvelope<E>>, CommandError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut seq = expected_version;

    for domain_event in events {
        seq += 1;
        let event_type = domain_event.event_name().to_string();

        let mut envelope = EventEnvelope::new(aggregate_id, seq, event_type, domain_event, ctx.correlation_id)
            .with_actor(ctx.actor.clone())
            .with_tenant(ctx.tenant.clone())
            .with_timestamp(ctx.now);
        envelope.event_version = E::event_version();

        if let Some(signer) = signer {
            signer.sign(&mut envelope).map_err(CommandError::Signing)?;
        }

        envelopes.push(envelope);
    }

    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Noted;

    impl DomainEvent for Noted {
        fn event_type() -> &'static str { "Noted" }
        fn event_name(&self) -> &'static str { "Noted" }
    }

    #[test]
    fn test_envelopes_numbered_after_expected_version() {
        let ctx = CommandContext::new("clerk", "municipality");
        let envelopes = build_envelopes(Uuid::new_v4(), 4, vec![Noted, Noted], &ctx, None).unwrap();

        assert_eq!(envelopes[0].sequence_number, 5);
        assert_eq!(envelopes[1].sequence_number, 6);
        assert_eq!(envelopes[0].actor.as_deref(), Some("clerk"));
        assert_eq!(envelopes[0].tenant.as_deref(), Some("municipality"));
        assert_eq!(envelopes[0].timestamp, ctx.now);
        assert!(envelopes[0].signature.is_none());
    }

    #[test]
    fn test_envelopes_signed_when_signer_present() {
        let ctx = CommandContext::new("clerk", "municipality");
        let signer = EventSigner::new(b"secret".to_vec());
        let envelopes = build_envelopes(Uuid::new_v4(), 0, vec![Noted], &ctx, Some(&signer)).unwrap();

        assert!(signer.verify(&envelopes[0]).unwrap());
    }

    #[test]
    fn test_only_conflicts_are_retried() {
        let conflict = CommandError::Store(EventStoreError::Conflict {
            aggregate_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        });
        assert!(conflict.is_transient());
        assert_eq!(conflict.kind(), "conflict");

        let rejected = CommandError::from(TallyError::NotInitialized);
        assert!(!rejected.is_transient());
        assert_eq!(rejected.kind(), "not_initialized");
    }
}
