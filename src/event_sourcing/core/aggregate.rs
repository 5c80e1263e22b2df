use uuid::Uuid;
use anyhow::Result;
use super::event::EventEnvelope;

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. State is derived from events (not stored directly)
// 2. Commands are validated before emitting events
// 3. Events represent facts that have already happened
// 4. Aggregates enforce business invariants
// 5. All state changes flow through events
//
// `apply_event` is the reducer, `handle_command` the decision function. Both
// are pure: everything a decision needs (actor, clock, contest lock, random
// draws) arrives through the command or the context.
//
// ============================================================================

/// Generic Aggregate trait - all event-sourced aggregates implement this
///
/// Type Parameters:
/// - `Event`: The domain event type for this aggregate
/// - `Command`: The command type for this aggregate
/// - `Context`: Ambient facts a decision may depend on
/// - `Error`: The error type for business rule violations
pub trait Aggregate: Sized + Send + Sync {
    type Event;
    type Command;
    type Context;
    type Error;

    /// Blank state for an aggregate id that has no history yet
    fn empty(aggregate_id: Uuid) -> Self;

    /// Whether the creating event has been applied
    fn is_initialized(&self) -> bool;

    /// Apply an event to update state
    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error>;

    /// Handle command and emit events (business logic)
    fn handle_command(
        &self,
        command: &Self::Command,
        ctx: &Self::Context,
    ) -> Result<Vec<Self::Event>, Self::Error>;

    /// Get aggregate ID
    fn aggregate_id(&self) -> Uuid;

    /// Get current version (sequence number of the last applied event)
    fn version(&self) -> i64;

    /// Record the sequence number of the last applied envelope
    fn set_version(&mut self, version: i64);

    /// Load aggregate from event history (reconstruct from events)
    fn load_from_events(aggregate_id: Uuid, events: &[EventEnvelope<Self::Event>]) -> Result<Self>
    where
        Self::Error: std::fmt::Display,
    {
        let mut aggregate = Self::empty(aggregate_id);

        for envelope in events {
            aggregate
                .apply_event(&envelope.event_data)
                .map_err(|e| anyhow::anyhow!("Failed to apply event {}: {}", envelope.sequence_number, e))?;
            aggregate.set_version(envelope.sequence_number);
        }

        Ok(aggregate)
    }
}
