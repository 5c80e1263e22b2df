// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// GENERIC, reusable event sourcing infrastructure. No tabulation types live
// here; results and bundles are in src/domain/.
//
// ============================================================================

pub mod aggregate;
pub mod event;
pub mod signing;

// Re-export core types for convenience
pub use aggregate::Aggregate;
pub use event::{DomainEvent, EventEnvelope, serialize_event, deserialize_event};
pub use signing::EventSigner;
