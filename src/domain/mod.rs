// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Tabulation of one counting circle's results:
// - result: submission state machine of a political business result
// - bundle: ballot entry and review in bundles
// - numbering / sampling: pure policies used by both aggregates
// - context: who acts, under which contest state
//
// This layer is completely separate from the event sourcing infrastructure.
//
// ============================================================================

pub mod errors;
pub mod context;
pub mod handling;
pub mod numbering;
pub mod sampling;
pub mod result;
pub mod bundle;

pub use errors::TallyError;
pub use context::{CommandContext, ContestLookup, ContestState, InMemoryContests};
pub use handling::{CommandError, Handled};
