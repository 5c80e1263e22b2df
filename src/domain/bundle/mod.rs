// ============================================================================
// Bundle Domain - Result Bundle Aggregate
// ============================================================================
//
// A bundle groups the physical ballots of one result:
// - Value objects (BundleState, BallotContent, ParentResult)
// - Events (ResultBundleCreated, ResultBundleReviewSucceeded, ...)
// - Commands (CreateBallot, SucceedReview, Delete, ...)
// - Aggregate (ballot entry, four-eyes review)
// - Command Handler (BundleCommandHandler, draws review samples)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use aggregate::*;
pub use command_handler::*;
