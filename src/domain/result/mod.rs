// ============================================================================
// Result Domain - Political Business Result Aggregate
// ============================================================================
//
// One result per political business and counting circle:
// - Value objects (ResultState, EntryParams, BundleProgress)
// - Events (ResultInitialized, ResultSubmissionFinished, ...)
// - Commands (StartSubmission, FlagForCorrection, GenerateBundleNumber, ...)
// - Aggregate (submission state machine, bundle-number sequence, bundle review tracking)
// - Command Handler (ResultCommandHandler)
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
