// ============================================================================
// Projection - Read side of the tabulation
// ============================================================================
//
// - read_model: result and bundle snapshots, review counters
// - aggregation: candidate and answer tallies over reviewed bundles
// - updater: applies the event log to the read model
//
// ============================================================================

pub mod aggregation;
pub mod read_model;
pub mod updater;

pub use aggregation::{recompute_tallies, AnswerCounts, ResultTallies};
pub use read_model::{BundleSnapshot, ReadModel, ResultSnapshot};
pub use updater::{ProjectionError, ProjectionUpdater};
