use serde::{Deserialize, Serialize};

use crate::domain::errors::TallyError;
use crate::domain::numbering::{BallotNumberGeneration, BundleNumberMode};

// ============================================================================
// Political Business Result Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultState {
    Initial,
    SubmissionOngoing,
    SubmissionDone,
    ReadyForCorrection,
    CorrectionDone,
    AuditedTentatively,
    Plausibilised,
}

impl ResultState {
    /// States in which bundles may be created and edited
    pub fn accepts_bundles(self) -> bool {
        matches!(self, ResultState::SubmissionOngoing | ResultState::ReadyForCorrection)
    }

    /// States in which the published flag may be changed
    pub fn is_audited(self) -> bool {
        matches!(self, ResultState::AuditedTentatively | ResultState::Plausibilised)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoliticalBusinessType {
    Vote,
    ProportionalElection,
    MajorityElection,
}

impl PoliticalBusinessType {
    pub fn is_election(self) -> bool {
        !matches!(self, PoliticalBusinessType::Vote)
    }
}

/// How the counting circle enters its ballots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryParams {
    pub ballot_bundle_size: Option<u32>,
    pub ballot_bundle_sample_size: u32,
    pub bundle_number_mode: BundleNumberMode,
    pub ballot_number_generation: BallotNumberGeneration,
}

impl EntryParams {
    pub fn validate(&self) -> Result<(), TallyError> {
        if self.ballot_bundle_size == Some(0) {
            return Err(TallyError::invalid_argument("bundle size must be positive"));
        }
        if self.ballot_number_generation == BallotNumberGeneration::ContinuousForAllBundles
            && self.ballot_bundle_size.is_none()
        {
            return Err(TallyError::invalid_argument(
                "continuous ballot numbering requires a bundle size",
            ));
        }
        if let Some(size) = self.ballot_bundle_size {
            if self.ballot_bundle_sample_size > size {
                return Err(TallyError::invalid_argument(
                    "sample size must not exceed the bundle size",
                ));
            }
        }
        Ok(())
    }
}

impl Default for EntryParams {
    fn default() -> Self {
        Self {
            ballot_bundle_size: Some(25),
            ballot_bundle_sample_size: 2,
            bundle_number_mode: BundleNumberMode::Automatic,
            ballot_number_generation: BallotNumberGeneration::RestartForEachBundle,
        }
    }
}

/// Bundle review progress of a result, as seen by the read model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleProgress {
    pub not_reviewed_or_deleted: u32,
    pub reviewed: u32,
    pub deleted: u32,
}

impl BundleProgress {
    pub fn all_reviewed_or_deleted(&self) -> bool {
        self.not_reviewed_or_deleted == 0
    }

    /// Nothing was ever reviewed and nothing is waiting for review
    pub fn nothing_to_review(&self) -> bool {
        self.all_reviewed_or_deleted() && self.reviewed == 0
    }
}

/// Review status of a bundle as its result counts it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleReviewStatus {
    /// Numbered, in entry, in correction or waiting for review
    Pending,
    Reviewed,
    Deleted,
}

/// What a result knows about one bundle it issued a number to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedBundle {
    pub number: u32,
    pub status: BundleReviewStatus,
    /// Bundle stream version `status` refers to
    pub bundle_version: i64,
    /// Recorded before the bundle's own events were appended
    pub reserved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_accepting_bundles() {
        assert!(ResultState::SubmissionOngoing.accepts_bundles());
        assert!(ResultState::ReadyForCorrection.accepts_bundles());
        assert!(!ResultState::Initial.accepts_bundles());
        assert!(!ResultState::SubmissionDone.accepts_bundles());
        assert!(!ResultState::CorrectionDone.accepts_bundles());
        assert!(!ResultState::Plausibilised.accepts_bundles());
    }

    #[test]
    fn test_continuous_entry_needs_bundle_size() {
        let params = EntryParams {
            ballot_bundle_size: None,
            ballot_number_generation: BallotNumberGeneration::ContinuousForAllBundles,
            ..EntryParams::default()
        };
        assert!(matches!(params.validate(), Err(TallyError::InvalidArgument(_))));
    }

    #[test]
    fn test_sample_size_bounded_by_bundle_size() {
        let params = EntryParams {
            ballot_bundle_size: Some(2),
            ballot_bundle_sample_size: 3,
            ..EntryParams::default()
        };
        assert!(params.validate().is_err());
        assert!(EntryParams::default().validate().is_ok());
    }

    #[test]
    fn test_bundle_progress() {
        let pending = BundleProgress { not_reviewed_or_deleted: 1, reviewed: 0, deleted: 0 };
        assert!(!pending.all_reviewed_or_deleted());

        let deleted_only = BundleProgress { not_reviewed_or_deleted: 0, reviewed: 0, deleted: 2 };
        assert!(deleted_only.nothing_to_review());

        let reviewed = BundleProgress { not_reviewed_or_deleted: 0, reviewed: 1, deleted: 0 };
        assert!(reviewed.all_reviewed_or_deleted());
        assert!(!reviewed.nothing_to_review());
    }
}
