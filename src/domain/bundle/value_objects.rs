use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::errors::TallyError;
use crate::domain::result::{BundleReviewStatus, PoliticalBusinessType, ResultAggregate, ResultState};

// ============================================================================
// Result Bundle Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleState {
    InProcess,
    ReadyForReview,
    InCorrection,
    Reviewed,
    Deleted,
}

impl BundleState {
    /// Ballots may be entered, changed and removed
    pub fn is_in_entry(self) -> bool {
        matches!(self, BundleState::InProcess | BundleState::InCorrection)
    }

    /// No longer blocks the result from finishing
    pub fn is_done(self) -> bool {
        matches!(self, BundleState::Reviewed | BundleState::Deleted)
    }

    /// Status the owning result tracks for a bundle in this state
    pub fn review_status(self) -> BundleReviewStatus {
        match self {
            BundleState::Reviewed => BundleReviewStatus::Reviewed,
            BundleState::Deleted => BundleReviewStatus::Deleted,
            _ => BundleReviewStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BallotAnswer {
    Yes,
    No,
    Unspecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub question_number: u32,
    pub answer: BallotAnswer,
}

/// Election ballot: candidate lines, hand-written names and empty lines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionBallot {
    /// A candidate listed twice received two votes (accumulation)
    pub candidates: Vec<Uuid>,
    pub individual_votes: u32,
    pub empty_votes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBallot {
    pub answers: Vec<QuestionAnswer>,
}

/// Content of one physical ballot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ballot")]
pub enum BallotContent {
    Election(ElectionBallot),
    Vote(VoteBallot),
}

impl BallotContent {
    /// The ballot shape has to match the kind of business it is entered for
    pub fn validate_for(&self, business_type: PoliticalBusinessType) -> Result<(), TallyError> {
        match (self, business_type.is_election()) {
            (BallotContent::Election(_), true) => Ok(()),
            (BallotContent::Vote(vote), false) => {
                let mut seen = BTreeSet::new();
                for answer in &vote.answers {
                    if answer.question_number == 0 {
                        return Err(TallyError::invalid_argument("question numbers start at 1"));
                    }
                    if !seen.insert(answer.question_number) {
                        return Err(TallyError::invalid_argument(format!(
                            "question {} answered twice",
                            answer.question_number
                        )));
                    }
                }
                Ok(())
            }
            (BallotContent::Election(_), false) => Err(TallyError::invalid_argument(
                "election ballot entered for a vote",
            )),
            (BallotContent::Vote(_), true) => Err(TallyError::invalid_argument(
                "vote ballot entered for an election",
            )),
        }
    }
}

/// What a bundle decision needs to know about its owning result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentResult {
    pub result_id: Uuid,
    pub state: ResultState,
    pub reset_epoch: u32,
}

impl From<&ResultAggregate> for ParentResult {
    fn from(result: &ResultAggregate) -> Self {
        Self {
            result_id: result.id,
            state: result.state,
            reset_epoch: result.reset_epoch,
        }
    }
}
