use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::numbering::BallotNumbering;
use crate::domain::result::PoliticalBusinessType;
use crate::event_sourcing::core::DomainEvent;
use super::value_objects::BallotContent;

// ============================================================================
// Result Bundle Events
// ============================================================================

/// Bundle Event - Union type for all bundle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BundleEvent {
    Created(BundleCreated),
    BallotCreated(BallotEntered),
    BallotUpdated(BallotEntered),
    BallotDeleted(BallotDeleted),
    SubmissionFinished(BundleClosed),
    CorrectionFinished(BundleClosed),
    ReviewRejected,
    ReviewSucceeded,
    ResetToSubmissionFinished,
    Deleted(BundleDeleted),
    /// Marks the stream as read by a status sync; later writes decided
    /// against an older version conflict
    StatusConfirmed,
}

impl DomainEvent for BundleEvent {
    fn event_type() -> &'static str { "ResultBundleEvent" }

    fn event_name(&self) -> &'static str {
        match self {
            BundleEvent::Created(_) => "ResultBundleCreated",
            BundleEvent::BallotCreated(_) => "ResultBundleBallotCreated",
            BundleEvent::BallotUpdated(_) => "ResultBundleBallotUpdated",
            BundleEvent::BallotDeleted(_) => "ResultBundleBallotDeleted",
            BundleEvent::SubmissionFinished(_) => "ResultBundleSubmissionFinished",
            BundleEvent::CorrectionFinished(_) => "ResultBundleCorrectionFinished",
            BundleEvent::ReviewRejected => "ResultBundleReviewRejected",
            BundleEvent::ReviewSucceeded => "ResultBundleReviewSucceeded",
            BundleEvent::ResetToSubmissionFinished => "ResultBundleResetToSubmissionFinished",
            BundleEvent::Deleted(_) => "ResultBundleDeleted",
            BundleEvent::StatusConfirmed => "ResultBundleStatusConfirmed",
        }
    }
}

// ============================================================================
// Individual Event Payloads
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BundleCreated {
    pub result_id: Uuid,
    pub result_epoch: u32,
    pub bundle_number: u32,
    pub list_id: Option<Uuid>,
    pub numbering: BallotNumbering,
    pub sample_size: u32,
    pub business_type: PoliticalBusinessType,
    pub created_by: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BallotEntered {
    pub ballot_number: u32,
    pub content: BallotContent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BallotDeleted {
    pub ballot_number: u32,
}

/// Closing a bundle records the drawn sample, replay never draws again
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BundleClosed {
    pub sample_ballot_numbers: Vec<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BundleDeleted {
    pub was_reviewed: bool,
}

impl BundleEvent {
    /// Whether the set of reviewed bundles changes with this event
    pub fn affects_tallies(&self) -> bool {
        match self {
            BundleEvent::ReviewSucceeded | BundleEvent::ResetToSubmissionFinished => true,
            BundleEvent::Deleted(e) => e.was_reviewed,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{deserialize_event, serialize_event};

    #[test]
    fn test_adjacently_tagged_json() {
        let event = BundleEvent::SubmissionFinished(BundleClosed { sample_ballot_numbers: vec![2, 7] });
        let json = serialize_event(&event).unwrap();
        assert_eq!(json, r#"{"type":"SubmissionFinished","data":{"sample_ballot_numbers":[2,7]}}"#);

        let unit = serialize_event(&BundleEvent::ReviewSucceeded).unwrap();
        assert_eq!(unit, r#"{"type":"ReviewSucceeded"}"#);
        assert_eq!(deserialize_event::<BundleEvent>(&unit).unwrap(), BundleEvent::ReviewSucceeded);
    }

    #[test]
    fn test_tally_relevant_events() {
        assert!(BundleEvent::ReviewSucceeded.affects_tallies());
        assert!(BundleEvent::ResetToSubmissionFinished.affects_tallies());
        assert!(BundleEvent::Deleted(BundleDeleted { was_reviewed: true }).affects_tallies());
        assert!(!BundleEvent::Deleted(BundleDeleted { was_reviewed: false }).affects_tallies());
        assert!(!BundleEvent::ReviewRejected.affects_tallies());
        assert!(!BundleEvent::StatusConfirmed.affects_tallies());
    }
}
