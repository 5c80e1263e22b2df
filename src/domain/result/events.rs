use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event_sourcing::core::DomainEvent;
use std::cmp::Ordering;

use super::value_objects::{BundleReviewStatus, EntryParams, PoliticalBusinessType, TrackedBundle};

// ============================================================================
// Political Business Result Events
// ============================================================================

/// Result Event - Union type for all result events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResultEvent {
    Initialized(ResultInitialized),
    EntryDefined(ResultEntryDefined),
    SubmissionStarted,
    SubmissionFinished,
    FlaggedForCorrection(ResultFlaggedForCorrection),
    CorrectionFinished,
    AuditedTentatively,
    Plausibilised,
    ResetToSubmissionFinished,
    ResetToAuditedTentatively,
    Published,
    Unpublished,
    BundleNumberGenerated(BundleNumberGenerated),
    BundleStatusTracked(BundleStatusTracked),
    ResultsReset,
}

impl DomainEvent for ResultEvent {
    fn event_type() -> &'static str { "PoliticalBusinessResultEvent" }

    fn event_name(&self) -> &'static str {
        match self {
            ResultEvent::Initialized(_) => "ResultInitialized",
            ResultEvent::EntryDefined(_) => "ResultEntryDefined",
            ResultEvent::SubmissionStarted => "ResultSubmissionStarted",
            ResultEvent::SubmissionFinished => "ResultSubmissionFinished",
            ResultEvent::FlaggedForCorrection(_) => "ResultFlaggedForCorrection",
            ResultEvent::CorrectionFinished => "ResultCorrectionFinished",
            ResultEvent::AuditedTentatively => "ResultAuditedTentatively",
            ResultEvent::Plausibilised => "ResultPlausibilised",
            ResultEvent::ResetToSubmissionFinished => "ResultResetToSubmissionFinished",
            ResultEvent::ResetToAuditedTentatively => "ResultResetToAuditedTentatively",
            ResultEvent::Published => "ResultPublished",
            ResultEvent::Unpublished => "ResultUnpublished",
            ResultEvent::BundleNumberGenerated(_) => "ResultBundleNumberGenerated",
            ResultEvent::BundleStatusTracked(_) => "ResultBundleStatusTracked",
            ResultEvent::ResultsReset => "ResultsReset",
        }
    }
}

// ============================================================================
// Individual Event Payloads
// ============================================================================

/// First event of every result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResultInitialized {
    pub political_business_id: Uuid,
    pub counting_circle_id: Uuid,
    pub contest_id: Uuid,
    pub business_type: PoliticalBusinessType,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResultEntryDefined {
    pub params: EntryParams,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResultFlaggedForCorrection {
    pub comment: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BundleNumberGenerated {
    pub bundle_id: Uuid,
    pub bundle_number: u32,
    pub automatic: bool,
}

/// Review status change of one bundle, appended to the result stream
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BundleStatusTracked {
    pub bundle_id: Uuid,
    pub result_epoch: u32,
    pub status: BundleReviewStatus,
    pub bundle_version: i64,
    pub reserved: bool,
}

impl BundleStatusTracked {
    /// Whether this update replaces what the result currently tracks.
    ///
    /// A newer bundle version always wins. At the same version a confirmed
    /// status replaces a reservation, and between two reservations the
    /// pending one is kept, so a bundle that may still be open keeps
    /// counting as pending.
    pub fn supersedes(&self, current: &TrackedBundle) -> bool {
        match self.bundle_version.cmp(&current.bundle_version) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match (current.reserved, self.reserved) {
                (true, false) => true,
                (true, true) => {
                    self.status == BundleReviewStatus::Pending && current.status != BundleReviewStatus::Pending
                }
                (false, _) => false,
            },
        }
    }
}
