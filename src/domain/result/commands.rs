use uuid::Uuid;

use crate::domain::numbering::BundleNumberRequest;
use super::events::BundleStatusTracked;
use super::value_objects::{EntryParams, PoliticalBusinessType};

// ============================================================================
// Political Business Result Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum ResultCommand {
    Initialize {
        political_business_id: Uuid,
        counting_circle_id: Uuid,
        contest_id: Uuid,
        business_type: PoliticalBusinessType,
    },
    DefineEntry {
        params: EntryParams,
    },
    StartSubmission,
    FinishSubmission,
    FlagForCorrection {
        comment: Option<String>,
    },
    FinishCorrection,
    AuditTentatively,
    Plausibilise,
    ResetToSubmissionFinished,
    ResetToAuditedTentatively,
    Publish,
    Unpublish,
    GenerateBundleNumber {
        bundle_id: Uuid,
        request: BundleNumberRequest,
    },
    /// Record a review status change of one of the result's bundles
    TrackBundle {
        update: BundleStatusTracked,
    },
    ResetResults,
}

impl ResultCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ResultCommand::Initialize { .. } => "Initialize",
            ResultCommand::DefineEntry { .. } => "DefineEntry",
            ResultCommand::StartSubmission => "StartSubmission",
            ResultCommand::FinishSubmission => "FinishSubmission",
            ResultCommand::FlagForCorrection { .. } => "FlagForCorrection",
            ResultCommand::FinishCorrection => "FinishCorrection",
            ResultCommand::AuditTentatively => "AuditTentatively",
            ResultCommand::Plausibilise => "Plausibilise",
            ResultCommand::ResetToSubmissionFinished => "ResetToSubmissionFinished",
            ResultCommand::ResetToAuditedTentatively => "ResetToAuditedTentatively",
            ResultCommand::Publish => "Publish",
            ResultCommand::Unpublish => "Unpublish",
            ResultCommand::GenerateBundleNumber { .. } => "GenerateBundleNumber",
            ResultCommand::TrackBundle { .. } => "TrackBundle",
            ResultCommand::ResetResults => "ResetResults",
        }
    }
}
