use uuid::Uuid;

use crate::domain::context::CommandContext;
use crate::domain::numbering::BallotNumbering;
use crate::domain::result::PoliticalBusinessType;
use super::value_objects::{BallotContent, ParentResult};

// ============================================================================
// Result Bundle Commands - Represent user intent
// ============================================================================

#[derive(Debug, Clone)]
pub enum BundleCommand {
    Create {
        result_id: Uuid,
        result_epoch: u32,
        bundle_number: u32,
        list_id: Option<Uuid>,
        numbering: BallotNumbering,
        sample_size: u32,
        business_type: PoliticalBusinessType,
    },
    CreateBallot {
        content: BallotContent,
    },
    UpdateBallot {
        ballot_number: u32,
        content: BallotContent,
    },
    DeleteBallot {
        ballot_number: u32,
    },
    /// `sample` is drawn by the command handler
    SubmissionFinished {
        sample: Vec<u32>,
    },
    CorrectionFinished {
        sample: Vec<u32>,
    },
    RejectReview,
    SucceedReview,
    ResetToSubmissionFinished,
    Delete,
}

impl BundleCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BundleCommand::Create { .. } => "CreateBundle",
            BundleCommand::CreateBallot { .. } => "CreateBallot",
            BundleCommand::UpdateBallot { .. } => "UpdateBallot",
            BundleCommand::DeleteBallot { .. } => "DeleteBallot",
            BundleCommand::SubmissionFinished { .. } => "BundleSubmissionFinished",
            BundleCommand::CorrectionFinished { .. } => "BundleCorrectionFinished",
            BundleCommand::RejectReview => "RejectBundleReview",
            BundleCommand::SucceedReview => "SucceedBundleReview",
            BundleCommand::ResetToSubmissionFinished => "ResetBundleToSubmissionFinished",
            BundleCommand::Delete => "DeleteBundle",
        }
    }
}

/// Decision context of a bundle command
#[derive(Debug, Clone)]
pub struct BundleContext {
    pub command: CommandContext,
    pub parent: ParentResult,
}
