use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::domain::errors::TallyError;
use crate::domain::numbering::{BallotNumberGeneration, BallotNumbering};
use crate::domain::result::PoliticalBusinessType;
use crate::event_sourcing::core::Aggregate;
use super::commands::{BundleCommand, BundleContext};
use super::events::*;
use super::value_objects::{BallotContent, BundleState};

// ============================================================================
// Result Bundle Aggregate - Domain Logic
// ============================================================================
//
// A bundle is a numbered batch of physical ballots entered by one user and
// reviewed by another. Guards run in this order: contest lock, parent
// result, edit permission, bundle state.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundleAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub initialized: bool,

    pub result_id: Uuid,
    pub result_epoch: u32,
    pub number: u32,
    pub list_id: Option<Uuid>,
    pub created_by: String,
    pub numbering: BallotNumbering,
    pub sample_size: u32,
    pub business_type: PoliticalBusinessType,

    // Current State (derived from events)
    pub state: BundleState,
    pub ballots: BTreeMap<u32, BallotContent>,
    pub sample_ballot_numbers: Vec<u32>,
}

impl ResultBundleAggregate {
    pub fn highest_ballot_number(&self) -> Option<u32> {
        self.ballots.keys().next_back().copied()
    }

    pub fn ballot_numbers(&self) -> Vec<u32> {
        self.ballots.keys().copied().collect()
    }

    fn ensure_parent_accepts(&self, operation: &'static str, ctx: &BundleContext) -> Result<(), TallyError> {
        if !ctx.parent.state.accepts_bundles() {
            return Err(TallyError::invalid_state(operation, ctx.parent.state));
        }
        if self.result_epoch != ctx.parent.reset_epoch {
            return Err(TallyError::InvalidState {
                operation,
                state: format!("{:?} (results were reset)", self.state),
            });
        }
        Ok(())
    }

    /// Creator edits while in entry, nobody else; the creator never touches
    /// a bundle under review.
    fn ensure_may_edit(&self, operation: &'static str, actor: &str) -> Result<(), TallyError> {
        let is_creator = actor == self.created_by;
        match self.state {
            BundleState::InProcess | BundleState::InCorrection if !is_creator => Err(
                TallyError::Permission(format!("only {} may edit bundle {}", self.created_by, self.number)),
            ),
            BundleState::ReadyForReview if is_creator => Err(TallyError::Permission(format!(
                "bundle {} is under review, its creator may not change it",
                self.number
            ))),
            // Under review nobody edits, a reviewer rejects to send it back
            state if !state.is_in_entry() => Err(TallyError::invalid_state(operation, state)),
            _ => Ok(()),
        }
    }

    fn ensure_not_creator(&self, actor: &str) -> Result<(), TallyError> {
        if actor == self.created_by {
            return Err(TallyError::Permission(format!(
                "bundle {} cannot be reviewed by its creator",
                self.number
            )));
        }
        Ok(())
    }

    fn require_state(&self, operation: &'static str, expected: BundleState) -> Result<(), TallyError> {
        if self.state != expected {
            return Err(TallyError::invalid_state(operation, self.state));
        }
        Ok(())
    }

    /// The drawn sample has to be a valid draw over the current ballots
    fn validate_sample(&self, sample: &[u32]) -> Result<(), TallyError> {
        if self.ballots.is_empty() {
            return Err(TallyError::invalid_argument(format!(
                "bundle {} has no ballots",
                self.number
            )));
        }

        let expected = (self.sample_size as usize).min(self.ballots.len());
        let distinct: BTreeSet<u32> = sample.iter().copied().collect();
        if sample.len() != expected || distinct.len() != expected {
            return Err(TallyError::invalid_argument(format!(
                "sample must contain {expected} distinct ballot numbers"
            )));
        }
        if let Some(unknown) = sample.iter().find(|n| !self.ballots.contains_key(n)) {
            return Err(TallyError::invalid_argument(format!(
                "sampled ballot {unknown} is not in bundle {}",
                self.number
            )));
        }
        Ok(())
    }

    fn closed(sample: &[u32]) -> BundleClosed {
        let mut sample_ballot_numbers = sample.to_vec();
        sample_ballot_numbers.sort_unstable();
        BundleClosed { sample_ballot_numbers }
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for ResultBundleAggregate {
    type Event = BundleEvent;
    type Command = BundleCommand;
    type Context = BundleContext;
    type Error = TallyError;

    fn empty(aggregate_id: Uuid) -> Self {
        Self {
            id: aggregate_id,
            version: 0,
            initialized: false,
            result_id: Uuid::nil(),
            result_epoch: 0,
            number: 0,
            list_id: None,
            created_by: String::new(),
            numbering: BallotNumbering {
                generation: BallotNumberGeneration::RestartForEachBundle,
                bundle_number: 0,
                bundle_size: None,
            },
            sample_size: 0,
            business_type: PoliticalBusinessType::Vote,
            state: BundleState::InProcess,
            ballots: BTreeMap::new(),
            sample_ballot_numbers: Vec::new(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        if !self.initialized && !matches!(event, BundleEvent::Created(_) | BundleEvent::StatusConfirmed) {
            return Err(TallyError::NotInitialized);
        }

        match event {
            BundleEvent::Created(e) => {
                self.initialized = true;
                self.result_id = e.result_id;
                self.result_epoch = e.result_epoch;
                self.number = e.bundle_number;
                self.list_id = e.list_id;
                self.created_by = e.created_by.clone();
                self.numbering = e.numbering;
                self.sample_size = e.sample_size;
                self.business_type = e.business_type;
                self.state = BundleState::InProcess;
            }
            BundleEvent::BallotCreated(e) | BundleEvent::BallotUpdated(e) => {
                self.ballots.insert(e.ballot_number, e.content.clone());
            }
            BundleEvent::BallotDeleted(e) => {
                self.ballots.remove(&e.ballot_number);
            }
            BundleEvent::SubmissionFinished(e) | BundleEvent::CorrectionFinished(e) => {
                self.sample_ballot_numbers = e.sample_ballot_numbers.clone();
                self.state = BundleState::ReadyForReview;
            }
            BundleEvent::ReviewRejected => self.state = BundleState::InCorrection,
            BundleEvent::ReviewSucceeded => self.state = BundleState::Reviewed,
            BundleEvent::ResetToSubmissionFinished => self.state = BundleState::ReadyForReview,
            BundleEvent::Deleted(_) => self.state = BundleState::Deleted,
            BundleEvent::StatusConfirmed => {}
        }

        Ok(())
    }

    fn handle_command(
        &self,
        command: &Self::Command,
        ctx: &Self::Context,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        ctx.command.ensure_contest_unlocked()?;

        let operation = command.name();

        if let BundleCommand::Create {
            result_id,
            result_epoch,
            bundle_number,
            list_id,
            numbering,
            sample_size,
            business_type,
        } = command
        {
            if self.initialized {
                return Err(TallyError::invalid_argument(format!("bundle {} already exists", self.id)));
            }
            // Only a status sync writes to a stream before creation
            if self.version > 0 {
                return Err(TallyError::invalid_state(operation, "abandoned bundle number"));
            }
            if !ctx.parent.state.accepts_bundles() {
                return Err(TallyError::invalid_state(operation, ctx.parent.state));
            }
            if *result_epoch != ctx.parent.reset_epoch || *result_id != ctx.parent.result_id {
                return Err(TallyError::invalid_argument("bundle does not belong to the current result"));
            }
            if numbering.bundle_number != *bundle_number {
                return Err(TallyError::invalid_argument("numbering is for a different bundle number"));
            }
            // Fails early for continuous numbering without a usable range
            numbering.first_number()?;

            return Ok(vec![BundleEvent::Created(BundleCreated {
                result_id: *result_id,
                result_epoch: *result_epoch,
                bundle_number: *bundle_number,
                list_id: *list_id,
                numbering: *numbering,
                sample_size: *sample_size,
                business_type: *business_type,
                created_by: ctx.command.actor.clone(),
            })]);
        }

        if !self.initialized {
            return Err(TallyError::NotInitialized);
        }

        self.ensure_parent_accepts(operation, ctx)?;
        let actor = ctx.command.actor.as_str();

        match command {
            BundleCommand::Create { .. } => Ok(vec![]),

            BundleCommand::CreateBallot { content } => {
                self.ensure_may_edit(operation, actor)?;
                content.validate_for(self.business_type)?;
                let ballot_number = self.numbering.next_ballot_number(self.highest_ballot_number())?;

                Ok(vec![BundleEvent::BallotCreated(BallotEntered {
                    ballot_number,
                    content: content.clone(),
                })])
            }

            BundleCommand::UpdateBallot { ballot_number, content } => {
                self.ensure_may_edit(operation, actor)?;
                if !self.ballots.contains_key(ballot_number) {
                    return Err(TallyError::invalid_argument(format!(
                        "ballot {ballot_number} does not exist in bundle {}",
                        self.number
                    )));
                }
                content.validate_for(self.business_type)?;

                Ok(vec![BundleEvent::BallotUpdated(BallotEntered {
                    ballot_number: *ballot_number,
                    content: content.clone(),
                })])
            }

            BundleCommand::DeleteBallot { ballot_number } => {
                self.ensure_may_edit(operation, actor)?;
                if self.highest_ballot_number() != Some(*ballot_number) {
                    return Err(TallyError::invalid_argument(format!(
                        "only the last ballot can be deleted, {ballot_number} is not"
                    )));
                }

                Ok(vec![BundleEvent::BallotDeleted(BallotDeleted { ballot_number: *ballot_number })])
            }

            BundleCommand::SubmissionFinished { sample } => {
                self.ensure_may_edit(operation, actor)?;
                self.require_state(operation, BundleState::InProcess)?;
                self.validate_sample(sample)?;

                Ok(vec![BundleEvent::SubmissionFinished(Self::closed(sample))])
            }

            BundleCommand::CorrectionFinished { sample } => {
                self.ensure_may_edit(operation, actor)?;
                self.require_state(operation, BundleState::InCorrection)?;
                self.validate_sample(sample)?;

                Ok(vec![BundleEvent::CorrectionFinished(Self::closed(sample))])
            }

            BundleCommand::RejectReview => {
                self.ensure_not_creator(actor)?;
                self.require_state(operation, BundleState::ReadyForReview)?;
                Ok(vec![BundleEvent::ReviewRejected])
            }

            BundleCommand::SucceedReview => {
                self.ensure_not_creator(actor)?;
                self.require_state(operation, BundleState::ReadyForReview)?;
                Ok(vec![BundleEvent::ReviewSucceeded])
            }

            BundleCommand::ResetToSubmissionFinished => {
                self.require_state(operation, BundleState::Reviewed)?;
                Ok(vec![BundleEvent::ResetToSubmissionFinished])
            }

            BundleCommand::Delete => {
                if self.state == BundleState::Deleted {
                    return Err(TallyError::invalid_argument(format!(
                        "bundle {} is already deleted",
                        self.number
                    )));
                }
                Ok(vec![BundleEvent::Deleted(BundleDeleted {
                    was_reviewed: self.state == BundleState::Reviewed,
                })])
            }
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn set_version(&mut self, version: i64) {
        self.version = version;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
