use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::context::{CommandContext, ContestState};
use crate::domain::errors::TallyError;
use crate::domain::numbering::{next_bundle_number, BallotNumbering, BundleNumberRequest};
use crate::event_sourcing::core::Aggregate;
use super::commands::ResultCommand;
use super::events::*;
use super::value_objects::{
    BundleProgress, BundleReviewStatus, EntryParams, PoliticalBusinessType, ResultState, TrackedBundle,
};

// ============================================================================
// Political Business Result Aggregate - Domain Logic
// ============================================================================
//
// One result per political business and counting circle. Owns the
// submission state machine, the bundle-number sequence and the review
// status of every bundle it numbered. Bundle transitions that change a
// status are recorded on this stream, so finishing a submission and a
// concurrent bundle change conflict on the result version.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultAggregate {
    // Identity
    pub id: Uuid,
    pub version: i64,
    pub initialized: bool,

    pub political_business_id: Uuid,
    pub counting_circle_id: Uuid,
    pub contest_id: Uuid,
    pub business_type: PoliticalBusinessType,

    // Current State (derived from events)
    pub state: ResultState,
    pub published: bool,
    pub entry: Option<EntryParams>,
    pub highest_bundle_number: u32,
    pub bundles_issued: u32,
    /// Bundles numbered in the current reset epoch
    pub bundles: BTreeMap<Uuid, TrackedBundle>,
    pub had_correction: bool,
    pub reset_epoch: u32,
}

impl ResultAggregate {
    /// Entry definition in force, the defaults until one was defined
    pub fn entry_params(&self) -> EntryParams {
        self.entry.unwrap_or_default()
    }

    fn require_state(
        &self,
        operation: &'static str,
        allowed: &[ResultState],
    ) -> Result<(), TallyError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(TallyError::invalid_state(operation, self.state))
        }
    }

    /// Review counters over the tracked bundles
    pub fn bundle_progress(&self) -> BundleProgress {
        let mut progress = BundleProgress::default();
        for bundle in self.bundles.values() {
            match bundle.status {
                BundleReviewStatus::Pending => progress.not_reviewed_or_deleted += 1,
                BundleReviewStatus::Reviewed => progress.reviewed += 1,
                BundleReviewStatus::Deleted => progress.deleted += 1,
            }
        }
        progress
    }

    fn require_bundles_done(&self, operation: &'static str) -> Result<BundleProgress, TallyError> {
        let progress = self.bundle_progress();
        if progress.all_reviewed_or_deleted() {
            return Ok(progress);
        }
        Err(TallyError::InvalidState {
            operation,
            state: format!(
                "{:?} with {} bundle(s) neither reviewed nor deleted",
                self.state, progress.not_reviewed_or_deleted
            ),
        })
    }

    fn finish(
        &self,
        finished: ResultEvent,
        progress: &BundleProgress,
    ) -> Vec<ResultEvent> {
        let mut events = vec![finished];
        if progress.nothing_to_review() {
            events.push(ResultEvent::AuditedTentatively);
        }
        events
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for ResultAggregate {
    type Event = ResultEvent;
    type Command = ResultCommand;
    type Context = CommandContext;
    type Error = TallyError;

    fn empty(aggregate_id: Uuid) -> Self {
        Self {
            id: aggregate_id,
            version: 0,
            initialized: false,
            political_business_id: Uuid::nil(),
            counting_circle_id: Uuid::nil(),
            contest_id: Uuid::nil(),
            business_type: PoliticalBusinessType::Vote,
            state: ResultState::Initial,
            published: false,
            entry: None,
            highest_bundle_number: 0,
            bundles_issued: 0,
            bundles: BTreeMap::new(),
            had_correction: false,
            reset_epoch: 0,
        }
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn apply_event(&mut self, event: &Self::Event) -> Result<(), Self::Error> {
        if !self.initialized && !matches!(event, ResultEvent::Initialized(_)) {
            return Err(TallyError::NotInitialized);
        }

        match event {
            ResultEvent::Initialized(e) => {
                self.initialized = true;
                self.political_business_id = e.political_business_id;
                self.counting_circle_id = e.counting_circle_id;
                self.contest_id = e.contest_id;
                self.business_type = e.business_type;
                self.state = ResultState::Initial;
            }
            ResultEvent::EntryDefined(e) => {
                self.entry = Some(e.params);
                self.highest_bundle_number = 0;
            }
            ResultEvent::SubmissionStarted => self.state = ResultState::SubmissionOngoing,
            ResultEvent::SubmissionFinished => self.state = ResultState::SubmissionDone,
            ResultEvent::FlaggedForCorrection(_) => {
                self.state = ResultState::ReadyForCorrection;
                self.had_correction = true;
            }
            ResultEvent::CorrectionFinished => self.state = ResultState::CorrectionDone,
            ResultEvent::AuditedTentatively => self.state = ResultState::AuditedTentatively,
            ResultEvent::Plausibilised => self.state = ResultState::Plausibilised,
            ResultEvent::ResetToSubmissionFinished => {
                self.state = if self.had_correction {
                    ResultState::CorrectionDone
                } else {
                    ResultState::SubmissionDone
                };
                self.published = false;
            }
            ResultEvent::ResetToAuditedTentatively => self.state = ResultState::AuditedTentatively,
            ResultEvent::Published => self.published = true,
            ResultEvent::Unpublished => self.published = false,
            ResultEvent::BundleNumberGenerated(e) => {
                self.highest_bundle_number = self.highest_bundle_number.max(e.bundle_number);
                self.bundles_issued = self.bundles_issued.saturating_add(1);
                self.bundles.insert(
                    e.bundle_id,
                    TrackedBundle {
                        number: e.bundle_number,
                        status: BundleReviewStatus::Pending,
                        bundle_version: 0,
                        reserved: false,
                    },
                );
            }
            ResultEvent::BundleStatusTracked(e) => {
                if let Some(bundle) = self.bundles.get_mut(&e.bundle_id) {
                    bundle.status = e.status;
                    bundle.bundle_version = e.bundle_version;
                    bundle.reserved = e.reserved;
                }
            }
            ResultEvent::ResultsReset => {
                self.state = ResultState::Initial;
                self.published = false;
                self.highest_bundle_number = 0;
                self.bundles_issued = 0;
                self.bundles.clear();
                self.had_correction = false;
                self.reset_epoch = self.reset_epoch.saturating_add(1);
            }
        }

        Ok(())
    }

    fn handle_command(
        &self,
        command: &Self::Command,
        ctx: &Self::Context,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        // Confirmations record bundle events that were already accepted
        let confirmation = matches!(command, ResultCommand::TrackBundle { update } if !update.reserved);
        if !confirmation {
            ctx.ensure_contest_unlocked()?;
        }

        if let ResultCommand::Initialize {
            political_business_id,
            counting_circle_id,
            contest_id,
            business_type,
        } = command
        {
            // First access of the result list creates it, later accesses are no-ops
            if self.initialized {
                return Ok(vec![]);
            }
            return Ok(vec![ResultEvent::Initialized(ResultInitialized {
                political_business_id: *political_business_id,
                counting_circle_id: *counting_circle_id,
                contest_id: *contest_id,
                business_type: *business_type,
            })]);
        }

        if !self.initialized {
            return Err(TallyError::NotInitialized);
        }

        let operation = command.name();

        match command {
            ResultCommand::Initialize { .. } => Ok(vec![]),

            ResultCommand::DefineEntry { params } => {
                self.require_state(operation, &[ResultState::Initial, ResultState::SubmissionOngoing])?;
                // Redefining restarts the bundle-number sequence, only safe while it is empty
                if self.bundles_issued > 0 {
                    return Err(TallyError::InvalidState {
                        operation,
                        state: format!("{:?} with {} bundle number(s) issued", self.state, self.bundles_issued),
                    });
                }
                params.validate()?;

                Ok(vec![ResultEvent::EntryDefined(ResultEntryDefined { params: *params })])
            }

            ResultCommand::StartSubmission => {
                if self.state != ResultState::Initial {
                    return Ok(vec![]); // Already started
                }
                Ok(vec![ResultEvent::SubmissionStarted])
            }

            ResultCommand::FinishSubmission => {
                self.require_state(operation, &[ResultState::SubmissionOngoing])?;
                let progress = self.require_bundles_done(operation)?;

                Ok(self.finish(ResultEvent::SubmissionFinished, &progress))
            }

            ResultCommand::FlagForCorrection { comment } => {
                self.require_state(operation, &[ResultState::SubmissionDone, ResultState::CorrectionDone])?;

                Ok(vec![ResultEvent::FlaggedForCorrection(ResultFlaggedForCorrection {
                    comment: comment.clone(),
                })])
            }

            ResultCommand::FinishCorrection => {
                self.require_state(operation, &[ResultState::ReadyForCorrection])?;
                let progress = self.require_bundles_done(operation)?;

                Ok(self.finish(ResultEvent::CorrectionFinished, &progress))
            }

            ResultCommand::AuditTentatively => {
                self.require_state(operation, &[ResultState::SubmissionDone, ResultState::CorrectionDone])?;
                Ok(vec![ResultEvent::AuditedTentatively])
            }

            ResultCommand::Plausibilise => {
                self.require_state(operation, &[ResultState::AuditedTentatively])?;
                Ok(vec![ResultEvent::Plausibilised])
            }

            ResultCommand::ResetToSubmissionFinished => {
                self.require_state(operation, &[ResultState::AuditedTentatively])?;
                Ok(vec![ResultEvent::ResetToSubmissionFinished])
            }

            ResultCommand::ResetToAuditedTentatively => {
                self.require_state(operation, &[ResultState::Plausibilised])?;
                Ok(vec![ResultEvent::ResetToAuditedTentatively])
            }

            ResultCommand::Publish => {
                if !self.state.is_audited() {
                    return Err(TallyError::invalid_state(operation, self.state));
                }
                if self.published {
                    return Err(TallyError::InvalidState { operation, state: "Published".to_string() });
                }
                Ok(vec![ResultEvent::Published])
            }

            ResultCommand::Unpublish => {
                if !self.state.is_audited() {
                    return Err(TallyError::invalid_state(operation, self.state));
                }
                if !self.published {
                    return Err(TallyError::InvalidState { operation, state: "Unpublished".to_string() });
                }
                Ok(vec![ResultEvent::Unpublished])
            }

            ResultCommand::GenerateBundleNumber { bundle_id, request } => {
                if !self.state.accepts_bundles() {
                    return Err(TallyError::invalid_state(operation, self.state));
                }

                if self.bundles.contains_key(bundle_id) {
                    return Err(TallyError::invalid_argument(format!(
                        "bundle {bundle_id} already has a number"
                    )));
                }

                let entry = self.entry_params();
                let bundle_number = next_bundle_number(
                    entry.bundle_number_mode,
                    self.highest_bundle_number,
                    *request,
                )?;
                // The bundle has to be able to number its ballots
                BallotNumbering {
                    generation: entry.ballot_number_generation,
                    bundle_number,
                    bundle_size: entry.ballot_bundle_size,
                }
                .first_number()?;

                Ok(vec![ResultEvent::BundleNumberGenerated(BundleNumberGenerated {
                    bundle_id: *bundle_id,
                    bundle_number,
                    automatic: matches!(request, BundleNumberRequest::Automatic),
                })])
            }

            ResultCommand::TrackBundle { update } => {
                if update.result_epoch != self.reset_epoch {
                    return Ok(vec![]);
                }
                let Some(current) = self.bundles.get(&update.bundle_id) else {
                    return Ok(vec![]);
                };
                // A reservation precedes a bundle mutation and shares its gate
                if update.reserved && !self.state.accepts_bundles() {
                    return Err(TallyError::invalid_state(operation, self.state));
                }
                if !update.supersedes(current) {
                    return Ok(vec![]);
                }
                Ok(vec![ResultEvent::BundleStatusTracked(update.clone())])
            }

            ResultCommand::ResetResults => {
                if ctx.contest_state != ContestState::TestingPhase {
                    return Err(TallyError::invalid_state(operation, ctx.contest_state));
                }
                Ok(vec![ResultEvent::ResultsReset])
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::numbering::{BallotNumberGeneration, BundleNumberMode};
    use crate::event_sourcing::core::EventEnvelope;

    fn ctx() -> CommandContext {
        CommandContext::new("election-admin", "canton")
    }

    fn initialized() -> ResultAggregate {
        let mut result = ResultAggregate::empty(Uuid::new_v4());
        result
            .apply_event(&ResultEvent::Initialized(ResultInitialized {
                political_business_id: Uuid::new_v4(),
                counting_circle_id: Uuid::new_v4(),
                contest_id: Uuid::new_v4(),
                business_type: PoliticalBusinessType::ProportionalElection,
            }))
            .unwrap();
        result
    }

    fn decide_and_apply(result: &mut ResultAggregate, command: ResultCommand) -> Vec<ResultEvent> {
        let events = result.handle_command(&command, &ctx()).unwrap();
        for event in &events {
            result.apply_event(event).unwrap();
        }
        events
    }

    fn in_state(state: ResultState) -> ResultAggregate {
        let mut result = initialized();
        result.state = state;
        result
    }

    fn track(result: &mut ResultAggregate, status: BundleReviewStatus) -> Uuid {
        let bundle_id = Uuid::new_v4();
        result.bundles.insert(
            bundle_id,
            TrackedBundle { number: result.bundles.len() as u32 + 1, status, bundle_version: 3, reserved: false },
        );
        bundle_id
    }

    fn with_bundles(state: ResultState, statuses: &[BundleReviewStatus]) -> ResultAggregate {
        let mut result = in_state(state);
        for status in statuses {
            track(&mut result, *status);
        }
        result
    }

    fn done(state: ResultState) -> ResultAggregate {
        with_bundles(
            state,
            &[BundleReviewStatus::Reviewed, BundleReviewStatus::Reviewed, BundleReviewStatus::Deleted],
        )
    }

    fn update(bundle_id: Uuid, status: BundleReviewStatus, bundle_version: i64, reserved: bool) -> ResultCommand {
        ResultCommand::TrackBundle {
            update: BundleStatusTracked { bundle_id, result_epoch: 0, status, bundle_version, reserved },
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let result = initialized();
        let events = result
            .handle_command(
                &ResultCommand::Initialize {
                    political_business_id: Uuid::new_v4(),
                    counting_circle_id: Uuid::new_v4(),
                    contest_id: Uuid::new_v4(),
                    business_type: PoliticalBusinessType::Vote,
                },
                &ctx(),
            )
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_commands_on_uninitialized_result_fail() {
        let result = ResultAggregate::empty(Uuid::new_v4());
        assert_eq!(
            result.handle_command(&ResultCommand::StartSubmission, &ctx()),
            Err(TallyError::NotInitialized)
        );
    }

    #[test]
    fn test_start_submission_is_idempotent() {
        let mut result = initialized();
        assert_eq!(
            decide_and_apply(&mut result, ResultCommand::StartSubmission),
            vec![ResultEvent::SubmissionStarted]
        );
        assert_eq!(result.state, ResultState::SubmissionOngoing);
        assert!(decide_and_apply(&mut result, ResultCommand::StartSubmission).is_empty());
    }

    #[test]
    fn test_finish_submission_requires_all_bundles_done() {
        let result = with_bundles(
            ResultState::SubmissionOngoing,
            &[BundleReviewStatus::Reviewed, BundleReviewStatus::Pending],
        );
        let err = result.handle_command(&ResultCommand::FinishSubmission, &ctx()).unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { operation: "FinishSubmission", .. }));
    }

    #[test]
    fn test_finish_submission_with_reviewed_bundles() {
        let mut result = done(ResultState::SubmissionOngoing);
        let events = decide_and_apply(&mut result, ResultCommand::FinishSubmission);
        assert_eq!(events, vec![ResultEvent::SubmissionFinished]);
        assert_eq!(result.state, ResultState::SubmissionDone);
    }

    #[test]
    fn test_finish_without_anything_to_review_audits_automatically() {
        let mut result = with_bundles(ResultState::SubmissionOngoing, &[BundleReviewStatus::Deleted]);
        let events = decide_and_apply(&mut result, ResultCommand::FinishSubmission);
        assert_eq!(events, vec![ResultEvent::SubmissionFinished, ResultEvent::AuditedTentatively]);
        assert_eq!(result.state, ResultState::AuditedTentatively);
    }

    #[test]
    fn test_finish_submission_in_wrong_state_names_state() {
        let result = in_state(ResultState::Initial);
        let err = result
            .handle_command(&ResultCommand::FinishSubmission, &ctx())
            .unwrap_err();
        assert_eq!(
            err,
            TallyError::InvalidState { operation: "FinishSubmission", state: "Initial".to_string() }
        );
    }

    #[test]
    fn test_correction_round_trip() {
        let mut result = in_state(ResultState::SubmissionDone);
        decide_and_apply(&mut result, ResultCommand::FlagForCorrection { comment: Some("typo".into()) });
        assert_eq!(result.state, ResultState::ReadyForCorrection);
        assert!(result.state.accepts_bundles());

        let reopened = track(&mut result, BundleReviewStatus::Pending);
        let err = result.handle_command(&ResultCommand::FinishCorrection, &ctx()).unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { .. }));

        decide_and_apply(&mut result, update(reopened, BundleReviewStatus::Reviewed, 6, false));
        decide_and_apply(&mut result, ResultCommand::FinishCorrection);
        assert_eq!(result.state, ResultState::CorrectionDone);

        decide_and_apply(&mut result, ResultCommand::FlagForCorrection { comment: None });
        assert_eq!(result.state, ResultState::ReadyForCorrection);
    }

    #[test]
    fn test_audit_plausibilise_and_resets() {
        let mut result = in_state(ResultState::SubmissionDone);
        decide_and_apply(&mut result, ResultCommand::AuditTentatively);
        assert_eq!(result.state, ResultState::AuditedTentatively);

        decide_and_apply(&mut result, ResultCommand::Plausibilise);
        assert_eq!(result.state, ResultState::Plausibilised);

        decide_and_apply(&mut result, ResultCommand::ResetToAuditedTentatively);
        assert_eq!(result.state, ResultState::AuditedTentatively);

        decide_and_apply(&mut result, ResultCommand::ResetToSubmissionFinished);
        assert_eq!(result.state, ResultState::SubmissionDone);
    }

    #[test]
    fn test_reset_to_submission_finished_after_correction() {
        let mut result = in_state(ResultState::SubmissionDone);
        decide_and_apply(&mut result, ResultCommand::FlagForCorrection { comment: None });
        decide_and_apply(&mut result, ResultCommand::FinishCorrection);
        decide_and_apply(&mut result, ResultCommand::AuditTentatively);
        decide_and_apply(&mut result, ResultCommand::ResetToSubmissionFinished);
        assert_eq!(result.state, ResultState::CorrectionDone);
    }

    #[test]
    fn test_exact_predecessor_required() {
        let cases = [
            (ResultCommand::Plausibilise, ResultState::SubmissionDone),
            (ResultCommand::AuditTentatively, ResultState::SubmissionOngoing),
            (ResultCommand::FlagForCorrection { comment: None }, ResultState::AuditedTentatively),
            (ResultCommand::ResetToAuditedTentatively, ResultState::AuditedTentatively),
            (ResultCommand::ResetToSubmissionFinished, ResultState::Plausibilised),
        ];

        for (command, state) in cases {
            let err = in_state(state).handle_command(&command, &ctx()).unwrap_err();
            assert_eq!(
                err,
                TallyError::InvalidState { operation: command.name(), state: format!("{state:?}") }
            );
        }
    }

    #[test]
    fn test_publish_only_in_audited_states() {
        let err = in_state(ResultState::SubmissionDone)
            .handle_command(&ResultCommand::Publish, &ctx())
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { .. }));

        let mut result = in_state(ResultState::AuditedTentatively);
        decide_and_apply(&mut result, ResultCommand::Publish);
        assert!(result.published);
        assert!(result.handle_command(&ResultCommand::Publish, &ctx()).is_err());

        decide_and_apply(&mut result, ResultCommand::Unpublish);
        assert!(!result.published);
        assert!(result.handle_command(&ResultCommand::Unpublish, &ctx()).is_err());
    }

    #[test]
    fn test_reset_to_submission_finished_unpublishes() {
        let mut result = in_state(ResultState::AuditedTentatively);
        decide_and_apply(&mut result, ResultCommand::Publish);
        decide_and_apply(&mut result, ResultCommand::ResetToSubmissionFinished);
        assert!(!result.published);
    }

    #[test]
    fn test_automatic_bundle_numbers_never_reuse() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let mut numbers = vec![];
        for _ in 0..3 {
            let events = decide_and_apply(
                &mut result,
                ResultCommand::GenerateBundleNumber {
                    bundle_id: Uuid::new_v4(),
                    request: BundleNumberRequest::Automatic,
                },
            );
            if let ResultEvent::BundleNumberGenerated(e) = &events[0] {
                numbers.push(e.bundle_number);
            }
        }
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(result.bundles_issued, 3);
    }

    #[test]
    fn test_manual_bundle_numbers_may_repeat() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let params = EntryParams {
            bundle_number_mode: BundleNumberMode::Manual,
            ..EntryParams::default()
        };
        decide_and_apply(&mut result, ResultCommand::DefineEntry { params });

        for _ in 0..2 {
            let events = decide_and_apply(
                &mut result,
                ResultCommand::GenerateBundleNumber {
                    bundle_id: Uuid::new_v4(),
                    request: BundleNumberRequest::Manual(5),
                },
            );
            assert!(matches!(
                &events[0],
                ResultEvent::BundleNumberGenerated(BundleNumberGenerated { bundle_number: 5, automatic: false, .. })
            ));
        }
    }

    #[test]
    fn test_bundle_numbers_only_while_accepting_bundles() {
        let result = in_state(ResultState::SubmissionDone);
        let err = result
            .handle_command(
                &ResultCommand::GenerateBundleNumber {
                    bundle_id: Uuid::new_v4(),
                    request: BundleNumberRequest::Automatic,
                },
                &ctx(),
            )
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { .. }));
    }

    #[test]
    fn test_bundle_number_issued_once_per_bundle() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let bundle_id = Uuid::new_v4();
        let command = ResultCommand::GenerateBundleNumber { bundle_id, request: BundleNumberRequest::Automatic };
        decide_and_apply(&mut result, command.clone());
        assert_eq!(
            result.bundles.get(&bundle_id).map(|b| (b.number, b.status)),
            Some((1, BundleReviewStatus::Pending))
        );

        let err = result.handle_command(&command, &ctx()).unwrap_err();
        assert!(matches!(err, TallyError::InvalidArgument(_)));
        assert_eq!(result.bundles_issued, 1);
    }

    #[test]
    fn test_bundle_number_that_cannot_number_ballots_is_rejected() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let params = EntryParams {
            ballot_bundle_size: Some(u32::MAX / 2),
            bundle_number_mode: BundleNumberMode::Manual,
            ballot_number_generation: BallotNumberGeneration::ContinuousForAllBundles,
            ..EntryParams::default()
        };
        decide_and_apply(&mut result, ResultCommand::DefineEntry { params });

        let err = result
            .handle_command(
                &ResultCommand::GenerateBundleNumber {
                    bundle_id: Uuid::new_v4(),
                    request: BundleNumberRequest::Manual(4),
                },
                &ctx(),
            )
            .unwrap_err();
        assert_eq!(err, TallyError::NumericOverflow("ballot number"));
        assert!(result.bundles.is_empty());
    }

    #[test]
    fn test_tracked_status_drives_finish() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let bundle_id = Uuid::new_v4();
        decide_and_apply(
            &mut result,
            ResultCommand::GenerateBundleNumber { bundle_id, request: BundleNumberRequest::Automatic },
        );
        assert!(result.handle_command(&ResultCommand::FinishSubmission, &ctx()).is_err());

        decide_and_apply(&mut result, update(bundle_id, BundleReviewStatus::Reviewed, 9, false));
        assert_eq!(
            result.bundle_progress(),
            BundleProgress { not_reviewed_or_deleted: 0, reviewed: 1, deleted: 0 }
        );
        assert_eq!(decide_and_apply(&mut result, ResultCommand::FinishSubmission), vec![ResultEvent::SubmissionFinished]);
    }

    #[test]
    fn test_stale_or_foreign_updates_emit_nothing() {
        let mut result = with_bundles(ResultState::SubmissionOngoing, &[]);
        let bundle_id = track(&mut result, BundleReviewStatus::Reviewed);

        // older than what is tracked
        assert!(decide_and_apply(&mut result, update(bundle_id, BundleReviewStatus::Pending, 2, false)).is_empty());
        // unknown bundle
        assert!(decide_and_apply(&mut result, update(Uuid::new_v4(), BundleReviewStatus::Reviewed, 5, false)).is_empty());
        // previous reset epoch
        let mut old_epoch = update(bundle_id, BundleReviewStatus::Deleted, 8, false);
        if let ResultCommand::TrackBundle { update } = &mut old_epoch {
            update.result_epoch = 1;
        }
        assert!(decide_and_apply(&mut result, old_epoch).is_empty());
        assert_eq!(result.bundles[&bundle_id].status, BundleReviewStatus::Reviewed);
    }

    #[test]
    fn test_reservation_reopens_bundle_before_it_changes() {
        let mut result = with_bundles(ResultState::SubmissionOngoing, &[]);
        let bundle_id = track(&mut result, BundleReviewStatus::Reviewed);

        decide_and_apply(&mut result, update(bundle_id, BundleReviewStatus::Pending, 4, true));
        assert!(result.handle_command(&ResultCommand::FinishSubmission, &ctx()).is_err());

        // a fact about the version before the reservation leaves it in place
        decide_and_apply(&mut result, update(bundle_id, BundleReviewStatus::Reviewed, 3, false));
        assert_eq!(result.bundles[&bundle_id].status, BundleReviewStatus::Pending);
        decide_and_apply(&mut result, update(bundle_id, BundleReviewStatus::Reviewed, 4, false));
        assert_eq!(result.bundles[&bundle_id].status, BundleReviewStatus::Reviewed);
    }

    #[test]
    fn test_reservation_needs_accepting_state() {
        let mut result = with_bundles(ResultState::SubmissionDone, &[]);
        let bundle_id = track(&mut result, BundleReviewStatus::Reviewed);
        let err = result
            .handle_command(&update(bundle_id, BundleReviewStatus::Pending, 4, true), &ctx())
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { operation: "TrackBundle", .. }));
    }

    #[test]
    fn test_confirmation_accepted_on_locked_contest() {
        let mut result = with_bundles(ResultState::SubmissionOngoing, &[]);
        let bundle_id = track(&mut result, BundleReviewStatus::Pending);
        let locked = ctx().with_contest(Uuid::new_v4(), ContestState::PastLocked);
        let events = result
            .handle_command(&update(bundle_id, BundleReviewStatus::Reviewed, 7, false), &locked)
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(result
            .handle_command(&update(bundle_id, BundleReviewStatus::Reviewed, 7, true), &locked)
            .is_err());
    }

    #[test]
    fn test_define_entry_rejected_once_bundles_are_numbered() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        let first = Uuid::new_v4();
        decide_and_apply(
            &mut result,
            ResultCommand::GenerateBundleNumber { bundle_id: first, request: BundleNumberRequest::Automatic },
        );
        decide_and_apply(&mut result, update(first, BundleReviewStatus::Deleted, 2, false));

        let err = result
            .handle_command(&ResultCommand::DefineEntry { params: EntryParams::default() }, &ctx())
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { operation: "DefineEntry", .. }));
        assert_eq!(result.highest_bundle_number, 1);
    }

    #[test]
    fn test_define_entry_resets_sequence_counter() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        result.highest_bundle_number = 8;
        let params = EntryParams {
            ballot_number_generation: BallotNumberGeneration::ContinuousForAllBundles,
            ..EntryParams::default()
        };
        decide_and_apply(&mut result, ResultCommand::DefineEntry { params });
        assert_eq!(result.highest_bundle_number, 0);
        assert_eq!(result.entry_params(), params);
    }

    #[test]
    fn test_define_entry_rejected_after_submission() {
        let err = in_state(ResultState::SubmissionDone)
            .handle_command(&ResultCommand::DefineEntry { params: EntryParams::default() }, &ctx())
            .unwrap_err();
        assert!(matches!(err, TallyError::InvalidState { .. }));
    }

    #[test]
    fn test_contest_lock_checked_first() {
        // Even a command that would fail for state reasons reports the lock
        let result = in_state(ResultState::Initial);
        let contest_id = Uuid::new_v4();
        let locked = ctx().with_contest(contest_id, ContestState::PastLocked);
        assert_eq!(
            result.handle_command(&ResultCommand::Plausibilise, &locked),
            Err(TallyError::ContestLocked(contest_id))
        );
    }

    #[test]
    fn test_reset_results_only_in_testing_phase() {
        let mut result = in_state(ResultState::SubmissionOngoing);
        result.highest_bundle_number = 4;
        assert!(matches!(
            result.handle_command(&ResultCommand::ResetResults, &ctx()),
            Err(TallyError::InvalidState { .. })
        ));

        let testing = ctx().with_contest(Uuid::new_v4(), ContestState::TestingPhase);
        let events = result.handle_command(&ResultCommand::ResetResults, &testing).unwrap();
        for event in &events {
            result.apply_event(event).unwrap();
        }
        assert_eq!(result.state, ResultState::Initial);
        assert_eq!(result.highest_bundle_number, 0);
        assert!(result.bundles.is_empty());
        assert_eq!(result.reset_epoch, 1);
    }

    #[test]
    fn test_load_from_events() {
        let id = Uuid::new_v4();
        let events = vec![
            EventEnvelope::new(
                id,
                1,
                "ResultInitialized".to_string(),
                ResultEvent::Initialized(ResultInitialized {
                    political_business_id: Uuid::new_v4(),
                    counting_circle_id: Uuid::new_v4(),
                    contest_id: Uuid::new_v4(),
                    business_type: PoliticalBusinessType::Vote,
                }),
                Uuid::new_v4(),
            ),
            EventEnvelope::new(id, 2, "ResultSubmissionStarted".to_string(), ResultEvent::SubmissionStarted, Uuid::new_v4()),
            EventEnvelope::new(
                id,
                3,
                "ResultBundleNumberGenerated".to_string(),
                ResultEvent::BundleNumberGenerated(BundleNumberGenerated {
                    bundle_id: Uuid::new_v4(),
                    bundle_number: 1,
                    automatic: true,
                }),
                Uuid::new_v4(),
            ),
        ];

        let result = ResultAggregate::load_from_events(id, &events).unwrap();
        assert_eq!(result.version, 3);
        assert_eq!(result.state, ResultState::SubmissionOngoing);
        assert_eq!(result.highest_bundle_number, 1);
    }

    #[test]
    fn test_replay_must_start_with_initialized() {
        let mut result = ResultAggregate::empty(Uuid::new_v4());
        assert_eq!(result.apply_event(&ResultEvent::SubmissionStarted), Err(TallyError::NotInitialized));
    }
}
