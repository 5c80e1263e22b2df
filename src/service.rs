use std::sync::Arc;
use uuid::Uuid;

use crate::domain::bundle::{BallotContent, BundleCommand, BundleCommandHandler, BundleEvent, ResultBundleAggregate};
use crate::domain::context::{CommandContext, ContestLookup};
use crate::domain::handling::{CommandError, Handled};
use crate::domain::numbering::BundleNumberRequest;
use crate::domain::result::{
    EntryParams, PoliticalBusinessType, ResultCommand, ResultCommandHandler, ResultEvent,
};
use crate::event_sourcing::core::EventSigner;
use crate::event_sourcing::store::{EventStore, InMemoryEventStore};
use crate::metrics::Metrics;
use crate::projection::{ProjectionError, ProjectionUpdater, ReadModel, ResultSnapshot, ResultTallies};
use crate::utils::RetryConfig;

// ============================================================================
// Tally Service - Application layer
// ============================================================================
//
// Wires both command handlers, the read model and its updater. Every
// command brings the projection of the affected result up to date before
// returning, so reads issued afterwards observe it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl ServiceError {
    pub fn as_command(&self) -> Option<&CommandError> {
        match self {
            ServiceError::Command(e) => Some(e),
            ServiceError::Projection(_) => None,
        }
    }
}

#[derive(Clone, Default)]
pub struct ServiceOptions {
    pub signer: Option<EventSigner>,
    pub retry: Option<RetryConfig>,
    pub metrics: Option<Arc<Metrics>>,
    /// Fixed seed for sample draws, random when unset
    pub sample_seed: Option<u64>,
}

pub struct TallyService {
    results: Arc<ResultCommandHandler>,
    bundles: BundleCommandHandler,
    projection: Arc<ProjectionUpdater>,
}

impl TallyService {
    pub fn new(
        result_store: Arc<dyn EventStore<ResultEvent>>,
        bundle_store: Arc<dyn EventStore<BundleEvent>>,
        contests: Arc<dyn ContestLookup>,
        options: ServiceOptions,
    ) -> Self {
        let mut results = ResultCommandHandler::new(result_store.clone(), contests);
        let mut projection = ProjectionUpdater::new(result_store, bundle_store.clone(), Arc::new(ReadModel::new()));

        if let Some(signer) = &options.signer {
            results = results.with_signer(signer.clone());
            projection = projection.with_signer(signer.clone());
        }
        if let Some(retry) = &options.retry {
            results = results.with_retry(retry.clone());
        }
        if let Some(metrics) = &options.metrics {
            results = results.with_metrics(metrics.clone());
            projection = projection.with_metrics(metrics.clone());
        }

        let results = Arc::new(results);
        let mut bundles = BundleCommandHandler::new(bundle_store, results.clone());
        if let Some(signer) = options.signer {
            bundles = bundles.with_signer(signer);
        }
        if let Some(retry) = options.retry {
            bundles = bundles.with_retry(retry);
        }
        if let Some(metrics) = options.metrics {
            bundles = bundles.with_metrics(metrics);
        }
        if let Some(seed) = options.sample_seed {
            bundles = bundles.with_seed(seed);
        }

        Self { results, bundles, projection: Arc::new(projection) }
    }

    /// Service over fresh in-memory stores
    pub fn in_memory(contests: Arc<dyn ContestLookup>, options: ServiceOptions) -> Self {
        Self::new(
            Arc::new(InMemoryEventStore::<ResultEvent>::new()),
            Arc::new(InMemoryEventStore::<BundleEvent>::new()),
            contests,
            options,
        )
    }

    pub fn projection(&self) -> &Arc<ProjectionUpdater> {
        &self.projection
    }

    pub fn results(&self) -> &Arc<ResultCommandHandler> {
        &self.results
    }

    pub fn bundles(&self) -> &BundleCommandHandler {
        &self.bundles
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn result(&self, result_id: Uuid) -> Result<Option<ResultSnapshot>, ServiceError> {
        self.projection.catch_up(result_id).await?;
        Ok(self.projection.read_model().result(result_id).await)
    }

    pub async fn tallies(&self, result_id: Uuid) -> Result<ResultTallies, ServiceError> {
        self.projection.catch_up(result_id).await?;
        Ok(self.projection.read_model().tallies(result_id).await.unwrap_or_default())
    }

    // ------------------------------------------------------------------------
    // Result commands
    // ------------------------------------------------------------------------

    async fn on_result(&self, result_id: Uuid, command: ResultCommand, ctx: &CommandContext) -> Result<i64, ServiceError> {
        let version = self.results.handle(result_id, command, ctx).await?;
        self.projection.catch_up(result_id).await?;
        Ok(version)
    }

    pub async fn initialize(
        &self,
        result_id: Uuid,
        political_business_id: Uuid,
        counting_circle_id: Uuid,
        contest_id: Uuid,
        business_type: PoliticalBusinessType,
        ctx: &CommandContext,
    ) -> Result<i64, ServiceError> {
        let command = ResultCommand::Initialize { political_business_id, counting_circle_id, contest_id, business_type };
        self.on_result(result_id, command, ctx).await
    }

    pub async fn define_entry(&self, result_id: Uuid, params: EntryParams, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::DefineEntry { params }, ctx).await
    }

    pub async fn start_submission(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::StartSubmission, ctx).await
    }

    /// Decided against the bundle statuses the result tracks, synced with
    /// the bundle streams first
    pub async fn finish_submission(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.bundles.sync_parent(result_id, ctx).await?;
        self.on_result(result_id, ResultCommand::FinishSubmission, ctx).await
    }

    pub async fn flag_for_correction(
        &self,
        result_id: Uuid,
        comment: Option<String>,
        ctx: &CommandContext,
    ) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::FlagForCorrection { comment }, ctx).await
    }

    pub async fn finish_correction(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.bundles.sync_parent(result_id, ctx).await?;
        self.on_result(result_id, ResultCommand::FinishCorrection, ctx).await
    }

    pub async fn audit_tentatively(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::AuditTentatively, ctx).await
    }

    pub async fn plausibilise(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::Plausibilise, ctx).await
    }

    pub async fn reset_to_submission_finished(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::ResetToSubmissionFinished, ctx).await
    }

    pub async fn reset_to_audited_tentatively(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::ResetToAuditedTentatively, ctx).await
    }

    pub async fn publish(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::Publish, ctx).await
    }

    pub async fn unpublish(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::Unpublish, ctx).await
    }

    pub async fn reset_results(&self, result_id: Uuid, ctx: &CommandContext) -> Result<i64, ServiceError> {
        self.on_result(result_id, ResultCommand::ResetResults, ctx).await
    }

    /// Issue a bundle number without creating the bundle
    pub async fn generate_bundle_number(
        &self,
        result_id: Uuid,
        bundle_id: Uuid,
        request: BundleNumberRequest,
        ctx: &CommandContext,
    ) -> Result<u32, ServiceError> {
        let handled = self
            .results
            .execute(result_id, ResultCommand::GenerateBundleNumber { bundle_id, request }, ctx)
            .await?;
        self.projection.catch_up(result_id).await?;
        handled
            .events
            .iter()
            .find_map(|event| match event {
                ResultEvent::BundleNumberGenerated(e) if e.bundle_id == bundle_id => Some(e.bundle_number),
                _ => None,
            })
            .ok_or(ServiceError::Command(CommandError::NotFound { kind: "bundle number for", id: bundle_id }))
    }

    // ------------------------------------------------------------------------
    // Bundle commands
    // ------------------------------------------------------------------------

    async fn on_bundle(
        &self,
        handled: Result<Handled<ResultBundleAggregate>, CommandError>,
    ) -> Result<ResultBundleAggregate, ServiceError> {
        let bundle = handled?.aggregate;
        self.projection.catch_up(bundle.result_id).await?;
        Ok(bundle)
    }

    pub async fn create_bundle(
        &self,
        result_id: Uuid,
        request: BundleNumberRequest,
        list_id: Option<Uuid>,
        ctx: &CommandContext,
    ) -> Result<ResultBundleAggregate, ServiceError> {
        let bundle_id = Uuid::now_v7();
        self.on_bundle(self.bundles.create_bundle(result_id, bundle_id, request, list_id, ctx).await)
            .await
    }

    pub async fn delete_bundle(&self, bundle_id: Uuid, ctx: &CommandContext) -> Result<ResultBundleAggregate, ServiceError> {
        self.on_bundle(self.bundles.execute(bundle_id, BundleCommand::Delete, ctx).await).await
    }

    /// Returns the number the new ballot got
    pub async fn create_ballot(
        &self,
        bundle_id: Uuid,
        content: BallotContent,
        ctx: &CommandContext,
    ) -> Result<u32, ServiceError> {
        let bundle = self
            .on_bundle(self.bundles.execute(bundle_id, BundleCommand::CreateBallot { content }, ctx).await)
            .await?;
        Ok(bundle.highest_ballot_number().unwrap_or_default())
    }

    pub async fn update_ballot(
        &self,
        bundle_id: Uuid,
        ballot_number: u32,
        content: BallotContent,
        ctx: &CommandContext,
    ) -> Result<ResultBundleAggregate, ServiceError> {
        let command = BundleCommand::UpdateBallot { ballot_number, content };
        self.on_bundle(self.bundles.execute(bundle_id, command, ctx).await).await
    }

    pub async fn delete_ballot(
        &self,
        bundle_id: Uuid,
        ballot_number: u32,
        ctx: &CommandContext,
    ) -> Result<ResultBundleAggregate, ServiceError> {
        let command = BundleCommand::DeleteBallot { ballot_number };
        self.on_bundle(self.bundles.execute(bundle_id, command, ctx).await).await
    }

    /// Returns the drawn review sample
    pub async fn bundle_submission_finished(&self, bundle_id: Uuid, ctx: &CommandContext) -> Result<Vec<u32>, ServiceError> {
        let bundle = self.on_bundle(self.bundles.finish_submission(bundle_id, ctx).await).await?;
        Ok(bundle.sample_ballot_numbers)
    }

    pub async fn bundle_correction_finished(&self, bundle_id: Uuid, ctx: &CommandContext) -> Result<Vec<u32>, ServiceError> {
        let bundle = self.on_bundle(self.bundles.finish_correction(bundle_id, ctx).await).await?;
        Ok(bundle.sample_ballot_numbers)
    }

    pub async fn reject_bundle_review(&self, bundle_id: Uuid, ctx: &CommandContext) -> Result<ResultBundleAggregate, ServiceError> {
        self.on_bundle(self.bundles.execute(bundle_id, BundleCommand::RejectReview, ctx).await).await
    }

    pub async fn succeed_bundle_review(&self, bundle_id: Uuid, ctx: &CommandContext) -> Result<ResultBundleAggregate, ServiceError> {
        self.on_bundle(self.bundles.execute(bundle_id, BundleCommand::SucceedReview, ctx).await).await
    }

    pub async fn reset_bundle_to_submission_finished(
        &self,
        bundle_id: Uuid,
        ctx: &CommandContext,
    ) -> Result<ResultBundleAggregate, ServiceError> {
        let command = BundleCommand::ResetToSubmissionFinished;
        self.on_bundle(self.bundles.execute(bundle_id, command, ctx).await).await
    }
}
