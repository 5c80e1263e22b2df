use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::domain::context::CommandContext;
use crate::domain::errors::TallyError;
use crate::domain::handling::{build_envelopes, CommandError, Handled};
use crate::domain::numbering::{BallotNumbering, BundleNumberRequest};
use crate::domain::result::{
    BundleReviewStatus, BundleStatusTracked, ResultCommand, ResultCommandHandler, ResultEvent,
};
use crate::domain::sampling::select_sample;
use crate::event_sourcing::core::{Aggregate, DomainEvent, EventSigner};
use crate::event_sourcing::store::{load_aggregate, EventStore, EventStoreError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

use super::aggregate::ResultBundleAggregate;
use super::commands::{BundleCommand, BundleContext};
use super::events::BundleEvent;
use super::value_objects::ParentResult;

// ============================================================================
// Result Bundle Command Handler
// ============================================================================
//
// Orchestrates: Parent result → Command → Aggregate → Events → Event Store
//
// Closing a bundle draws the review sample here, so the aggregate only ever
// sees a fixed list of ballot numbers.
//
// Review status changes are reported to the parent result:
// - leaving Reviewed reserves the pending status on the result before the
//   bundle events are appended, at the result version the decision read
// - any other change appends the bundle events first and reports after,
//   best effort; `sync_parent` repairs a report that never arrived
//
// ============================================================================

pub struct BundleCommandHandler {
    event_store: Arc<dyn EventStore<BundleEvent>>,
    results: Arc<ResultCommandHandler>,
    rng: Mutex<StdRng>,
    signer: Option<EventSigner>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl BundleCommandHandler {
    pub fn new(event_store: Arc<dyn EventStore<BundleEvent>>, results: Arc<ResultCommandHandler>) -> Self {
        Self {
            event_store,
            results,
            rng: Mutex::new(StdRng::from_os_rng()),
            signer: None,
            retry: RetryConfig::for_commands(5),
            metrics: None,
        }
    }

    /// Reproducible sample draws
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_signer(mut self, signer: EventSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn event_store(&self) -> &Arc<dyn EventStore<BundleEvent>> {
        &self.event_store
    }

    pub async fn load(&self, bundle_id: Uuid) -> Result<ResultBundleAggregate, CommandError> {
        let bundle: ResultBundleAggregate = load_aggregate(self.event_store.as_ref(), bundle_id).await?;
        if !bundle.is_initialized() {
            return Err(CommandError::NotFound { kind: "bundle", id: bundle_id });
        }
        Ok(bundle)
    }

    /// Issue a bundle number on the result, then create the bundle with the
    /// entry definition the result holds at that moment.
    ///
    /// A bundle id the result already numbered keeps its number, so a
    /// creation that failed after the number was issued can be repeated.
    pub async fn create_bundle(
        &self,
        result_id: Uuid,
        bundle_id: Uuid,
        request: BundleNumberRequest,
        list_id: Option<Uuid>,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError> {
        let existing: ResultBundleAggregate = load_aggregate(self.event_store.as_ref(), bundle_id).await?;
        if existing.is_initialized() {
            return Err(TallyError::invalid_argument(format!("bundle {bundle_id} already exists")).into());
        }

        let parent = self.results.load(result_id).await?;
        let issued = parent.bundles.get(&bundle_id).map(|tracked| tracked.number);
        let (bundle_number, parent) = match issued {
            Some(number) => (number, parent),
            None => {
                let issued = self
                    .results
                    .execute(result_id, ResultCommand::GenerateBundleNumber { bundle_id, request }, ctx)
                    .await?;
                let number = issued
                    .events
                    .iter()
                    .find_map(|event| match event {
                        ResultEvent::BundleNumberGenerated(e) if e.bundle_id == bundle_id => Some(e.bundle_number),
                        _ => None,
                    })
                    .ok_or(CommandError::NotFound { kind: "bundle number for", id: bundle_id })?;
                (number, issued.aggregate)
            }
        };
        let entry = parent.entry_params();

        let command = BundleCommand::Create {
            result_id,
            result_epoch: parent.reset_epoch,
            bundle_number,
            list_id,
            numbering: BallotNumbering {
                generation: entry.ballot_number_generation,
                bundle_number,
                bundle_size: entry.ballot_bundle_size,
            },
            sample_size: entry.ballot_bundle_sample_size,
            business_type: parent.business_type,
        };

        self.execute(bundle_id, command, ctx).await
    }

    /// Close the bundle after entry, drawing the review sample
    pub async fn finish_submission(
        &self,
        bundle_id: Uuid,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError> {
        self.run(bundle_id, ctx, "BundleSubmissionFinished", |bundle| BundleCommand::SubmissionFinished {
            sample: self.draw_sample(bundle),
        })
        .await
    }

    /// Close the bundle after a correction round, drawing a fresh sample
    pub async fn finish_correction(
        &self,
        bundle_id: Uuid,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError> {
        self.run(bundle_id, ctx, "BundleCorrectionFinished", |bundle| BundleCommand::CorrectionFinished {
            sample: self.draw_sample(bundle),
        })
        .await
    }

    /// Handle a command and persist resulting events
    pub async fn handle(
        &self,
        bundle_id: Uuid,
        command: BundleCommand,
        ctx: &CommandContext,
    ) -> Result<i64, CommandError> {
        Ok(self.execute(bundle_id, command, ctx).await?.version)
    }

    pub async fn execute(
        &self,
        bundle_id: Uuid,
        command: BundleCommand,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError> {
        let name = command.name();
        self.run(bundle_id, ctx, name, |_| command.clone()).await
    }

    /// Bring the bundle statuses a result tracks in line with the bundle
    /// streams. An entry that may still have a write in flight (a number
    /// without a bundle, or a reservation ahead of its bundle) is settled by
    /// appending `StatusConfirmed` to the bundle first, so that write
    /// conflicts and is decided again. A number whose bundle was never
    /// created ends up deleted.
    pub async fn sync_parent(&self, result_id: Uuid, ctx: &CommandContext) -> Result<(), CommandError> {
        let parent = self.results.load(result_id).await?;
        let ctx = self.results.contest_context(parent.contest_id, ctx).await?;
        ctx.ensure_contest_unlocked()?;

        for (bundle_id, tracked) in &parent.bundles {
            if tracked.status == BundleReviewStatus::Deleted && !tracked.reserved {
                continue;
            }
            let mut bundle: ResultBundleAggregate = load_aggregate(self.event_store.as_ref(), *bundle_id).await?;
            let actual = if bundle.is_initialized() { bundle.state.review_status() } else { BundleReviewStatus::Deleted };

            let settled = bundle.is_initialized() && bundle.version() >= tracked.bundle_version;
            if !settled {
                match self.confirm_stream(&bundle, &ctx).await {
                    Ok(version) => bundle.set_version(version),
                    Err(CommandError::Store(EventStoreError::Conflict { .. })) => {
                        tracing::debug!(bundle_id = %bundle_id, "Bundle changed during status sync");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            } else if actual == tracked.status && !tracked.reserved {
                continue;
            }

            let update = BundleStatusTracked {
                bundle_id: *bundle_id,
                result_epoch: parent.reset_epoch,
                status: actual,
                bundle_version: bundle.version(),
                reserved: false,
            };
            self.results
                .execute(result_id, ResultCommand::TrackBundle { update }, &ctx)
                .await?;
        }
        Ok(())
    }

    async fn confirm_stream(&self, bundle: &ResultBundleAggregate, ctx: &CommandContext) -> Result<i64, CommandError> {
        let event = BundleEvent::StatusConfirmed;
        let name = event.event_name();
        let envelopes = build_envelopes(bundle.id, bundle.version(), vec![event], ctx, self.signer.as_ref())?;
        let version = self.event_store.append_events(bundle.id, bundle.version(), envelopes).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_appended(name);
        }
        Ok(version)
    }

    fn status_update(bundle: &ResultBundleAggregate, bundle_version: i64, reserved: bool) -> ResultCommand {
        ResultCommand::TrackBundle {
            update: BundleStatusTracked {
                bundle_id: bundle.id,
                result_epoch: bundle.result_epoch,
                status: bundle.state.review_status(),
                bundle_version,
                reserved,
            },
        }
    }

    /// Best effort, a lost report keeps the bundle counted as it was
    async fn report_status(&self, bundle: &ResultBundleAggregate, ctx: &CommandContext) {
        let command = Self::status_update(bundle, bundle.version(), false);
        if let Err(e) = self.results.execute(bundle.result_id, command, ctx).await {
            tracing::warn!(
                bundle_id = %bundle.id,
                result_id = %bundle.result_id,
                error = %e,
                "Failed to report bundle status to result"
            );
        }
    }

    fn draw_sample(&self, bundle: &ResultBundleAggregate) -> Vec<u32> {
        let numbers = bundle.ballot_numbers();
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        select_sample(&mut *rng, bundle.sample_size, &numbers)
    }

    async fn run<F>(
        &self,
        bundle_id: Uuid,
        ctx: &CommandContext,
        name: &'static str,
        decide: F,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError>
    where
        F: Fn(&ResultBundleAggregate) -> BundleCommand,
    {
        let started = Instant::now();
        let decide = &decide;

        let outcome = retry_on_transient("bundle_command", self.retry.clone(), |attempt| {
            self.attempt(bundle_id, ctx, decide, attempt)
        })
        .await;

        match outcome {
            RetryResult::Success(handled) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_command("bundle", name, started.elapsed().as_secs_f64());
                }
                tracing::info!(
                    bundle_id = %bundle_id,
                    command = name,
                    version = handled.version,
                    state = ?handled.aggregate.state,
                    "Bundle command handled"
                );
                Ok(handled)
            }
            RetryResult::Failed(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry_exhausted("bundle_command");
                    metrics.record_rejection(name, e.kind());
                }
                Err(e)
            }
            RetryResult::PermanentFailure(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(name, e.kind());
                }
                tracing::debug!(bundle_id = %bundle_id, command = name, error = %e, "Bundle command rejected");
                Err(e)
            }
        }
    }

    async fn attempt<F>(
        &self,
        bundle_id: Uuid,
        ctx: &CommandContext,
        decide: &F,
        attempt: u32,
    ) -> Result<Handled<ResultBundleAggregate>, CommandError>
    where
        F: Fn(&ResultBundleAggregate) -> BundleCommand,
    {
        if attempt > 1 {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry_attempt("bundle_command", attempt);
            }
        }

        // Load current aggregate state
        let bundle: ResultBundleAggregate = load_aggregate(self.event_store.as_ref(), bundle_id).await?;
        let command = decide(&bundle);

        let result_id = match &command {
            BundleCommand::Create { result_id, .. } if !bundle.is_initialized() => *result_id,
            _ if bundle.is_initialized() => bundle.result_id,
            _ => return Err(CommandError::NotFound { kind: "bundle", id: bundle_id }),
        };

        let parent = self.results.load(result_id).await?;
        let bundle_ctx = BundleContext {
            command: self.results.contest_context(parent.contest_id, ctx).await?,
            parent: ParentResult::from(&parent),
        };

        let expected_version = bundle.version();
        let status_before = bundle.is_initialized().then(|| bundle.state.review_status());

        // Handle command to get events
        let domain_events = bundle.handle_command(&command, &bundle_ctx)?;
        if domain_events.is_empty() {
            return Ok(Handled { version: expected_version, events: vec![], aggregate: bundle });
        }

        let mut next = bundle;
        for event in &domain_events {
            next.apply_event(event)?;
        }

        let status_after = next.state.review_status();
        let changed = status_before.is_some_and(|before| before != status_after);
        let reopens = status_before == Some(BundleReviewStatus::Reviewed) && status_after == BundleReviewStatus::Pending;
        if reopens {
            // A finish decided concurrently conflicts with this reservation
            let reserved_version = expected_version + domain_events.len() as i64;
            let reservation = Self::status_update(&next, reserved_version, true);
            self.results
                .execute_on(parent, &reservation, &bundle_ctx.command)
                .await?;
        }

        let names: Vec<&'static str> = domain_events.iter().map(|e| e.event_name()).collect();
        let envelopes = build_envelopes(
            bundle_id,
            expected_version,
            domain_events.clone(),
            &bundle_ctx.command,
            self.signer.as_ref(),
        )?;

        // Append to event store
        let version = match self.event_store.append_events(bundle_id, expected_version, envelopes).await {
            Ok(version) => version,
            Err(e @ EventStoreError::Conflict { .. }) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_conflict("bundle");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        next.set_version(version);

        if let Some(metrics) = &self.metrics {
            for name in names {
                metrics.record_appended(name);
            }
        }

        if changed {
            self.report_status(&next, &bundle_ctx.command).await;
        }

        Ok(Handled { version, events: domain_events, aggregate: next })
    }
}
