use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::bundle::{BundleEvent, BundleState};
use crate::domain::result::ResultEvent;
use crate::event_sourcing::core::{Aggregate, DomainEvent, EventEnvelope, EventSigner};
use crate::event_sourcing::store::{EventStore, EventStoreError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
use super::aggregation::recompute_tallies;
use super::read_model::{BundleSnapshot, ReadModel, ResultSnapshot};

// ============================================================================
// Projection Updater - Event log → Read model
// ============================================================================
//
// 1. Reads each result stream after its checkpoint
// 2. Follows the bundles the result has issued numbers for
// 3. Applies events in per-stream commit order, skipping anything at or
//    below the checkpoint and refusing gaps
// 4. Recomputes tallies whenever the reviewed bundle set changes
//
// A single writer updates the read model; readers never wait for it.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("Gap in stream {stream_id}: expected sequence {expected}, found {found}")]
    Gap { stream_id: Uuid, expected: i64, found: i64 },

    #[error("Signature check failed for event {sequence} of stream {stream_id}")]
    Signature { stream_id: Uuid, sequence: i64 },

    #[error("Cannot apply event {sequence} of stream {stream_id}: {reason}")]
    Apply { stream_id: Uuid, sequence: i64, reason: String },

    #[error("Signature verification error: {0}")]
    Verification(anyhow::Error),
}

impl ProjectionError {
    pub fn reason(&self) -> &'static str {
        match self {
            ProjectionError::Store(_) => "store",
            ProjectionError::Gap { .. } => "gap",
            ProjectionError::Signature { .. } | ProjectionError::Verification(_) => "signature",
            ProjectionError::Apply { .. } => "apply",
        }
    }
}

impl IsTransient for ProjectionError {
    fn is_transient(&self) -> bool {
        // A gap may close once a concurrent append becomes visible
        matches!(self, ProjectionError::Store(_) | ProjectionError::Gap { .. })
    }
}

pub struct ProjectionUpdater {
    results: Arc<dyn EventStore<ResultEvent>>,
    bundles: Arc<dyn EventStore<BundleEvent>>,
    read_model: Arc<ReadModel>,
    signer: Option<EventSigner>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
    tracked: RwLock<BTreeSet<Uuid>>,
    writer: Mutex<()>,
}

impl ProjectionUpdater {
    pub fn new(
        results: Arc<dyn EventStore<ResultEvent>>,
        bundles: Arc<dyn EventStore<BundleEvent>>,
        read_model: Arc<ReadModel>,
    ) -> Self {
        Self {
            results,
            bundles,
            read_model,
            signer: None,
            retry: RetryConfig::default(),
            metrics: None,
            tracked: RwLock::new(BTreeSet::new()),
            writer: Mutex::new(()),
        }
    }

    /// Verify every envelope before applying it
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

    pub fn read_model(&self) -> &Arc<ReadModel> {
        &self.read_model
    }

    /// Include a result in the polling loop
    pub async fn track(&self, result_id: Uuid) {
        self.tracked.write().await.insert(result_id);
    }

    /// Bring one result and its bundles up to date, returns the number of
    /// events applied
    pub async fn catch_up(&self, result_id: Uuid) -> Result<usize, ProjectionError> {
        self.track(result_id).await;
        let _writer = self.writer.lock().await;
        self.catch_up_locked(result_id).await
    }

    /// Drop the cached state of a result and replay its streams from the start
    pub async fn rebuild(&self, result_id: Uuid) -> Result<usize, ProjectionError> {
        self.track(result_id).await;
        let _writer = self.writer.lock().await;
        self.read_model.remove(result_id).await;

        tracing::info!(result_id = %result_id, "Rebuilding result projection");
        self.catch_up_locked(result_id).await
    }

    /// Catch up every tracked result, retrying transient failures from the
    /// last checkpoint
    pub async fn catch_up_all(&self) -> usize {
        let tracked: Vec<Uuid> = self.tracked.read().await.iter().copied().collect();
        let mut applied = 0;

        for result_id in tracked {
            let outcome = retry_on_transient("projection_catch_up", self.retry.clone(), |_attempt| {
                self.catch_up(result_id)
            })
            .await;

            match outcome {
                RetryResult::Success(count) => applied += count,
                RetryResult::Failed(e) | RetryResult::PermanentFailure(e) => {
                    tracing::error!(result_id = %result_id, error = %e, "Projection catch-up failed");
                }
            }
        }

        applied
    }

    /// Poll the store until `shutdown` turns true
    pub fn spawn_polling(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tracing::info!(interval_ms = interval.as_millis() as u64, "🔄 Starting projection polling");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }

                let applied = self.catch_up_all().await;
                if applied > 0 {
                    tracing::debug!(applied = applied, "📬 Projection applied new events");
                }
            }

            tracing::info!("🛑 Projection polling stopped");
        })
    }

    async fn catch_up_locked(&self, result_id: Uuid) -> Result<usize, ProjectionError> {
        let mut snapshot = self.read_model.snapshot_or_new(result_id).await;
        let outcome = self.advance(&mut snapshot).await;

        // Progress up to a failing event is kept, the retry resumes there
        self.read_model.store(snapshot).await;

        if let Err(e) = &outcome {
            if let Some(metrics) = &self.metrics {
                metrics.record_projection_failure(e.reason());
            }
        }
        outcome
    }

    async fn advance(&self, snapshot: &mut ResultSnapshot) -> Result<usize, ProjectionError> {
        let result_id = snapshot.result_id();
        let mut applied = 0;

        for envelope in self.results.load_events_after(result_id, snapshot.checkpoint).await? {
            if self.apply_result_envelope(snapshot, &envelope)? {
                applied += 1;
            }
        }

        let known: Vec<Uuid> = snapshot.known_bundles.iter().copied().collect();
        for bundle_id in known {
            let checkpoint = snapshot.bundles.get(&bundle_id).map_or(0, |b| b.checkpoint);
            for envelope in self.bundles.load_events_after(bundle_id, checkpoint).await? {
                if !snapshot.known_bundles.contains(&bundle_id) {
                    break;
                }
                if self.apply_bundle_envelope(snapshot, &envelope)? {
                    applied += 1;
                }
            }
        }

        Ok(applied)
    }

    fn check_envelope<E: DomainEvent>(
        &self,
        envelope: &EventEnvelope<E>,
        checkpoint: i64,
    ) -> Result<bool, ProjectionError> {
        let stream_id = envelope.aggregate_id;
        let sequence = envelope.sequence_number;

        if sequence <= checkpoint {
            tracing::debug!(stream_id = %stream_id, sequence = sequence, "⏭️  Skipping already applied event");
            return Ok(false);
        }
        if sequence != checkpoint + 1 {
            return Err(ProjectionError::Gap { stream_id, expected: checkpoint + 1, found: sequence });
        }

        if let Some(signer) = &self.signer {
            if !signer.verify(envelope).map_err(ProjectionError::Verification)? {
                tracing::warn!(stream_id = %stream_id, sequence = sequence, "Rejecting event with invalid signature");
                return Err(ProjectionError::Signature { stream_id, sequence });
            }
        }

        Ok(true)
    }

    /// Apply one result event, `false` when it was applied before
    pub fn apply_result_envelope(
        &self,
        snapshot: &mut ResultSnapshot,
        envelope: &EventEnvelope<ResultEvent>,
    ) -> Result<bool, ProjectionError> {
        if !self.check_envelope(envelope, snapshot.checkpoint)? {
            return Ok(false);
        }
        let sequence = envelope.sequence_number;

        snapshot
            .result
            .apply_event(&envelope.event_data)
            .map_err(|e| ProjectionError::Apply {
                stream_id: envelope.aggregate_id,
                sequence,
                reason: e.to_string(),
            })?;
        snapshot.result.set_version(sequence);
        snapshot.checkpoint = sequence;

        match &envelope.event_data {
            ResultEvent::BundleNumberGenerated(e) => {
                snapshot.known_bundles.insert(e.bundle_id);
            }
            ResultEvent::ResultsReset => {
                snapshot.bundles.clear();
                snapshot.known_bundles.clear();
                snapshot.tallies = Default::default();
            }
            _ => {}
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_projected("result");
        }
        Ok(true)
    }

    /// Apply one event of a bundle owned by `snapshot`, `false` when it was
    /// applied before or belongs to a discarded result generation
    pub fn apply_bundle_envelope(
        &self,
        snapshot: &mut ResultSnapshot,
        envelope: &EventEnvelope<BundleEvent>,
    ) -> Result<bool, ProjectionError> {
        let bundle_id = envelope.aggregate_id;
        let sequence = envelope.sequence_number;
        let checkpoint = snapshot.bundles.get(&bundle_id).map_or(0, |b| b.checkpoint);

        if !self.check_envelope(envelope, checkpoint)? {
            return Ok(false);
        }

        if let BundleEvent::Created(e) = &envelope.event_data {
            if e.result_id != snapshot.result_id() || e.result_epoch != snapshot.result.reset_epoch {
                tracing::debug!(bundle_id = %bundle_id, "Ignoring bundle of a reset result");
                snapshot.known_bundles.remove(&bundle_id);
                return Ok(false);
            }
            let mut bundle = BundleSnapshot::new(bundle_id, e.bundle_number, e.created_by.clone(), e.list_id);
            bundle.checkpoint = sequence;
            snapshot.bundles.insert(bundle_id, bundle);
            snapshot.known_bundles.insert(bundle_id);
        } else {
            if envelope.event_data == BundleEvent::StatusConfirmed && !snapshot.bundles.contains_key(&bundle_id) {
                tracing::debug!(bundle_id = %bundle_id, "Bundle number abandoned before creation");
                snapshot.known_bundles.remove(&bundle_id);
                return Ok(false);
            }
            let Some(bundle) = snapshot.bundles.get_mut(&bundle_id) else {
                return Err(ProjectionError::Apply {
                    stream_id: bundle_id,
                    sequence,
                    reason: "bundle event before bundle creation".to_string(),
                });
            };

            match &envelope.event_data {
                BundleEvent::Created(_) => {}
                BundleEvent::BallotCreated(e) | BundleEvent::BallotUpdated(e) => {
                    bundle.ballots.insert(e.ballot_number, e.content.clone());
                }
                BundleEvent::BallotDeleted(e) => {
                    bundle.ballots.remove(&e.ballot_number);
                }
                BundleEvent::SubmissionFinished(e) | BundleEvent::CorrectionFinished(e) => {
                    bundle.sample_ballot_numbers = e.sample_ballot_numbers.clone();
                    bundle.state = BundleState::ReadyForReview;
                }
                BundleEvent::ReviewRejected => bundle.state = BundleState::InCorrection,
                BundleEvent::ReviewSucceeded => bundle.state = BundleState::Reviewed,
                BundleEvent::ResetToSubmissionFinished => bundle.state = BundleState::ReadyForReview,
                BundleEvent::Deleted(_) => bundle.state = BundleState::Deleted,
                BundleEvent::StatusConfirmed => {}
            }
            bundle.checkpoint = sequence;
        }

        if envelope.event_data.affects_tallies() {
            snapshot.tallies = recompute_tallies(snapshot.bundles.values());
            if let Some(metrics) = &self.metrics {
                metrics.tally_recomputations.inc();
            }
            tracing::debug!(
                result_id = %snapshot.result_id(),
                reviewed_bundles = snapshot.tallies.reviewed_bundles,
                "Recomputed tallies"
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_projected("bundle");
        }
        Ok(true)
    }
}
