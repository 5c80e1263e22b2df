use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::domain::context::{CommandContext, ContestLookup};
use crate::domain::handling::{build_envelopes, CommandError, Handled};
use crate::event_sourcing::core::{Aggregate, DomainEvent, EventSigner};
use crate::event_sourcing::store::{load_aggregate, EventStore, EventStoreError};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig, RetryResult};

use super::aggregate::ResultAggregate;
use super::commands::ResultCommand;
use super::events::ResultEvent;

// ============================================================================
// Result Command Handler
// ============================================================================
//
// Orchestrates: Contest lookup → Command → Aggregate → Events → Event Store
//
// A lost version race reloads the aggregate and decides again.
//
// ============================================================================

pub struct ResultCommandHandler {
    event_store: Arc<dyn EventStore<ResultEvent>>,
    contests: Arc<dyn ContestLookup>,
    signer: Option<EventSigner>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl ResultCommandHandler {
    pub fn new(event_store: Arc<dyn EventStore<ResultEvent>>, contests: Arc<dyn ContestLookup>) -> Self {
        Self {
            event_store,
            contests,
            signer: None,
            retry: RetryConfig::for_commands(5),
            metrics: None,
        }
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

    pub fn event_store(&self) -> &Arc<dyn EventStore<ResultEvent>> {
        &self.event_store
    }

    /// Load an existing result
    pub async fn load(&self, result_id: Uuid) -> Result<ResultAggregate, CommandError> {
        let result: ResultAggregate = load_aggregate(self.event_store.as_ref(), result_id).await?;
        if !result.is_initialized() {
            return Err(CommandError::NotFound { kind: "result", id: result_id });
        }
        Ok(result)
    }

    /// Complete the caller's context with the current state of a contest
    pub async fn contest_context(
        &self,
        contest_id: Uuid,
        ctx: &CommandContext,
    ) -> Result<CommandContext, CommandError> {
        let state = self
            .contests
            .contest_state(contest_id)
            .await
            .map_err(CommandError::Contest)?;
        Ok(ctx.clone().with_contest(contest_id, state))
    }

    /// Handle a command and persist resulting events
    pub async fn handle(
        &self,
        result_id: Uuid,
        command: ResultCommand,
        ctx: &CommandContext,
    ) -> Result<i64, CommandError> {
        Ok(self.execute(result_id, command, ctx).await?.version)
    }

    /// Like `handle`, also returning the decided events and the new state
    pub async fn execute(
        &self,
        result_id: Uuid,
        command: ResultCommand,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultAggregate>, CommandError> {
        let started = Instant::now();
        let command = &command;

        let outcome = retry_on_transient("result_command", self.retry.clone(), |attempt| {
            self.attempt(result_id, command, ctx, attempt)
        })
        .await;

        match outcome {
            RetryResult::Success(handled) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_command("result", command.name(), started.elapsed().as_secs_f64());
                }
                tracing::info!(
                    result_id = %result_id,
                    command = command.name(),
                    version = handled.version,
                    event_count = handled.events.len(),
                    "Result command handled"
                );
                Ok(handled)
            }
            RetryResult::Failed(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_retry_exhausted("result_command");
                    metrics.record_rejection(command.name(), e.kind());
                }
                Err(e)
            }
            RetryResult::PermanentFailure(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_rejection(command.name(), e.kind());
                }
                tracing::debug!(result_id = %result_id, command = command.name(), error = %e, "Result command rejected");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        result_id: Uuid,
        command: &ResultCommand,
        ctx: &CommandContext,
        attempt: u32,
    ) -> Result<Handled<ResultAggregate>, CommandError> {
        if attempt > 1 {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry_attempt("result_command", attempt);
            }
        }

        // Load current aggregate state
        let aggregate: ResultAggregate = load_aggregate(self.event_store.as_ref(), result_id).await?;

        let contest_id = match command {
            ResultCommand::Initialize { contest_id, .. } if !aggregate.is_initialized() => *contest_id,
            _ if aggregate.is_initialized() => aggregate.contest_id,
            _ => return Err(CommandError::NotFound { kind: "result", id: result_id }),
        };
        let ctx = self.contest_context(contest_id, ctx).await?;

        self.execute_on(aggregate, command, &ctx).await
    }

    /// Decide against an already loaded result and append at its version.
    /// A conflict is returned to the caller, not retried.
    pub async fn execute_on(
        &self,
        aggregate: ResultAggregate,
        command: &ResultCommand,
        ctx: &CommandContext,
    ) -> Result<Handled<ResultAggregate>, CommandError> {
        let result_id = aggregate.aggregate_id();
        let expected_version = aggregate.version();

        // Handle command to get events
        let domain_events = aggregate.handle_command(command, ctx)?;
        if domain_events.is_empty() {
            return Ok(Handled { version: expected_version, events: vec![], aggregate });
        }

        let mut next = aggregate;
        for event in &domain_events {
            next.apply_event(event)?;
        }

        let names: Vec<&'static str> = domain_events.iter().map(|e| e.event_name()).collect();
        let envelopes = build_envelopes(result_id, expected_version, domain_events.clone(), ctx, self.signer.as_ref())?;

        // Append to event store
        let version = match self.event_store.append_events(result_id, expected_version, envelopes).await {
            Ok(version) => version,
            Err(e @ EventStoreError::Conflict { .. }) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_conflict("result");
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

        Ok(Handled { version, events: domain_events, aggregate: next })
    }
}
