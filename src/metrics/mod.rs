// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Command handling (throughput, latency, rejections by error kind)
// - Optimistic concurrency conflicts and retries
// - Events appended per event type
// - Projection progress, failures and tally recomputations
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Command Metrics
    pub commands_handled: IntCounterVec,
    pub commands_rejected: IntCounterVec,
    pub command_duration: HistogramVec,

    // Event Store Metrics
    pub events_appended: IntCounterVec,
    pub concurrency_conflicts: IntCounterVec,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
    pub retry_failure: IntCounterVec,

    // Projection Metrics
    pub projection_events_applied: IntCounterVec,
    pub projection_failures: IntCounterVec,
    pub tally_recomputations: IntCounter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Command Metrics
        let commands_handled = IntCounterVec::new(
            Opts::new("tally_commands_handled_total", "Total commands accepted and persisted"),
            &["aggregate", "command"],
        )?;
        registry.register(Box::new(commands_handled.clone()))?;

        let commands_rejected = IntCounterVec::new(
            Opts::new("tally_commands_rejected_total", "Total commands rejected"),
            &["command", "kind"],
        )?;
        registry.register(Box::new(commands_rejected.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new("tally_command_duration_seconds", "Command handling duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["aggregate"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        // Event Store Metrics
        let events_appended = IntCounterVec::new(
            Opts::new("tally_events_appended_total", "Total events appended to the event store"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let concurrency_conflicts = IntCounterVec::new(
            Opts::new("tally_concurrency_conflicts_total", "Appends rejected by the version check"),
            &["aggregate"],
        )?;
        registry.register(Box::new(concurrency_conflicts.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let retry_failure = IntCounterVec::new(
            Opts::new("retry_failure_total", "Total failed retries after all attempts"),
            &["operation"],
        )?;
        registry.register(Box::new(retry_failure.clone()))?;

        // Projection Metrics
        let projection_events_applied = IntCounterVec::new(
            Opts::new("tally_projection_events_applied_total", "Events applied to the read model"),
            &["stream"],
        )?;
        registry.register(Box::new(projection_events_applied.clone()))?;

        let projection_failures = IntCounterVec::new(
            Opts::new("tally_projection_failures_total", "Projection catch-up failures"),
            &["reason"],
        )?;
        registry.register(Box::new(projection_failures.clone()))?;

        let tally_recomputations = IntCounter::new(
            "tally_recomputations_total",
            "Full recomputations of candidate and answer tallies",
        )?;
        registry.register(Box::new(tally_recomputations.clone()))?;

        Ok(Self {
            registry,
            commands_handled,
            commands_rejected,
            command_duration,
            events_appended,
            concurrency_conflicts,
            retry_attempts_total,
            retry_failure,
            projection_events_applied,
            projection_failures,
            tally_recomputations,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a handled command
    pub fn record_command(&self, aggregate: &str, command: &str, duration_secs: f64) {
        self.commands_handled.with_label_values(&[aggregate, command]).inc();
        self.command_duration.with_label_values(&[aggregate]).observe(duration_secs);
    }

    /// Helper to record a rejected command
    pub fn record_rejection(&self, command: &str, kind: &str) {
        self.commands_rejected.with_label_values(&[command, kind]).inc();
    }

    pub fn record_appended(&self, event_name: &str) {
        self.events_appended.with_label_values(&[event_name]).inc();
    }

    pub fn record_conflict(&self, aggregate: &str) {
        self.concurrency_conflicts.with_label_values(&[aggregate]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    pub fn record_retry_exhausted(&self, operation: &str) {
        self.retry_failure.with_label_values(&[operation]).inc();
    }

    pub fn record_projected(&self, stream: &str) {
        self.projection_events_applied.with_label_values(&[stream]).inc();
    }

    pub fn record_projection_failure(&self, reason: &str) {
        self.projection_failures.with_label_values(&[reason]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.tally_recomputations.inc();
        assert!(!metrics.registry.gather().is_empty());
    }

    #[test]
    fn test_record_command() {
        let metrics = Metrics::new().unwrap();
        metrics.record_command("result", "StartSubmission", 0.002);

        let gathered = metrics.registry.gather();
        let handled = gathered
            .iter()
            .find(|m| m.name() == "tally_commands_handled_total")
            .unwrap();
        assert_eq!(handled.metric[0].counter.value, Some(1.0));
    }

    #[test]
    fn test_record_rejection_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("Plausibilise", "invalid_state");
        metrics.record_rejection("SucceedReview", "permission");

        let gathered = metrics.registry.gather();
        let rejected = gathered
            .iter()
            .find(|m| m.name() == "tally_commands_rejected_total")
            .unwrap();
        assert_eq!(rejected.metric.len(), 2);
    }

    #[test]
    fn test_record_retry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_retry_attempt("result_command", 2);
        metrics.record_retry_attempt("result_command", 3);
        metrics.record_retry_exhausted("result_command");

        let gathered = metrics.registry.gather();
        let attempts = gathered.iter().find(|m| m.name() == "retry_attempts_total").unwrap();
        assert_eq!(attempts.metric.len(), 2); // Two different attempt labels
    }
}
