//! Prometheus metrics for the dispatch engine.
//!
//! Metrics are always recorded through the `metrics` facade; they are only
//! exported once a recorder is installed, for example with [`MetricsRecorder`]:
//!
//! - Dispatch calls, invocations, errors and latency
//! - Writes dropped because a call was cancelled
//! - Worker intake and in-flight calls
//!
//! # Example
//!
//! ```rust,no_run
//! use mediator_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! // serve this from the application's own `/metrics` endpoint
//! let body = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for the dispatch metrics.
///
/// Only installs the recorder; the embedding application serves
/// [`MetricsRecorder::render`] over its own HTTP stack.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a warning
    /// and succeeds without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Dispatch metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "dispatch_calls_total",
        "Total number of Commands::handle calls"
    );
    describe_counter!(
        "dispatch_invocations_total",
        "Total number of handler invocations, by event type"
    );
    describe_counter!(
        "dispatch_errors_total",
        "Total number of engine errors, by kind"
    );
    describe_counter!(
        "dispatch_cancelled_total",
        "Total number of calls ended by context cancellation"
    );
    describe_histogram!(
        "dispatch_duration_seconds",
        "Time taken to resolve one call"
    );
    describe_counter!(
        "dispatch_writes_dropped_total",
        "Total number of handler writes dropped after cancellation or done"
    );

    describe_counter!(
        "worker_events_accepted_total",
        "Total number of events accepted by workers"
    );
    describe_counter!(
        "worker_events_rejected_total",
        "Total number of events rejected by stopped workers"
    );
    describe_gauge!(
        "worker_in_flight",
        "Number of calls currently running in workers"
    );
}

/// Dispatch loop metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record the start of a call.
    pub fn record_call() {
        counter!("dispatch_calls_total").increment(1);
    }

    /// Record one handler invocation.
    pub fn record_invocation(event_type: &str) {
        counter!("dispatch_invocations_total", "event_type" => event_type.to_owned()).increment(1);
    }

    /// Record an engine error of the given kind.
    pub fn record_error(kind: &'static str) {
        counter!("dispatch_errors_total", "kind" => kind).increment(1);
    }

    /// Record a call ended by cancellation.
    pub fn record_cancelled() {
        counter!("dispatch_cancelled_total").increment(1);
    }

    /// Record the time taken by a finished call.
    pub fn record_duration(duration: Duration) {
        histogram!("dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a dropped write.
    pub fn record_dropped_write() {
        counter!("dispatch_writes_dropped_total").increment(1);
    }
}

/// Worker metrics recorder.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Record an accepted event.
    pub fn record_accepted() {
        counter!("worker_events_accepted_total").increment(1);
    }

    /// Record a rejected event.
    pub fn record_rejected() {
        counter!("worker_events_rejected_total").increment(1);
    }

    /// Record a call starting.
    pub fn record_started() {
        gauge!("worker_in_flight").increment(1.0);
    }

    /// Record a call finishing.
    pub fn record_finished() {
        gauge!("worker_in_flight").decrement(1.0);
    }
}
