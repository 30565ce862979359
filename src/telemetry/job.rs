//! Job execution span helpers.

use tracing::Span;

/// Start a span wrapping one handler execution, from dequeue to
/// settlement.
pub fn start_job_span(queue: &str, job_id: &str, name: &str) -> Span {
    tracing::info_span!(
        "job.process",
        "job.queue" = queue,
        "job.id" = job_id,
        "job.name" = name,
    )
}

/// Record how the job settled on the current span.
pub fn record_settlement(outcome: &str) {
    tracing::info!(outcome, "job settled");
}
