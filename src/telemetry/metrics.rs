//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Instruments are created lazily from the `"flowq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("flowq")
}

/// Counter: jobs enqueued.
/// Labels: `queue`, `state` (initial state, "waiting" | "delayed" |
/// "waiting-children").
pub fn jobs_added() -> Counter<u64> {
    meter()
        .u64_counter("flowq.jobs.added")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: lifecycle state transitions.
/// Labels: `queue`, `from`, `to`.
pub fn state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("flowq.jobs.state_transitions")
        .with_description("Number of job state transitions")
        .build()
}

/// Counter: jobs touched by background scans.
/// Labels: `queue`, `operation` ("promote" | "clean").
pub fn queue_scans() -> Counter<u64> {
    meter()
        .u64_counter("flowq.queue.scans")
        .with_description("Jobs moved or removed by background scans")
        .build()
}

/// Counter: expired leases reclaimed by the stalled scan.
/// Labels: `queue`, `outcome` ("waiting" | "failed").
pub fn leases_reclaimed() -> Counter<u64> {
    meter()
        .u64_counter("flowq.leases.reclaimed")
        .with_description("Stalled jobs reclaimed from expired leases")
        .build()
}

/// Histogram: handler execution duration in milliseconds.
/// Labels: `queue`, `job`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("flowq.job.duration_ms")
        .with_description("Handler execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
