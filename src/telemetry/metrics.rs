//! Metric instrument factories for dirq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a provider (the default for library users) every instrument is
//! a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("dirq")
}

/// Counter: jobs published into `queued/`.
/// Labels: `kind` ("data" | "file").
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("dirq.jobs.submitted")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: jobs moved into a processing slot by this process.
pub fn jobs_claimed() -> Counter<u64> {
    meter()
        .u64_counter("dirq.jobs.claimed")
        .with_description("Number of jobs claimed")
        .build()
}

/// Counter: claim attempts that lost to another consumer.
pub fn claims_lost() -> Counter<u64> {
    meter()
        .u64_counter("dirq.claim.lost")
        .with_description("Number of claim attempts lost to a peer")
        .build()
}

/// Counter: jobs whose handler ran to an outcome.
/// Labels: `outcome` ("success" | "failed" | "retry"), `kept`.
pub fn jobs_finalized() -> Counter<u64> {
    meter()
        .u64_counter("dirq.jobs.finalized")
        .with_description("Number of jobs finalized after dispatch")
        .build()
}

/// Counter: stale processing slots reclaimed.
/// Labels: `kept`.
pub fn jobs_recovered() -> Counter<u64> {
    meter()
        .u64_counter("dirq.jobs.recovered")
        .with_description("Number of interrupted jobs recovered")
        .build()
}

/// Histogram: handler duration in milliseconds.
/// Labels: `outcome`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("dirq.job.duration_ms")
        .with_description("Handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
