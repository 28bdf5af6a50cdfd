//! Integration tests for telemetry initialization and span helpers.

use dirq::{JobId, JobKind, State};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Only one global subscriber can be set per process; a second init in
    // the same test binary returns Err, which is acceptable here.
    let config = dirq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "dirq-test".to_string(),
        log_level: "debug".to_string(),
        queue_base: None,
        retention: None,
    };
    let _guard = dirq::telemetry::init_telemetry(config);
}

#[test]
fn job_span_creates_and_records_transition() {
    let id = JobId::generate();
    let span = dirq::telemetry::job::start_job_span(&id, JobKind::Data);
    dirq::telemetry::job::record_state_transition(&span, State::Queued, State::Processing);
    dirq::telemetry::job::record_state_transition(&span, State::Processing, State::Success);
}

#[test]
fn metric_instruments_work_without_a_provider() {
    dirq::telemetry::metrics::jobs_submitted().add(1, &[]);
    dirq::telemetry::metrics::job_duration_ms().record(1.5, &[]);
}
