//! Job processing span helpers.

use tracing::Span;

use crate::model::{JobId, JobKind, State};

/// Start a span covering one claimed job from handler call to slot release.
///
/// The `job.state` field is declared empty and filled in by
/// [`record_state_transition`].
pub fn start_job_span(id: &JobId, kind: JobKind) -> Span {
    tracing::info_span!(
        "job.process",
        "job.id" = %id,
        "job.kind" = %kind,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a state transition on `span` and emit it as an event.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("job.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::debug!(%from, %to, "state_transition");
    });
}
