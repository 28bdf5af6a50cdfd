//! Dispatch and retention: run the handler on a claimed job and give the
//! job its final resting place.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, warn};

use super::claim::ClaimedJob;
use super::recovery::find_artifact;
use crate::model::{BACKUP_SUFFIX, JobId, Outcome, QueuedName, State};
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns. `Err` is recorded as [`Outcome::Failed`].
pub type HandlerResult = std::result::Result<Outcome, BoxError>;

/// User-supplied processing for claimed jobs.
///
/// Returning an error or panicking counts as [`Outcome::Failed`]; neither
/// escapes the receive cycle.
pub trait Handler {
    /// Process a data job.
    fn handle_data(&self, id: JobId, payload: &[u8]) -> HandlerResult;

    /// Process a file job. `path` is an absolute path to a working copy the
    /// handler owns: it may read, move or delete it.
    fn handle_file(&self, id: JobId, original_name: &str, path: &Path) -> HandlerResult;
}

impl super::Queue {
    /// Run `handler` on a claimed job, finalize it and release its slot.
    pub(crate) fn process<H: Handler + ?Sized>(&self, handler: &H, job: ClaimedJob) -> Outcome {
        let id = job.name.id();
        let span = start_job_span(&id, job.name.kind());
        let _entered = span.enter();
        record_state_transition(&span, State::Queued, State::Processing);

        let start = Instant::now();
        let outcome = match &job.name {
            QueuedName::Data(_) => match std::fs::read(&job.working) {
                Ok(payload) => invoke(id, || handler.handle_data(id, &payload)),
                Err(e) => {
                    warn!(job.id = %id, error = %e, "could not read payload");
                    Outcome::Failed
                }
            },
            QueuedName::File { original_name, .. } => {
                // Taken even under a keep-nothing policy: a Retry must be
                // able to re-queue a file the handler consumed.
                self.make_backup(id, &job.working);
                invoke(id, || handler.handle_file(id, original_name, &job.working))
            }
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let kept = self.finalize(&job, outcome);
        match outcome {
            Outcome::Retry => record_state_transition(&span, State::Processing, State::Queued),
            Outcome::Success => record_state_transition(&span, State::Processing, State::Success),
            Outcome::Failed => record_state_transition(&span, State::Processing, State::Failed),
        }

        // Releases the lock whatever happened above.
        if let Err(e) = std::fs::remove_dir_all(&job.slot) {
            warn!(slot = %job.slot.display(), error = %e, "could not remove processing slot");
        }

        metrics::jobs_finalized().add(
            1,
            &[
                KeyValue::new("outcome", outcome.to_string()),
                KeyValue::new("kept", kept),
            ],
        );
        metrics::job_duration_ms().record(elapsed_ms, &[KeyValue::new("outcome", outcome.to_string())]);
        debug!(job.id = %id, %outcome, kept, elapsed_ms, "job finalized");
        outcome
    }

    fn make_backup(&self, id: JobId, working: &Path) {
        let backup = backup_path(working);
        if let Err(e) = std::fs::copy(working, &backup) {
            warn!(job.id = %id, error = %e, "could not back up working copy");
        }
    }

    /// Move the job's artifact to where `outcome` and the retention policy
    /// say it belongs. Returns whether an artifact was kept. Failures are
    /// logged, never raised: the slot is released regardless.
    fn finalize(&self, job: &ClaimedJob, outcome: Outcome) -> bool {
        let id = job.name.id();
        let target = match outcome {
            Outcome::Retry => self.layout.dir(State::Queued).join(job.name.to_string()),
            Outcome::Success | Outcome::Failed => {
                let state = if outcome == Outcome::Success {
                    State::Success
                } else {
                    State::Failed
                };
                if !self.retention.keeps(state) {
                    return false;
                }
                self.layout.dir(state).join(id.to_string())
            }
        };

        let Some(artifact) = find_artifact(&job.slot, &job.name) else {
            warn!(job.id = %id, %outcome, "handler consumed the job and no backup exists");
            return false;
        };
        match std::fs::rename(&artifact, &target) {
            Ok(()) => true,
            Err(e) => {
                warn!(job.id = %id, %outcome, error = %e, "could not move job artifact");
                false
            }
        }
    }
}

fn backup_path(working: &Path) -> PathBuf {
    let mut name = working.file_name().unwrap_or_default().to_os_string();
    name.push(BACKUP_SUFFIX);
    working.with_file_name(name)
}

fn invoke(id: JobId, f: impl FnOnce() -> HandlerResult) -> Outcome {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(job.id = %id, error = %e, "handler returned an error");
            Outcome::Failed
        }
        Err(_) => {
            warn!(job.id = %id, "handler panicked");
            Outcome::Failed
        }
    }
}
