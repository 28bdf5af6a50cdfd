//! Claim protocol: move a queued job into a slot only this process owns.
//!
//! The slot directory `<queued-name>.<pid>` is created with `mkdir(2)`, which
//! fails if it already exists, and the job is then renamed into it. The
//! kernel serializes renames of the same source name, so across all racing
//! consumers exactly one rename succeeds; every loser just skips the job.

use std::path::PathBuf;

use rand::seq::SliceRandom as _;
use tracing::debug;

use crate::error::Result;
use crate::model::{QueuedName, SlotName, State};
use crate::telemetry::metrics;

/// A job this process now exclusively owns.
#[derive(Debug)]
pub(crate) struct ClaimedJob {
    pub name: QueuedName,
    /// The slot directory; its existence is the lock.
    pub slot: PathBuf,
    /// The job's artifact inside the slot.
    pub working: PathBuf,
}

impl super::Queue {
    /// Queued jobs eligible for claiming. Shuffled when `randomize` is set so
    /// competing consumers spread out; truncated to `limit` unless it is 0.
    pub(crate) fn list_candidates(
        &self,
        randomize: bool,
        limit: usize,
    ) -> Result<Vec<QueuedName>> {
        let mut candidates: Vec<QueuedName> = self
            .entry_names(State::Queued)?
            .iter()
            .filter_map(|name| QueuedName::parse(name))
            .collect();

        if randomize {
            candidates.shuffle(&mut rand::thread_rng());
        }
        if limit > 0 {
            candidates.truncate(limit);
        }
        Ok(candidates)
    }

    /// Try to take ownership of `name`. `None` means another consumer got
    /// there first or the filesystem refused; either way, move on.
    pub(crate) fn try_claim(&self, name: &QueuedName) -> Option<ClaimedJob> {
        let source = self.layout.dir(State::Queued).join(name.to_string());
        if std::fs::symlink_metadata(&source).is_err() {
            debug!(job.id = %name.id(), "already claimed elsewhere");
            return None;
        }

        let slot = self
            .layout
            .dir(State::Processing)
            .join(SlotName::new(name.clone(), self.pid).to_string());
        if let Err(e) = std::fs::create_dir(&slot) {
            // AlreadyExists: another thread of this process holds the job.
            debug!(job.id = %name.id(), error = %e, "could not create processing slot");
            metrics::claims_lost().add(1, &[]);
            return None;
        }

        let working = slot.join(name.working_name());
        if let Err(e) = std::fs::rename(&source, &working) {
            debug!(job.id = %name.id(), error = %e, "lost claim race");
            let _ = std::fs::remove_dir(&slot);
            metrics::claims_lost().add(1, &[]);
            return None;
        }

        metrics::jobs_claimed().add(1, &[]);
        debug!(job.id = %name.id(), slot = %slot.display(), "job claimed");
        Some(ClaimedJob {
            name: name.clone(),
            slot,
            working,
        })
    }
}
