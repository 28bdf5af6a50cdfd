//! Stall recovery: reclaim processing slots whose owner process is gone.
//!
//! A slot is only ever reclaimed when the liveness probe reports the owner
//! definitely does not exist. Unparseable names, probe errors and lost races
//! leave the slot for a later scan. The same scan clears staging files
//! abandoned by submitters that died before publishing.

use std::path::{Path, PathBuf};

use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{BACKUP_SUFFIX, JobId, QueuedName, SlotName, State};
use crate::telemetry::metrics;

pub(super) const STAGED_SUFFIX: &str = ".staged";

impl super::Queue {
    /// Scan `processing/` and reclaim every slot with a dead owner, then
    /// sweep staging files abandoned by dead submitters.
    /// Returns the number of slots reclaimed.
    pub fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for name in self.entry_names(State::Processing)? {
            let Some(slot) = SlotName::parse(&name) else {
                continue;
            };
            if process_alive(slot.owner) {
                continue;
            }
            if self.reclaim(&slot) {
                recovered += 1;
            }
        }
        self.sweep_staging()?;
        Ok(recovered)
    }

    fn reclaim(&self, stale: &SlotName) -> bool {
        let id = stale.job.id();
        let processing = self.layout.dir(State::Processing);

        // Taking the slot over under our own pid is atomic, so one recoverer
        // wins. Should we die before finishing, the slot stays in
        // `processing/` with a dead owner and the next scan picks it up.
        let slot = processing.join(SlotName::new(stale.job.clone(), self.pid).to_string());
        if let Err(e) = std::fs::rename(processing.join(stale.to_string()), &slot) {
            debug!(job.id = %id, error = %e, "stale slot already reclaimed");
            return false;
        }

        let kept = self.retention.keeps(State::Interrupted) && self.keep_interrupted(&slot, stale);

        if let Err(e) = std::fs::remove_dir_all(&slot) {
            warn!(path = %slot.display(), error = %e, "could not remove reclaimed slot");
        }

        metrics::jobs_recovered().add(1, &[KeyValue::new("kept", kept)]);
        info!(job.id = %id, owner = stale.owner, kept, "recovered interrupted job");
        true
    }

    fn keep_interrupted(&self, slot: &Path, stale: &SlotName) -> bool {
        let id = stale.job.id();
        let target = self.layout.dir(State::Interrupted).join(id.to_string());
        if target.exists() {
            // An earlier recoverer moved it and died before removing the slot.
            return true;
        }
        let Some(artifact) = find_artifact(slot, &stale.job) else {
            warn!(job.id = %id, "stale slot held no artifact");
            return false;
        };
        match std::fs::rename(&artifact, &target) {
            Ok(()) => true,
            Err(e) => {
                warn!(job.id = %id, error = %e, "could not keep interrupted job");
                false
            }
        }
    }

    /// Remove `tmp/<id>.<pid>.staged` files whose submitter is gone.
    fn sweep_staging(&self) -> Result<()> {
        for entry in std::fs::read_dir(self.layout.tmp())? {
            let Ok(entry) = entry else { continue };
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(owner) = staging_owner(&name) else {
                continue;
            };
            if process_alive(owner) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = %name, owner, "removed abandoned staging file"),
                Err(e) => debug!(file = %name, error = %e, "could not remove staging file"),
            }
        }
        Ok(())
    }
}

/// Owner pid of a staging file name `<id>.<pid>.staged`.
pub(super) fn staging_owner(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(STAGED_SUFFIX)?;
    let (id, pid) = stem.rsplit_once('.')?;
    id.parse::<JobId>().ok()?;
    if pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    pid.parse().ok()
}

/// The artifact left in a slot: the working copy, or the backup if the
/// handler had already consumed the working copy.
pub(super) fn find_artifact(slot: &Path, job: &QueuedName) -> Option<PathBuf> {
    let working = slot.join(job.working_name());
    if working.exists() {
        return Some(working);
    }
    let backup = slot.join(format!("{}{BACKUP_SUFFIX}", job.working_name()));
    backup.exists().then_some(backup)
}

/// Does a process with this id exist?
///
/// Probes with `kill(pid, 0)`. Only `ESRCH` counts as "gone"; a process we
/// may not signal (`EPERM`), or an id the probe cannot represent, is
/// reported alive so its slot is never reclaimed on a guess.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    // 0 and negative values address process groups, not a process.
    let Ok(pid) = i32::try_from(pid) else {
        return true;
    };
    if pid == 0 {
        return true;
    }
    // SAFETY: signal 0 performs only the existence and permission checks.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    alive_from_errno(std::io::Error::last_os_error().raw_os_error())
}

/// Verdict for a failed `kill(pid, 0)`: only `ESRCH` means the process is gone.
#[cfg(unix)]
fn alive_from_errno(errno: Option<i32>) -> bool {
    errno != Some(libc::ESRCH)
}

/// Without a liveness probe every owner is assumed alive, so stalled jobs
/// are never recovered automatically on this platform.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}
