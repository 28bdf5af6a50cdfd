//! Ingress: stage a payload in `tmp/`, then rename it into `queued/`.
//!
//! Scanners only ever see fully written jobs because the final step is a
//! single rename within one filesystem.

use std::fs::File;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use opentelemetry::KeyValue;
use tracing::{debug, info};

use super::recovery::STAGED_SUFFIX;
use crate::error::{Error, Result};
use crate::model::{JobId, JobKind, MAX_ORIGINAL_NAME, QueuedName, State};
use crate::telemetry::metrics;

impl super::Queue {
    /// Queue an opaque byte payload.
    pub fn submit_data(&self, data: impl AsRef<[u8]>) -> Result<JobId> {
        let id = JobId::generate();
        let staged = self.staging_path(id);

        if let Err(e) = write_synced(&staged, data.as_ref()) {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }

        self.publish(&staged, QueuedName::Data(id))?;
        Ok(id)
    }

    /// Queue an external file. With `copy` the source is left in place,
    /// otherwise it is moved into the queue.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if `path` does not exist, [`Error::NameTooLong`]
    /// if its name exceeds [`MAX_ORIGINAL_NAME`] bytes.
    pub fn submit_file(&self, path: impl AsRef<Path>, copy: bool) -> Result<JobId> {
        let source = path.as_ref();
        if !source.exists() {
            return Err(Error::NotFound(source.to_path_buf()));
        }
        let original_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Other(format!("unusable file name: {}", source.display()))
            })?
            .to_string();
        if original_name.len() > MAX_ORIGINAL_NAME {
            return Err(Error::NameTooLong {
                len: original_name.len(),
                max: MAX_ORIGINAL_NAME,
            });
        }

        let id = JobId::generate();
        let staged = self.staging_path(id);

        let staged_ok = if copy {
            copy_synced(source, &staged)
        } else {
            move_into(source, &staged)
        };
        if let Err(e) = staged_ok {
            let _ = std::fs::remove_file(&staged);
            return Err(e);
        }

        self.publish(&staged, QueuedName::File { id, original_name })?;
        Ok(id)
    }

    fn staging_path(&self, id: JobId) -> PathBuf {
        self.layout
            .tmp()
            .join(format!("{id}.{}{STAGED_SUFFIX}", self.pid))
    }

    fn publish(&self, staged: &Path, name: QueuedName) -> Result<()> {
        let target = self.layout.dir(State::Queued).join(name.to_string());
        if let Err(e) = std::fs::rename(staged, &target) {
            let _ = std::fs::remove_file(staged);
            return Err(e.into());
        }

        let kind = name.kind();
        metrics::jobs_submitted().add(1, &[KeyValue::new("kind", kind.to_string())]);
        match &name {
            QueuedName::File { original_name, .. } => {
                info!(job.id = %name.id(), job.kind = %kind, original_name, "job queued")
            }
            QueuedName::Data(_) => info!(job.id = %name.id(), job.kind = %JobKind::Data, "job queued"),
        }
        Ok(())
    }
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn copy_synced(source: &Path, staged: &Path) -> Result<()> {
    std::fs::copy(source, staged)?;
    File::open(staged)?.sync_all()?;
    Ok(())
}

/// Move `source` into the staging area, falling back to copy + unlink when
/// it lives on another filesystem.
fn move_into(source: &Path, staged: &Path) -> Result<()> {
    match std::fs::rename(source, staged) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            debug!(source = %source.display(), "source on another filesystem, copying");
            copy_synced(source, staged)?;
            std::fs::remove_file(source)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
