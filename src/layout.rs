//! Queue directory layout.
//!
//! Every queue is a base directory with six fixed children. All of them must
//! live on one filesystem: every state change is a `rename(2)` between them.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::State;

/// Staging area for ingress and recovery.
pub const TMP_DIR: &str = "tmp";

/// Paths of one queue's directories.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    /// Create the base directory and its children. Idempotent: existing
    /// directories and their contents are left alone.
    pub fn initialize(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        if base.exists() && !base.is_dir() {
            return Err(Error::NotADirectory(base));
        }

        std::fs::create_dir_all(&base)?;
        // Handlers receive absolute working paths.
        let layout = Self {
            base: std::path::absolute(&base)?,
        };
        for state in State::ALL {
            create_dir_idempotent(&layout.dir(state))?;
        }
        create_dir_idempotent(&layout.tmp())?;

        debug!(base = %layout.base.display(), "queue layout ready");
        Ok(layout)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding jobs in `state`.
    pub fn dir(&self, state: State) -> PathBuf {
        self.base.join(state.dir_name())
    }

    pub fn tmp(&self) -> PathBuf {
        self.base.join(TMP_DIR)
    }
}

fn create_dir_idempotent(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(())
            } else {
                Err(Error::NotADirectory(path.to_path_buf()))
            }
        }
        Err(e) => Err(e.into()),
    }
}
