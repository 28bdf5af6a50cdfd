//! Error types for dirq.

use std::path::PathBuf;

use thiserror::Error;

use crate::model::State;

#[derive(Debug, Error)]
pub enum Error {
    /// The queue's base path exists but is not a directory.
    #[error("queue base path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("no such file: {}", .0.display())]
    NotFound(PathBuf),

    /// A file name that would not fit in a processing slot name.
    #[error("file name is {len} bytes, longer than the {max} a queued file may have")]
    NameTooLong { len: usize, max: usize },

    /// Status query for an outcome the retention policy discards.
    #[error("retention policy does not keep {0} jobs")]
    PolicyUnsupported(State),

    #[error("invalid job id: {0}")]
    InvalidId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
