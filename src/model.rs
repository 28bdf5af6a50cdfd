//! Core data model.
//!
//! A job has no metadata record. Its identity and kind are encoded in the
//! artifact's file name and its state is whichever queue directory currently
//! holds that artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Job Id
// ---------------------------------------------------------------------------

/// Newtype for job identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Millisecond creation time embedded in a time-ordered id.
    ///
    /// Returns `None` for ids that do not carry a timestamp (content-addressed
    /// ids, or ids minted by other tools).
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        if self.0.get_version_num() != 7 {
            return None;
        }
        let b = self.0.as_bytes();
        let ms = b[..6].iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        DateTime::from_timestamp_millis(ms as i64)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    /// Only the canonical hyphenated form is accepted; it is the form used in
    /// file names.
    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 36 {
            return Err(Error::InvalidId(s.to_string()));
        }
        Uuid::try_parse(s)
            .map(JobId)
            .map_err(|_| Error::InvalidId(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Kind / State / Outcome
// ---------------------------------------------------------------------------

/// What a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// An opaque byte payload.
    Data,
    /// A file plus its original base name.
    File,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Data => "data",
            JobKind::File => "file",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a job. Determined solely by the directory the job's
/// artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting in `queued/` for a consumer.
    Queued,
    /// Claimed into a processing slot.
    Processing,
    /// Handler returned success. Terminal.
    Success,
    /// Handler failed or errored. Terminal.
    Failed,
    /// Owning process died mid-processing. Terminal.
    Interrupted,
}

impl State {
    pub const ALL: [State; 5] = [
        State::Queued,
        State::Processing,
        State::Success,
        State::Failed,
        State::Interrupted,
    ];

    /// Name of the directory (under the base) that holds jobs in this state.
    pub fn dir_name(self) -> &'static str {
        match self {
            State::Queued => "queued",
            State::Processing => "processing",
            State::Success => "success",
            State::Failed => "failed",
            State::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Success | State::Failed | State::Interrupted)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for State {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        State::ALL
            .into_iter()
            .find(|state| state.dir_name() == s)
            .ok_or_else(|| Error::Other(format!("unknown state: {s}")))
    }
}

/// What a handler decided about a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    /// Put the job back into `queued/` under the same id. Never terminal.
    Retry,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Retention policy
// ---------------------------------------------------------------------------

/// Which terminal outcomes keep their artifact. Fixed per queue handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Retention(u8);

impl Retention {
    pub const NONE: Retention = Retention(0);
    pub const SUCCESS: Retention = Retention(0b001);
    pub const FAILED: Retention = Retention(0b010);
    pub const INTERRUPTED: Retention = Retention(0b100);
    pub const ALL: Retention = Retention(0b111);

    pub fn contains(self, other: Retention) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether jobs reaching `state` are kept. Transient states are always
    /// tracked.
    pub fn keeps(self, state: State) -> bool {
        match state {
            State::Queued | State::Processing => true,
            State::Success => self.contains(Retention::SUCCESS),
            State::Failed => self.contains(Retention::FAILED),
            State::Interrupted => self.contains(Retention::INTERRUPTED),
        }
    }

    pub fn keeps_any(self) -> bool {
        self.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for Retention {
    fn default() -> Self {
        Retention::ALL
    }
}

impl std::ops::BitOr for Retention {
    type Output = Retention;

    fn bitor(self, rhs: Retention) -> Retention {
        Retention(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Retention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = [State::Success, State::Failed, State::Interrupted]
            .into_iter()
            .filter(|state| self.keeps(*state))
            .map(State::dir_name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(","))
        }
    }
}

impl std::str::FromStr for Retention {
    type Err = Error;

    /// Parses a comma list such as `success,failed`, or `all` / `none`.
    fn from_str(s: &str) -> Result<Self> {
        let mut policy = Retention::NONE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            policy = policy
                | match part {
                    "all" => Retention::ALL,
                    "none" => Retention::NONE,
                    "success" => Retention::SUCCESS,
                    "failed" => Retention::FAILED,
                    "interrupted" => Retention::INTERRUPTED,
                    other => {
                        return Err(Error::Config(format!("unknown retention flag: {other}")));
                    }
                };
        }
        Ok(policy)
    }
}

// ---------------------------------------------------------------------------
// File name encoding
// ---------------------------------------------------------------------------

const DATA_PREFIX: &str = "raw-";
const FILE_PREFIX: &str = "fle-";
const ID_LEN: usize = 36;

/// File name of a data job's payload inside its processing slot.
pub const DATA_SENTINEL: &str = "payload";

/// Suffix appended to a file job's working copy name for its backup.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Longest original name (in bytes) a file job may carry. The slot name
/// `fle-<id>-<name>.<pid>` must fit in one 255-byte path component.
pub const MAX_ORIGINAL_NAME: usize = 255 - FILE_PREFIX.len() - ID_LEN - 1 - 1 - 10;

/// Name of a job's artifact in `queued/`.
///
/// `raw-<id>` for data jobs, `fle-<id>-<original-name>` for file jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueuedName {
    Data(JobId),
    File { id: JobId, original_name: String },
}

impl QueuedName {
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(rest) = name.strip_prefix(DATA_PREFIX) {
            return rest.parse().ok().map(QueuedName::Data);
        }
        let rest = name.strip_prefix(FILE_PREFIX)?;
        let id = rest.get(..ID_LEN)?.parse().ok()?;
        let original_name = rest.get(ID_LEN..)?.strip_prefix('-')?;
        if original_name.is_empty() {
            return None;
        }
        Some(QueuedName::File {
            id,
            original_name: original_name.to_string(),
        })
    }

    pub fn id(&self) -> JobId {
        match self {
            QueuedName::Data(id) => *id,
            QueuedName::File { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            QueuedName::Data(_) => JobKind::Data,
            QueuedName::File { .. } => JobKind::File,
        }
    }

    pub fn original_name(&self) -> Option<&str> {
        match self {
            QueuedName::Data(_) => None,
            QueuedName::File { original_name, .. } => Some(original_name),
        }
    }

    /// Name of the artifact inside a processing slot.
    pub fn working_name(&self) -> &str {
        self.original_name().unwrap_or(DATA_SENTINEL)
    }

    /// Prefix shared by every queued or slot name of job `id`.
    pub(crate) fn id_prefixes(id: JobId) -> (String, String) {
        (
            format!("{DATA_PREFIX}{id}"),
            format!("{FILE_PREFIX}{id}-"),
        )
    }
}

impl std::fmt::Display for QueuedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueuedName::Data(id) => write!(f, "{DATA_PREFIX}{id}"),
            QueuedName::File { id, original_name } => {
                write!(f, "{FILE_PREFIX}{id}-{original_name}")
            }
        }
    }
}

/// Name of a processing slot: `<queued-name>.<owner-pid>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotName {
    pub job: QueuedName,
    pub owner: u32,
}

impl SlotName {
    pub fn new(job: QueuedName, owner: u32) -> Self {
        Self { job, owner }
    }

    /// Parse a slot directory name. Anything without a numeric owner suffix
    /// or a recognizable job name is rejected.
    pub fn parse(name: &str) -> Option<Self> {
        let (job, owner) = name.rsplit_once('.')?;
        if owner.is_empty() || !owner.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            job: QueuedName::parse(job)?,
            owner: owner.parse().ok()?,
        })
    }
}

impl std::fmt::Display for SlotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.job, self.owner)
    }
}
