//! The queue handle. The public API for submitting, inspecting and
//! consuming jobs.
//!
//! A `Queue` holds no in-memory state besides its layout and retention
//! policy. Any number of handles, in any number of threads and processes,
//! may point at the same base directory; all coordination happens through
//! atomic `mkdir(2)` and `rename(2)` on that tree.

mod claim;
mod dispatch;
mod ingress;
mod recovery;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::model::{JobId, Outcome, QueuedName, Retention, SlotName, State};

pub use dispatch::{BoxError, Handler, HandlerResult};
pub use recovery::process_alive;

/// A handle on one queue directory: submits, inspects and consumes its jobs.
#[derive(Debug, Clone)]
pub struct Queue {
    layout: Layout,
    retention: Retention,
    /// Owner id embedded in processing slot names.
    pid: u32,
}

/// What one receive cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveReport {
    /// Stale processing slots reclaimed before claiming.
    pub recovered: usize,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
}

impl ReceiveReport {
    fn record(&mut self, outcome: Outcome) {
        self.claimed += 1;
        match outcome {
            Outcome::Success => self.succeeded += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Retry => self.retried += 1,
        }
    }
}

/// Number of entries in each state directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub processing: usize,
    pub success: usize,
    pub failed: usize,
    pub interrupted: usize,
}

impl Queue {
    /// Open (and if needed create) the queue rooted at `base`.
    ///
    /// # Errors
    ///
    /// [`Error::NotADirectory`] if `base` exists and is not a directory.
    pub fn open(base: impl AsRef<Path>, retention: Retention) -> Result<Self> {
        Ok(Self {
            layout: Layout::initialize(base.as_ref())?,
            retention,
            pid: std::process::id(),
        })
    }

    pub fn base(&self) -> &Path {
        self.layout.base()
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Recover stalled jobs, then claim and process every job currently
    /// queued. Jobs re-queued by `Retry` during this cycle wait for the next.
    pub fn receive<H: Handler + ?Sized>(
        &self,
        handler: &H,
        randomize: bool,
    ) -> Result<ReceiveReport> {
        self.receive_limit(handler, randomize, 0)
    }

    /// Like [`Queue::receive`], but attempts at most `limit` candidates
    /// (0 = no limit).
    pub fn receive_limit<H: Handler + ?Sized>(
        &self,
        handler: &H,
        randomize: bool,
        limit: usize,
    ) -> Result<ReceiveReport> {
        self.cycle(handler, randomize, limit, None)
    }

    /// Recover stalled jobs, then process at most one job.
    pub fn receive_one<H: Handler + ?Sized>(
        &self,
        handler: &H,
        randomize: bool,
    ) -> Result<ReceiveReport> {
        self.cycle(handler, randomize, 0, Some(1))
    }

    fn cycle<H: Handler + ?Sized>(
        &self,
        handler: &H,
        randomize: bool,
        limit: usize,
        max_claims: Option<usize>,
    ) -> Result<ReceiveReport> {
        let mut report = ReceiveReport {
            recovered: self.recover()?,
            ..ReceiveReport::default()
        };

        for candidate in self.list_candidates(randomize, limit)? {
            if max_claims.is_some_and(|max| report.claimed >= max) {
                break;
            }
            let Some(job) = self.try_claim(&candidate) else {
                continue;
            };
            let outcome = self.process(handler, job);
            report.record(outcome);
        }

        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn is_queued(&self, id: JobId) -> Result<bool> {
        let (data, file) = QueuedName::id_prefixes(id);
        if self.layout.dir(State::Queued).join(&data).exists() {
            return Ok(true);
        }
        self.any_entry(State::Queued, |name| name.starts_with(&file))
    }

    pub fn is_processing(&self, id: JobId) -> Result<bool> {
        let (data, file) = QueuedName::id_prefixes(id);
        let data = format!("{data}.");
        self.any_entry(State::Processing, |name| {
            name.starts_with(&data) || name.starts_with(&file)
        })
    }

    /// # Errors
    ///
    /// [`Error::PolicyUnsupported`] if successful jobs are not retained.
    pub fn is_success(&self, id: JobId) -> Result<bool> {
        self.is_terminal(State::Success, id)
    }

    /// # Errors
    ///
    /// [`Error::PolicyUnsupported`] if failed jobs are not retained.
    pub fn is_failed(&self, id: JobId) -> Result<bool> {
        self.is_terminal(State::Failed, id)
    }

    /// # Errors
    ///
    /// [`Error::PolicyUnsupported`] if interrupted jobs are not retained.
    pub fn is_interrupted(&self, id: JobId) -> Result<bool> {
        self.is_terminal(State::Interrupted, id)
    }

    fn is_terminal(&self, state: State, id: JobId) -> Result<bool> {
        self.check_retained(state)?;
        Ok(self.layout.dir(state).join(id.to_string()).exists())
    }

    fn check_retained(&self, state: State) -> Result<()> {
        if self.retention.keeps(state) {
            Ok(())
        } else {
            Err(Error::PolicyUnsupported(state))
        }
    }

    /// Ids of the jobs currently in `state`, in id order.
    pub fn list(&self, state: State) -> Result<Vec<JobId>> {
        self.check_retained(state)?;
        let mut ids: Vec<JobId> = self
            .entry_names(state)?
            .iter()
            .filter_map(|name| parse_entry(state, name))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of recognizable entries per state directory.
    pub fn counts(&self) -> Result<QueueCounts> {
        let count = |state: State| -> Result<usize> {
            Ok(self
                .entry_names(state)?
                .iter()
                .filter(|name| parse_entry(state, name).is_some())
                .count())
        };
        Ok(QueueCounts {
            queued: count(State::Queued)?,
            processing: count(State::Processing)?,
            success: count(State::Success)?,
            failed: count(State::Failed)?,
            interrupted: count(State::Interrupted)?,
        })
    }

    fn entry_names(&self, state: State) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.layout.dir(state))? {
            // Entries can vanish mid-listing; that is a peer at work.
            let Ok(entry) = entry else { continue };
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    fn any_entry(&self, state: State, pred: impl Fn(&str) -> bool) -> Result<bool> {
        Ok(self.entry_names(state)?.iter().any(|name| pred(name)))
    }
}

fn parse_entry(state: State, name: &str) -> Option<JobId> {
    match state {
        State::Queued => QueuedName::parse(name).map(|q| q.id()),
        State::Processing => SlotName::parse(name).map(|s| s.job.id()),
        State::Success | State::Failed | State::Interrupted => name.parse().ok(),
    }
}
