//! # dirq
//!
//! A durable job queue whose only storage and coordination mechanism is a
//! directory tree. Any number of threads and processes sharing that tree
//! can submit and consume jobs without a central coordinator.
//!
//! Job state is the directory a job's artifact lives in; claims are
//! `mkdir(2)` + `rename(2)`; jobs whose consumer died are recovered by a
//! process-liveness scan at the start of every receive cycle.
//!
//! ```no_run
//! use dirq::{Handler, HandlerResult, JobId, Outcome, Queue, Retention};
//! use std::path::Path;
//!
//! struct Print;
//!
//! impl Handler for Print {
//!     fn handle_data(&self, id: JobId, payload: &[u8]) -> HandlerResult {
//!         println!("{id}: {} bytes", payload.len());
//!         Ok(Outcome::Success)
//!     }
//!
//!     fn handle_file(&self, id: JobId, name: &str, _path: &Path) -> HandlerResult {
//!         println!("{id}: {name}");
//!         Ok(Outcome::Success)
//!     }
//! }
//!
//! # fn main() -> dirq::error::Result<()> {
//! let queue = Queue::open("/var/spool/dirq", Retention::FAILED)?;
//! queue.submit_data(b"Hello World")?;
//! queue.receive(&Print, true)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hook;
pub mod id;
pub mod layout;
pub mod model;
pub mod queue;
pub mod telemetry;

pub use error::{Error, Result};
pub use model::{JobId, JobKind, Outcome, Retention, State};
pub use queue::{Handler, HandlerResult, Queue, QueueCounts, ReceiveReport};
