//! A [`Handler`] that runs an external command for each job.
//!
//! The command learns about the job through environment variables
//! (`DIRQ_JOB_ID`, `DIRQ_JOB_KIND`, plus `DIRQ_JOB_NAME` and `DIRQ_JOB_PATH`
//! for file jobs). Data payloads arrive on stdin. Exit status 0 is success,
//! the configured retry code re-queues the job, anything else is a failure.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use tracing::debug;

use crate::config::hook::HookConfig;
use crate::model::{JobId, JobKind, Outcome};
use crate::queue::{Handler, HandlerResult};

/// Runs the configured command once per claimed job.
pub struct HookHandler {
    command: PathBuf,
    args: Vec<String>,
    retry_exit_code: i32,
}

impl HookHandler {
    pub fn new(config: HookConfig) -> std::io::Result<Self> {
        // Resolve now so a later chdir cannot change which program runs.
        let command = if config.command.is_relative() && config.command.components().count() > 1 {
            std::env::current_dir()?.join(&config.command)
        } else {
            config.command
        };
        Ok(Self {
            command,
            args: config.args,
            retry_exit_code: config.retry_exit_code,
        })
    }

    fn base_command(&self, id: JobId, kind: JobKind) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .env("DIRQ_JOB_ID", id.to_string())
            .env("DIRQ_JOB_KIND", kind.to_string());
        cmd
    }

    fn outcome(&self, id: JobId, status: ExitStatus) -> HandlerResult {
        debug!(job.id = %id, command = %self.command.display(), %status, "hook exited");
        match status.code() {
            Some(0) => Ok(Outcome::Success),
            Some(code) if code == self.retry_exit_code => Ok(Outcome::Retry),
            _ => Err(format!("hook exited with {status}").into()),
        }
    }
}

impl Handler for HookHandler {
    fn handle_data(&self, id: JobId, payload: &[u8]) -> HandlerResult {
        let mut child = self
            .base_command(id, JobKind::Data)
            .stdin(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // The hook may exit without reading its input.
            match stdin.write_all(payload) {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e.into());
                }
                _ => {}
            }
        }

        let status = child.wait()?;
        self.outcome(id, status)
    }

    fn handle_file(&self, id: JobId, original_name: &str, path: &Path) -> HandlerResult {
        let status = self
            .base_command(id, JobKind::File)
            .env("DIRQ_JOB_NAME", original_name)
            .env("DIRQ_JOB_PATH", path)
            .stdin(Stdio::null())
            .status()?;
        self.outcome(id, status)
    }
}
