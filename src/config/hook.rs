//! Hook configuration: the external command that processes jobs.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Exit status meaning "try again later" (`EX_TEMPFAIL` from sysexits.h).
pub const DEFAULT_RETRY_EXIT_CODE: i32 = 75;

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct HookFile {
    hook: HookConfig,
}

/// How to run the per-job command.
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    /// Executable to run. Relative paths resolve against the process CWD.
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Exit code that maps to a retry instead of a failure.
    #[serde(default = "default_retry_exit_code")]
    pub retry_exit_code: i32,
}

fn default_retry_exit_code() -> i32 {
    DEFAULT_RETRY_EXIT_CODE
}

impl HookConfig {
    /// Load a `[hook]` table from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read hook config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("bad hook config {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str::<HookFile>(content).map(|file| file.hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_hook_uses_default_retry_code() {
        let hook = HookConfig::from_toml("[hook]\ncommand = \"./handle.sh\"\n").unwrap();
        assert_eq!(hook.command, PathBuf::from("./handle.sh"));
        assert!(hook.args.is_empty());
        assert_eq!(hook.retry_exit_code, DEFAULT_RETRY_EXIT_CODE);
    }

    #[test]
    fn missing_command_is_rejected() {
        assert!(HookConfig::from_toml("[hook]\nargs = [\"-v\"]\n").is_err());
    }
}
