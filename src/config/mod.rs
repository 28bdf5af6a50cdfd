//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The library itself takes plain arguments; this is for
//! binaries and services embedding a queue.

pub mod hook;

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::model::Retention;

#[derive(Debug, Clone)]
pub struct Config {
    /// Queue base directory (`DIRQ_BASE_DIR`).
    pub base_dir: PathBuf,
    /// Terminal outcomes to keep (`DIRQ_RETENTION`, default `all`).
    pub retention: Retention,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let retention = match std::env::var("DIRQ_RETENTION") {
            Ok(raw) => raw.parse()?,
            Err(_) => Retention::default(),
        };
        Ok(Self {
            base_dir: PathBuf::from(required_var("DIRQ_BASE_DIR")?),
            retention,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}
