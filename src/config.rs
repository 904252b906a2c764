//! Configuration file support
//!
//! Settings live in a TOML file, `tinytftp.toml` in the working directory
//! unless `--config` points elsewhere:
//!
//! ```toml
//! [tftp]
//! ip = "0.0.0.0"
//! port = 6969
//! directory = "/srv/tftp"
//! read_only = false
//! overwrite = true
//! timeout = "2s"
//! max_retries = 5
//! backoff = "exponential"
//! partial_files = "delete"
//! ```
//!
//! Every field is optional; command-line flags take precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::tftp::core::{Backoff, PartialFilePolicy};

/// Default configuration file name
pub const CONFIG_FILE: &str = "tinytftp.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tftp: Option<TftpConfig>,
}

/// `[tftp]` section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TftpConfig {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
    pub read_only: Option<bool>,
    pub overwrite: Option<bool>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub backoff: Option<Backoff>,
    pub partial_files: Option<PartialFilePolicy>,
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In {}", path.display()))
    }

    /// Loads `path` if given, otherwise `tinytftp.toml` when it exists.
    pub fn discover(path: Option<&Path>) -> Result<Option<Self>> {
        match path {
            Some(path) => Self::load(path).map(Some),
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.is_file() {
                    log::debug!("Using config file {}", default.display());
                    Self::load(default).map(Some)
                } else {
                    Ok(None)
                }
            }
        }
    }
}
