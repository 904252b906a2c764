use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::TftpConfig;
use crate::tftp::core::{PartialFilePolicy, TransferOptions};

/// Well-known TFTP port
pub const DEFAULT_PORT: u16 = 69;

/// TFTP server configuration
///
/// # Example
///
/// ```rust
/// use tinytftp::tftp::server::Config;
/// use std::path::PathBuf;
///
/// let config = Config::new(
///     "127.0.0.1".parse().unwrap(),
///     6969,
///     PathBuf::from("/tmp/tftp"),
///     false,
/// );
/// assert_eq!(config.socket_addr().port(), 6969);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// IP address to listen on
    pub ip_address: IpAddr,
    /// Port number to listen on
    pub port: u16,
    /// Root directory; every request is resolved below it
    pub directory: PathBuf,
    /// Whether to use read-only mode (reject all write requests)
    pub read_only: bool,
    /// Whether to overwrite existing files
    pub overwrite: bool,
    /// What to do with the partial file of a failed upload
    pub partial_files: PartialFilePolicy,
    /// Internal options (retries, timeouts, etc.)
    pub opt_local: TransferOptions,
}

impl Config {
    /// Create a new configuration
    ///
    /// # Arguments
    ///
    /// * `ip_address` - IP address to listen on
    /// * `port` - Port number to listen on
    /// * `directory` - Root directory for files
    /// * `read_only` - Whether to use read-only mode
    pub fn new(ip_address: IpAddr, port: u16, directory: PathBuf, read_only: bool) -> Self {
        Self {
            ip_address,
            port,
            directory,
            read_only,
            overwrite: true, // Allow overwrite by default
            partial_files: PartialFilePolicy::default(),
            opt_local: TransferOptions::default(),
        }
    }

    /// Defaults: all interfaces, port 69, current directory
    pub fn with_defaults() -> Self {
        Self::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            DEFAULT_PORT,
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            false,
        )
    }

    /// Overlays the values present in a `[tftp]` config file section
    pub fn merge_file(mut self, file: &TftpConfig) -> Result<Self> {
        if let Some(ip) = &file.ip {
            self.ip_address = ip
                .parse()
                .with_context(|| format!("Invalid IP address '{}' in config file", ip))?;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(directory) = &file.directory {
            self.directory = directory.clone();
        }
        if let Some(read_only) = file.read_only {
            self.read_only = read_only;
        }
        if let Some(overwrite) = file.overwrite {
            self.overwrite = overwrite;
        }
        if let Some(timeout) = file.timeout {
            self.opt_local.timeout = timeout;
        }
        if let Some(max_retries) = file.max_retries {
            self.opt_local.max_retries = max_retries;
        }
        if let Some(backoff) = file.backoff {
            self.opt_local.backoff = backoff;
        }
        if let Some(policy) = file.partial_files {
            self.partial_files = policy;
        }
        Ok(self)
    }

    /// Overlays command-line values; `None` keeps the current setting.
    pub fn merge_cli(
        mut self,
        ip_address: Option<IpAddr>,
        port: Option<u16>,
        directory: Option<PathBuf>,
        read_only: bool,
        no_overwrite: bool,
    ) -> Self {
        if let Some(ip) = ip_address {
            self.ip_address = ip;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(directory) = directory {
            self.directory = directory;
        }
        self.read_only |= read_only;
        if no_overwrite {
            self.overwrite = false;
        }
        self
    }

    pub fn with_options(mut self, opt_local: TransferOptions) -> Self {
        self.opt_local = opt_local;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_partial_files(mut self, policy: PartialFilePolicy) -> Self {
        self.partial_files = policy;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }

    /// Canonicalises the root directory and checks that it is usable.
    pub fn validate(mut self) -> Result<Self> {
        let absolute = self.directory.canonicalize().with_context(|| {
            format!("Root directory does not exist: {}", self.directory.display())
        })?;

        if !absolute.is_dir() {
            anyhow::bail!("Root directory is not a directory: {}", absolute.display());
        }

        self.directory = absolute;
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}
