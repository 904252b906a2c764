use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::tftp::core::{Backoff, TransferOptions};

/// TFTP client configuration
///
/// # Example
///
/// ```rust
/// use tinytftp::tftp::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("192.168.1.100".parse().unwrap(), 69)
///     .with_timeout(Duration::from_secs(2));
/// assert_eq!(config.server_addr().port(), 69);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server IP address
    pub server_ip: IpAddr,
    /// Server port number
    pub server_port: u16,
    /// Transfer mode sent with requests (only octet transfers are performed)
    pub mode: String,
    /// Timeout and retransmission policy
    pub options: TransferOptions,
}

impl ClientConfig {
    /// Create new client configuration
    ///
    /// # Arguments
    ///
    /// * `server_ip` - Server IP address
    /// * `server_port` - Server port number (usually 69)
    pub fn new(server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            server_ip,
            server_port,
            mode: "octet".to_string(),
            options: TransferOptions::default(),
        }
    }

    /// Set timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.options.max_retries = max_retries;
        self.options.backoff = backoff;
        self
    }

    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.server_port)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 69)
    }
}
