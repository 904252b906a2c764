//! TFTP server implementation
//!
//! This module provides complete TFTP server functionality:
//! - `server`: Lifecycle facade, counters
//! - `dispatcher`: Accept loop, hands requests to workers
//! - `worker`: Transfer sessions, one task and socket each
//! - `path`: Request filename resolution below the root directory
//! - `events`: Log sink for embedding applications
//! - `config`: Server configuration

mod config;
mod dispatcher;
mod events;
mod path;
mod server;
mod worker;

use anyhow::Result;

// Public server types
pub use config::{Config, DEFAULT_PORT};
pub use events::{EventLog, LogSink};
pub use path::{PathError, resolve};
pub use server::{Lifecycle, Server};
pub use worker::{Direction, SessionError, SessionState, TransferSummary, Worker};

/// Run the TFTP server until Ctrl+C
///
/// Returns the number of files transferred.
pub async fn run(config: Config) -> Result<usize> {
    log::info!("Starting TFTP server on {}", config.socket_addr());
    log::info!("Root directory: {}", config.directory.display());
    log::info!("Read-only mode: {}", config.read_only);
    log::info!("Overwrite existing files: {}", config.overwrite);
    log::debug!(
        "Timeout {:?}, {} retries, {:?} backoff, {:?} partial files",
        config.opt_local.timeout,
        config.opt_local.max_retries,
        config.opt_local.backoff,
        config.partial_files
    );

    let mut server = Server::new(&config)?;

    log::info!("TFTP server listening, press Ctrl+C to stop");
    server.listen().await?;

    Ok(server.files_transferred())
}
