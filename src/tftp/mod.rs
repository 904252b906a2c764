//! TFTP (Trivial File Transfer Protocol) implementation
//!
//! This module implements the TFTP protocol as described in
//! [RFC 1350](https://www.rfc-editor.org/rfc/rfc1350) (TFTP Protocol version 2),
//! with 512-byte blocks and lock-step acknowledgement. Option extensions
//! (block size, window size) are not supported.
//!
//! ## Module Structure
//!
//! ```text
//! tftp/
//! ├── core/           # Core protocol implementation
//! │   ├── packet      # Packet serialization/deserialization
//! │   ├── socket      # Listener and per-transfer sockets
//! │   └── options     # Retransmission policy
//! │
//! ├── server/         # TFTP server
//! │   ├── server      # Lifecycle facade
//! │   ├── dispatcher  # Request accept loop
//! │   ├── worker      # Transfer sessions
//! │   ├── path        # Filename resolution
//! │   ├── events      # Log sink
//! │   └── config      # Server configuration
//! │
//! └── client/         # TFTP client
//! ```
//!
//! ## Usage Examples
//!
//! ### Start TFTP Server
//!
//! ```rust,no_run
//! use tinytftp::tftp::server::{Config, Server};
//! use std::path::PathBuf;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::with_defaults().merge_cli(
//!     Some("0.0.0.0".parse()?),
//!     Some(69),
//!     Some(PathBuf::from("/var/tftp")),
//!     false,
//!     false,
//! );
//!
//! let mut server = Server::new(&config)?;
//! server.listen().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod core;
pub mod server;
