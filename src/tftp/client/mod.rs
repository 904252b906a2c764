//! TFTP client
//!
//! Mainly used by the command line `get`/`put` subcommands and by tests.

mod client;
mod config;

pub use client::Client;
pub use config::ClientConfig;
