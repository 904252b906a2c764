//! tinytftp: a small TFTP (RFC 1350) server and client
//!
//! See [`tftp`] for the protocol implementation and [`config`] for the
//! configuration file format.

pub mod config;
pub mod tftp;
