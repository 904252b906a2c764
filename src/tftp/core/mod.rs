//! TFTP core protocol implementation
//!
//! This module contains the core components of the TFTP protocol:
//! - `packet`: Packet serialization and deserialization
//! - `socket`: Listener and per-transfer socket binding
//! - `options`: Retransmission and partial-file policy

pub mod options;
pub mod packet;
mod socket;

// Public core types
pub use options::{Backoff, PartialFilePolicy, TransferOptions};
pub use packet::{BLOCK_SIZE, ErrorCode, MAX_PACKET_SIZE, Opcode, Packet, PacketError, Request};
pub use socket::{ServerSocket, Socket};
