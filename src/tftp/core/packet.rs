//! Packet serialization and deserialization
//!
//! Every datagram starts with a big-endian `u16` opcode:
//!
//! ```text
//!  opcode  | layout after the opcode
//!  1 RRQ   | filename NUL [mode NUL]
//!  2 WRQ   | filename NUL [mode NUL]
//!  3 DATA  | block:u16, payload (0..=512 bytes)
//!  4 ACK   | block:u16
//!  5 ERROR | code:u16, message NUL
//! ```

use std::fmt;

use thiserror::Error;

/// Payload size of every non-final DATA block
pub const BLOCK_SIZE: usize = 512;

/// Opcode + block number
pub const HEADER_SIZE: usize = 4;

/// Largest datagram a conforming peer may send
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + BLOCK_SIZE;

/// Reasons a datagram could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("packet too short ({0} bytes)")]
    Truncated(usize),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),
    #[error("expected {expected} packet, got {found}")]
    UnexpectedOpcode { expected: Opcode, found: Opcode },
    #[error("missing NUL terminator")]
    MissingTerminator,
    #[error("string field is not ASCII")]
    NotAscii,
    #[error("DATA payload of {0} bytes exceeds 512")]
    PayloadTooLarge(usize),
}

/// Packet kind, the first two bytes of every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    Rrq = 1,
    Wrq = 2,
    Data = 3,
    Ack = 4,
    Error = 5,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Result<Self, PacketError> {
        Ok(match value {
            1 => Opcode::Rrq,
            2 => Opcode::Wrq,
            3 => Opcode::Data,
            4 => Opcode::Ack,
            5 => Opcode::Error,
            other => return Err(PacketError::UnknownOpcode(other)),
        })
    }

    /// Reads the opcode field of a raw datagram
    pub fn peek(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < 2 {
            return Err(PacketError::Truncated(buf.len()));
        }
        Self::from_u16(u16::from_be_bytes([buf[0], buf[1]]))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Opcode::Rrq => "RRQ",
            Opcode::Wrq => "WRQ",
            Opcode::Data => "DATA",
            Opcode::Ack => "ACK",
            Opcode::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// TFTP error codes (RFC 1350 appendix)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTid,
    FileExists,
    NoSuchUser,
    /// A code outside the range RFC 1350 defines
    Other(u16),
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTid => 5,
            ErrorCode::FileExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::Other(code) => code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTid,
            6 => ErrorCode::FileExists,
            7 => ErrorCode::NoSuchUser,
            other => ErrorCode::Other(other),
        }
    }

    /// Default human-readable message sent alongside the code
    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::NotDefined | ErrorCode::Other(_) => "Not defined.",
            ErrorCode::FileNotFound => "File not found.",
            ErrorCode::AccessViolation => "Access violation.",
            ErrorCode::DiskFull => "Disk full or allocation exceeded.",
            ErrorCode::IllegalOperation => "Illegal TFTP operation.",
            ErrorCode::UnknownTid => "Unknown transfer ID.",
            ErrorCode::FileExists => "File already exists.",
            ErrorCode::NoSuchUser => "No such user.",
        }
    }
}

impl From<&std::io::Error> for ErrorCode {
    fn from(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::NotFound => ErrorCode::FileNotFound,
            ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
            ErrorKind::AlreadyExists => ErrorCode::FileExists,
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => ErrorCode::DiskFull,
            _ => ErrorCode::NotDefined,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A decoded RRQ or WRQ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub filename: String,
    /// Transfer mode as sent by the peer; never interpreted
    pub mode: Option<String>,
}

/// Any of the five TFTP packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Rrq { filename: String, mode: String },
    Wrq { filename: String, mode: String },
    Data { block_num: u16, data: Vec<u8> },
    Ack(u16),
    Error { code: ErrorCode, msg: String },
}

impl Packet {
    /// Encodes the packet into a datagram
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Packet::Rrq { filename, mode } => encode_request(Opcode::Rrq, filename, mode),
            Packet::Wrq { filename, mode } => encode_request(Opcode::Wrq, filename, mode),
            Packet::Data { block_num, data } => encode_data(*block_num, data),
            Packet::Ack(block) => encode_ack(*block),
            Packet::Error { code, msg } => encode_error(*code, msg),
        }
    }

    /// Decodes any packet kind
    pub fn deserialize(buf: &[u8]) -> Result<Self, PacketError> {
        match Opcode::peek(buf)? {
            Opcode::Rrq | Opcode::Wrq => {
                let req = decode_request(buf)?;
                let mode = req.mode.unwrap_or_default();
                Ok(match req.opcode {
                    Opcode::Rrq => Packet::Rrq {
                        filename: req.filename,
                        mode,
                    },
                    _ => Packet::Wrq {
                        filename: req.filename,
                        mode,
                    },
                })
            }
            Opcode::Data => {
                let (block_num, data) = decode_data(buf)?;
                Ok(Packet::Data {
                    block_num,
                    data: data.to_vec(),
                })
            }
            Opcode::Ack => Ok(Packet::Ack(decode_ack(buf)?)),
            Opcode::Error => {
                let (code, msg) = decode_error(buf)?;
                Ok(Packet::Error { code, msg })
            }
        }
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Packet::Rrq { .. } => Opcode::Rrq,
            Packet::Wrq { .. } => Opcode::Wrq,
            Packet::Data { .. } => Opcode::Data,
            Packet::Ack(_) => Opcode::Ack,
            Packet::Error { .. } => Opcode::Error,
        }
    }
}

fn expect_opcode(buf: &[u8], expected: Opcode) -> Result<(), PacketError> {
    let found = Opcode::peek(buf)?;
    if found != expected {
        return Err(PacketError::UnexpectedOpcode { expected, found });
    }
    Ok(())
}

/// Splits a NUL-terminated ASCII string off the front of `buf`
fn take_cstr(buf: &[u8]) -> Result<(String, &[u8]), PacketError> {
    let nul = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::MissingTerminator)?;
    let raw = &buf[..nul];
    if !raw.is_ascii() {
        return Err(PacketError::NotAscii);
    }
    let s = raw.iter().map(|&b| b as char).collect();
    Ok((s, &buf[nul + 1..]))
}

fn push_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend(s.bytes().filter(|&b| b != 0));
    out.push(0);
}

/// Decodes an RRQ/WRQ. Requires a NUL after the filename; the mode field
/// is optional.
pub fn decode_request(buf: &[u8]) -> Result<Request, PacketError> {
    let opcode = Opcode::peek(buf)?;
    if !matches!(opcode, Opcode::Rrq | Opcode::Wrq) {
        return Err(PacketError::UnexpectedOpcode {
            expected: Opcode::Rrq,
            found: opcode,
        });
    }

    let (filename, rest) = take_cstr(&buf[2..])?;
    let mode = match rest {
        [] => None,
        rest => take_cstr(rest).ok().map(|(mode, _)| mode),
    };

    Ok(Request {
        opcode,
        filename,
        mode,
    })
}

pub fn encode_request(opcode: Opcode, filename: &str, mode: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + filename.len() + mode.len() + 2);
    out.extend_from_slice(&(opcode as u16).to_be_bytes());
    push_cstr(&mut out, filename);
    push_cstr(&mut out, mode);
    out
}

/// `[0, 3, block_hi, block_lo, payload...]`
pub fn encode_data(block: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&(Opcode::Data as u16).to_be_bytes());
    out.extend_from_slice(&block.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// `[0, 4, block_hi, block_lo]`
pub fn encode_ack(block: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE);
    out.extend_from_slice(&(Opcode::Ack as u16).to_be_bytes());
    out.extend_from_slice(&block.to_be_bytes());
    out
}

/// `[0, 5, code_hi, code_lo, message..., 0]`
pub fn encode_error(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + message.len() + 1);
    out.extend_from_slice(&(Opcode::Error as u16).to_be_bytes());
    out.extend_from_slice(&code.as_u16().to_be_bytes());
    push_cstr(&mut out, message);
    out
}

/// Number of DATA blocks needed for `len` bytes, counting the short final
/// block. `None` when the transfer would need more than 65535 blocks.
pub fn block_count(len: u64) -> Option<u16> {
    u16::try_from(len / BLOCK_SIZE as u64 + 1).ok()
}

pub fn decode_data(buf: &[u8]) -> Result<(u16, &[u8]), PacketError> {
    if buf.len() < HEADER_SIZE {
        return Err(PacketError::Truncated(buf.len()));
    }
    expect_opcode(buf, Opcode::Data)?;

    let payload = &buf[HEADER_SIZE..];
    if payload.len() > BLOCK_SIZE {
        return Err(PacketError::PayloadTooLarge(payload.len()));
    }
    Ok((u16::from_be_bytes([buf[2], buf[3]]), payload))
}

/// Trailing bytes after the block number are ignored.
pub fn decode_ack(buf: &[u8]) -> Result<u16, PacketError> {
    if buf.len() < HEADER_SIZE {
        return Err(PacketError::Truncated(buf.len()));
    }
    expect_opcode(buf, Opcode::Ack)?;
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

/// A missing terminator on the message is tolerated; peers often omit it.
pub fn decode_error(buf: &[u8]) -> Result<(ErrorCode, String), PacketError> {
    if buf.len() < HEADER_SIZE {
        return Err(PacketError::Truncated(buf.len()));
    }
    expect_opcode(buf, Opcode::Error)?;

    let code = ErrorCode::from_u16(u16::from_be_bytes([buf[2], buf[3]]));
    let raw = &buf[HEADER_SIZE..];
    let raw = match raw.iter().position(|&b| b == 0) {
        Some(nul) => &raw[..nul],
        None => raw,
    };
    Ok((code, String::from_utf8_lossy(raw).into_owned()))
}
