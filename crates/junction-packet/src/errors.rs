use thiserror::Error;

use crate::AddressError;

/// Errors produced while parsing ILP packets off the wire.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),
    #[error("Unexpected packet type: {actual}, expected: {expected}")]
    UnexpectedPacketType { actual: u8, expected: u8 },
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("DateTime must be numeric")]
    NonNumericTimestamp,
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),
    #[error("ErrorCode was not IA5String")]
    InvalidErrorCode,
    #[error("Unexpected trailing bytes")]
    TrailingBytes,
    #[error("Data exceeds maximum length")]
    DataTooLarge,
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),
    #[error("{0}")]
    Oer(#[from] std::io::Error),
}
