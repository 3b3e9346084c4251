//! # junction-packet
//!
//! Octet-exact codecs for the Interledger packet types (Prepare, Fulfill,
//! Reject) plus the OER primitives they are built out of.
//!
//! All three packet types round-trip byte-for-byte through
//! `BytesMut::from(&packet)` / `TryFrom<BytesMut>`.

mod address;
mod error;
mod errors;
pub mod oer;
mod packet;

#[cfg(test)]
mod fixtures;

pub use self::address::{Address, AddressError};
pub use self::error::{ErrorClass, ErrorCode};
pub use self::errors::ParseError;
pub use self::packet::{
    Fulfill, FulfillBuilder, MaxPacketAmountDetails, Packet, PacketType, Prepare, PrepareBuilder,
    Reject, RejectBuilder,
};
