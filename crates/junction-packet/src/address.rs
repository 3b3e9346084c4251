//! ILP addresses: 7-bit ASCII, dot-separated, at most 1023 bytes.
//!
//! Reference: ILP Addresses - v2.0.0 (interledger RFC 0015).

use std::convert::TryFrom;
use std::fmt;
use std::str::{self, FromStr};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

const MAX_ADDRESS_LEN: usize = 1023;

#[derive(Error, Debug, PartialEq)]
pub enum AddressError {
    #[error("address is too long")]
    TooLong,
    #[error("invalid address format")]
    InvalidFormat,
}

/// A validated ILP address backed by `Bytes`, cheap to clone.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Address(Bytes);

impl Address {
    /// Builds an address from a static string, panicking if invalid. Intended
    /// for constants and tests.
    pub fn new(address: &'static str) -> Self {
        Address::try_from(Bytes::from_static(address.as_bytes())).expect("invalid ILP address")
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        // Addresses are never empty, but keep the conventional pair.
        self.0.is_empty()
    }

    /// The first dot-separated segment (`g`, `test`, `peer`, ...).
    pub fn scheme(&self) -> &str {
        let bytes = self.0.split(|&b| b == b'.').next().unwrap();
        str::from_utf8(bytes).expect("addresses are always ascii")
    }

    /// Iterates over the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(|&b| b == b'.')
            .map(|segment| str::from_utf8(segment).expect("addresses are always ascii"))
    }

    /// Appends `.suffix`, revalidating the result.
    pub fn with_suffix(&self, suffix: &str) -> Result<Address, AddressError> {
        let mut joined = BytesMut::with_capacity(self.len() + 1 + suffix.len());
        joined.put_slice(self.0.as_ref());
        joined.put_u8(b'.');
        joined.put_slice(suffix.as_bytes());
        Address::try_from(joined.freeze())
    }

    pub fn as_str(&self) -> &str {
        str::from_utf8(self.0.as_ref()).expect("addresses are always ascii")
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl TryFrom<Bytes> for Address {
    type Error = AddressError;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        if bytes.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::TooLong);
        }
        let mut segments = 0usize;
        let valid = bytes.split(|&b| b == b'.').enumerate().all(|(i, segment)| {
            segments += 1;
            let scheme_ok = i != 0 || is_scheme(segment);
            scheme_ok && !segment.is_empty() && segment.iter().all(|&b| is_segment_byte(b))
        });
        if valid && segments > 1 {
            Ok(Address(bytes))
        } else {
            Err(AddressError::InvalidFormat)
        }
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = AddressError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Address::try_from(Bytes::copy_from_slice(bytes))
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(src: &str) -> Result<Self, Self::Err> {
        Address::try_from(Bytes::copy_from_slice(src.as_bytes()))
    }
}

impl AsRef<[u8]> for Address {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.debug_tuple("Address").field(&self.as_str()).finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// ```text
/// scheme = "g" / "private" / "example" / "peer" / "self" /
///          "test" / "test1" / "test2" / "test3" / "local"
/// ```
fn is_scheme(segment: &[u8]) -> bool {
    const SCHEMES: &[&[u8]] = &[
        b"g", b"private", b"example", b"peer", b"self", b"test", b"test1", b"test2", b"test3",
        b"local",
    ];
    SCHEMES.contains(&segment)
}

fn is_segment_byte(byte: u8) -> bool {
    byte == b'_'
        || byte == b'-'
        || byte == b'~'
        || byte.is_ascii_alphanumeric()
}
