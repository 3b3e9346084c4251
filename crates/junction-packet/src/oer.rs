//! OER (Octet Encoding Rules) primitives: variable-length octet strings and
//! variable-length unsigned integers with big-endian contents.

use std::convert::TryFrom;
use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;

const HIGH_BIT: u8 = 0x80;
const LENGTH_MASK: u8 = 0x7f;

/// Length of a zero-byte var-octet-string on the wire (just the length
/// prefix).
pub const EMPTY_VARLEN_OCTETS_LEN: usize = 1;

/// Size in bytes of the encoding of a var-octet-string holding `length`
/// content bytes.
pub fn predict_var_octets(length: usize) -> usize {
    if length < 128 {
        1 + length
    } else {
        1 + var_uint_size(length as u64) as usize + length
    }
}

/// Minimum number of big-endian bytes needed to hold `value` without leading
/// zeroes. Zero still takes one byte.
pub fn var_uint_size(value: u64) -> u8 {
    let bits = 64 - (value | 1).leading_zeros();
    ((bits + 7) / 8) as u8
}

/// Read-side extensions over a byte slice. The cursor advances through the
/// slice itself, which lets callers keep sub-slices alive independently.
pub trait OerBufExt<'a> {
    /// Reads a var-octet-string without advancing the cursor.
    fn peek_var_octets(&self) -> Result<&'a [u8]>;
    /// Reads a var-octet-string, advancing past it.
    fn read_var_octets(&mut self) -> Result<&'a [u8]>;
    /// Advances past a var-octet-string without looking at its contents.
    fn skip_var_octets(&mut self) -> Result<()>;
    /// Discards exactly `count` bytes.
    fn skip_bytes(&mut self, count: usize) -> Result<()>;
    /// Reads just the length prefix of a var-octet-string.
    fn read_var_octets_len(&mut self) -> Result<usize>;
    /// Reads a var-uint (length-prefixed big-endian integer).
    fn read_var_uint(&mut self) -> Result<u64>;
}

impl<'a> OerBufExt<'a> for &'a [u8] {
    #[inline]
    fn peek_var_octets(&self) -> Result<&'a [u8]> {
        let mut peek = *self;
        let length = peek.read_var_octets_len()?;
        let offset = self.len() - peek.len();
        if peek.len() < length {
            Err(eof())
        } else {
            Ok(&self[offset..offset + length])
        }
    }

    #[inline]
    fn read_var_octets(&mut self) -> Result<&'a [u8]> {
        let length = self.read_var_octets_len()?;
        if self.len() < length {
            Err(eof())
        } else {
            let (contents, rest) = self.split_at(length);
            *self = rest;
            Ok(contents)
        }
    }

    #[inline]
    fn skip_var_octets(&mut self) -> Result<()> {
        let length = self.read_var_octets_len()?;
        self.skip_bytes(length)
    }

    #[inline]
    fn skip_bytes(&mut self, count: usize) -> Result<()> {
        if self.len() < count {
            Err(eof())
        } else {
            *self = &self[count..];
            Ok(())
        }
    }

    fn read_var_octets_len(&mut self) -> Result<usize> {
        let first = self.read_u8()?;
        if first & HIGH_BIT == 0 {
            return Ok(first as usize);
        }
        let len_of_len = (first & LENGTH_MASK) as usize;
        if len_of_len == 0 {
            return Err(invalid("indefinite lengths are not allowed"));
        }
        if len_of_len > 8 {
            return Err(invalid("length prefix too large"));
        }
        let length = self.read_uint::<BigEndian>(len_of_len)?;
        if len_of_len == 1 && length < 128 {
            return Err(invalid("length prefix with unnecessary multibyte form"));
        }
        usize::try_from(length).map_err(|_| invalid("var octets length overflow"))
    }

    #[inline]
    fn read_var_uint(&mut self) -> Result<u64> {
        let size = self.read_var_octets_len()?;
        if size == 0 {
            Err(invalid("zero-length var uint"))
        } else if size > 8 {
            Err(invalid("var uint too large"))
        } else {
            Ok(self.read_uint::<BigEndian>(size)?)
        }
    }
}

/// Write-side extensions, available on any `BufMut`.
pub trait OerBufMutExt: BufMut + Sized {
    #[inline]
    fn put_var_octets(&mut self, contents: &[u8]) {
        self.put_var_octets_len(contents.len());
        self.put_slice(contents);
    }

    #[inline]
    fn put_var_octets_len(&mut self, length: usize) {
        if length < 128 {
            self.put_u8(length as u8);
        } else {
            let len_of_len = var_uint_size(length as u64);
            self.put_u8(HIGH_BIT | len_of_len);
            self.put_uint(length as u64, len_of_len as usize);
        }
    }

    #[inline]
    fn put_var_uint(&mut self, value: u64) {
        let size = var_uint_size(value);
        self.put_var_octets_len(size as usize);
        self.put_uint(value, size as usize);
    }
}

impl<B: BufMut + Sized> OerBufMutExt for B {}

fn eof() -> Error {
    Error::new(ErrorKind::UnexpectedEof, "buffer too small")
}

fn invalid(message: &'static str) -> Error {
    Error::new(ErrorKind::InvalidData, message)
}
