use std::convert::TryFrom;
use std::fmt;
use std::io::Write;
use std::str;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::oer::{self, OerBufExt, OerBufMutExt};
use crate::{Address, ErrorCode, ParseError};

const AMOUNT_LEN: usize = 8;
const EXPIRY_LEN: usize = 17;
const CONDITION_LEN: usize = 32;
const FULFILLMENT_LEN: usize = 32;
const ERROR_CODE_LEN: usize = 3;

/// Prepare/Fulfill/Reject data fields are capped at 32 KiB.
const MAX_DATA_LEN: usize = 32 * 1024;

// Fixed-length numeric timestamp from RFC 0027 (no dot, no zone designator).
static INTERLEDGER_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
pub enum PacketType {
    Prepare = 12,
    Fulfill = 13,
    Reject = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = ParseError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            12 => Ok(PacketType::Prepare),
            13 => Ok(PacketType::Fulfill),
            14 => Ok(PacketType::Reject),
            other => Err(ParseError::UnknownPacketType(other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Prepare(Prepare),
    Fulfill(Fulfill),
    Reject(Reject),
}

impl TryFrom<BytesMut> for Packet {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let first = *buffer.first().ok_or(ParseError::UnknownPacketType(0))?;
        match PacketType::try_from(first)? {
            PacketType::Prepare => Prepare::try_from(buffer).map(Packet::Prepare),
            PacketType::Fulfill => Fulfill::try_from(buffer).map(Packet::Fulfill),
            PacketType::Reject => Reject::try_from(buffer).map(Packet::Reject),
        }
    }
}

impl From<&Packet> for BytesMut {
    fn from(packet: &Packet) -> Self {
        match packet {
            Packet::Prepare(prepare) => BytesMut::from(prepare),
            Packet::Fulfill(fulfill) => BytesMut::from(fulfill),
            Packet::Reject(reject) => BytesMut::from(reject),
        }
    }
}

impl From<Packet> for BytesMut {
    fn from(packet: Packet) -> Self {
        BytesMut::from(&packet)
    }
}

impl From<Prepare> for Packet {
    fn from(prepare: Prepare) -> Self {
        Packet::Prepare(prepare)
    }
}

impl From<Fulfill> for Packet {
    fn from(fulfill: Fulfill) -> Self {
        Packet::Fulfill(fulfill)
    }
}

impl From<Reject> for Packet {
    fn from(reject: Reject) -> Self {
        Packet::Reject(reject)
    }
}

/// An ILP Prepare packet. The connector rewrites `amount` and `expires_at`
/// on every hop, so the fields are owned and the packet is re-serialized at
/// the egress link.
#[derive(Clone, PartialEq)]
pub struct Prepare {
    destination: Address,
    amount: u64,
    expires_at: SystemTime,
    execution_condition: [u8; 32],
    data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PrepareBuilder<'a> {
    pub amount: u64,
    pub expires_at: SystemTime,
    pub execution_condition: &'a [u8; 32],
    pub destination: Address,
    pub data: &'a [u8],
}

impl<'a> PrepareBuilder<'a> {
    pub fn build(&self) -> Prepare {
        Prepare {
            destination: self.destination.clone(),
            amount: self.amount,
            // The wire format carries millisecond precision only.
            expires_at: round_to_millis(self.expires_at),
            execution_condition: *self.execution_condition,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

impl TryFrom<BytesMut> for Prepare {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let mut reader = deserialize_envelope(PacketType::Prepare, buffer.as_ref())?;

        if reader.remaining() < AMOUNT_LEN + EXPIRY_LEN + CONDITION_LEN {
            return Err(ParseError::Oer(unexpected_eof()));
        }
        let amount = reader.get_u64();

        let mut expiry_digits = [0u8; EXPIRY_LEN];
        reader.copy_to_slice(&mut expiry_digits);
        let expires_at = parse_timestamp(&expiry_digits)?;

        let mut execution_condition = [0u8; CONDITION_LEN];
        reader.copy_to_slice(&mut execution_condition);

        let destination = Address::try_from(reader.read_var_octets()?)?;
        let data = read_data(&mut reader)?;
        ensure_consumed(reader)?;

        Ok(Prepare {
            destination,
            amount,
            expires_at,
            execution_condition,
            data,
        })
    }
}

impl Prepare {
    #[inline]
    pub fn amount(&self) -> u64 {
        self.amount
    }

    #[inline]
    pub fn set_amount(&mut self, amount: u64) {
        self.amount = amount;
    }

    #[inline]
    pub fn expires_at(&self) -> SystemTime {
        self.expires_at
    }

    #[inline]
    pub fn set_expires_at(&mut self, expires_at: SystemTime) {
        self.expires_at = round_to_millis(expires_at);
    }

    /// The returned slice always has a length of 32.
    #[inline]
    pub fn execution_condition(&self) -> &[u8] {
        &self.execution_condition[..]
    }

    #[inline]
    pub fn destination(&self) -> Address {
        self.destination.clone()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<&Prepare> for BytesMut {
    fn from(prepare: &Prepare) -> Self {
        let destination_len = oer::predict_var_octets(prepare.destination.len());
        let data_len = oer::predict_var_octets(prepare.data.len());
        let content_len =
            AMOUNT_LEN + EXPIRY_LEN + CONDITION_LEN + destination_len + data_len;

        let mut buffer = BytesMut::with_capacity(1 + oer::predict_var_octets(content_len));
        buffer.put_u8(PacketType::Prepare as u8);
        buffer.put_var_octets_len(content_len);
        buffer.put_u64(prepare.amount);
        put_timestamp(&mut buffer, prepare.expires_at);
        buffer.put_slice(&prepare.execution_condition[..]);
        buffer.put_var_octets(prepare.destination.as_ref());
        buffer.put_var_octets(prepare.data.as_ref());
        buffer
    }
}

impl From<Prepare> for BytesMut {
    fn from(prepare: Prepare) -> Self {
        BytesMut::from(&prepare)
    }
}

impl fmt::Debug for Prepare {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Prepare")
            .field("destination", &self.destination)
            .field("amount", &self.amount)
            .field(
                "expires_at",
                &DateTime::<Utc>::from(self.expires_at).to_rfc3339(),
            )
            .field(
                "execution_condition",
                &hex::encode(self.execution_condition),
            )
            .field("data_length", &self.data.len())
            .finish()
    }
}

/// An ILP Fulfill packet: the 32-byte preimage plus end-to-end data.
#[derive(Clone, PartialEq)]
pub struct Fulfill {
    fulfillment: [u8; 32],
    data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FulfillBuilder<'a> {
    pub fulfillment: &'a [u8; 32],
    pub data: &'a [u8],
}

impl<'a> FulfillBuilder<'a> {
    pub fn build(&self) -> Fulfill {
        Fulfill {
            fulfillment: *self.fulfillment,
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

impl TryFrom<BytesMut> for Fulfill {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let mut reader = deserialize_envelope(PacketType::Fulfill, buffer.as_ref())?;

        if reader.remaining() < FULFILLMENT_LEN {
            return Err(ParseError::Oer(unexpected_eof()));
        }
        let mut fulfillment = [0u8; FULFILLMENT_LEN];
        reader.copy_to_slice(&mut fulfillment);

        let data = read_data(&mut reader)?;
        ensure_consumed(reader)?;

        Ok(Fulfill { fulfillment, data })
    }
}

impl Fulfill {
    /// The returned slice always has a length of 32.
    #[inline]
    pub fn fulfillment(&self) -> &[u8] {
        &self.fulfillment[..]
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<&Fulfill> for BytesMut {
    fn from(fulfill: &Fulfill) -> Self {
        let data_len = oer::predict_var_octets(fulfill.data.len());
        let content_len = FULFILLMENT_LEN + data_len;
        let mut buffer = BytesMut::with_capacity(1 + oer::predict_var_octets(content_len));
        buffer.put_u8(PacketType::Fulfill as u8);
        buffer.put_var_octets_len(content_len);
        buffer.put_slice(&fulfill.fulfillment[..]);
        buffer.put_var_octets(fulfill.data.as_ref());
        buffer
    }
}

impl From<Fulfill> for BytesMut {
    fn from(fulfill: Fulfill) -> Self {
        BytesMut::from(&fulfill)
    }
}

impl fmt::Debug for Fulfill {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Fulfill")
            .field("fulfillment", &hex::encode(self.fulfillment))
            .field("data_length", &self.data.len())
            .finish()
    }
}

/// An ILP Reject packet.
#[derive(Clone, PartialEq)]
pub struct Reject {
    code: ErrorCode,
    triggered_by: Option<Address>,
    message: Bytes,
    data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectBuilder<'a> {
    pub code: ErrorCode,
    pub message: &'a [u8],
    pub triggered_by: Option<&'a Address>,
    pub data: &'a [u8],
}

impl<'a> RejectBuilder<'a> {
    pub fn build(&self) -> Reject {
        Reject {
            code: self.code,
            triggered_by: self.triggered_by.cloned(),
            message: Bytes::copy_from_slice(self.message),
            data: Bytes::copy_from_slice(self.data),
        }
    }
}

impl TryFrom<BytesMut> for Reject {
    type Error = ParseError;

    fn try_from(buffer: BytesMut) -> Result<Self, Self::Error> {
        let mut reader = deserialize_envelope(PacketType::Reject, buffer.as_ref())?;

        if reader.remaining() < ERROR_CODE_LEN {
            return Err(ParseError::Oer(unexpected_eof()));
        }
        let mut code = [0u8; ERROR_CODE_LEN];
        reader.copy_to_slice(&mut code);
        let code = ErrorCode::new(code).ok_or(ParseError::InvalidErrorCode)?;

        let triggered_by = reader.read_var_octets()?;
        let triggered_by = if triggered_by.is_empty() {
            None
        } else {
            Some(Address::try_from(triggered_by)?)
        };

        let message = Bytes::copy_from_slice(reader.read_var_octets()?);
        let data = read_data(&mut reader)?;
        ensure_consumed(reader)?;

        Ok(Reject {
            code,
            triggered_by,
            message,
            data,
        })
    }
}

impl Reject {
    #[inline]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[inline]
    pub fn triggered_by(&self) -> Option<&Address> {
        self.triggered_by.as_ref()
    }

    /// Fills in the originating address on relayed rejects that lack one.
    #[inline]
    pub fn set_triggered_by(&mut self, address: Address) {
        self.triggered_by = Some(address);
    }

    #[inline]
    pub fn message(&self) -> &[u8] {
        self.message.as_ref()
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl From<&Reject> for BytesMut {
    fn from(reject: &Reject) -> Self {
        let triggered_by: &[u8] = reject
            .triggered_by
            .as_ref()
            .map(|address| address.as_ref())
            .unwrap_or(&[]);
        let content_len = ERROR_CODE_LEN
            + oer::predict_var_octets(triggered_by.len())
            + oer::predict_var_octets(reject.message.len())
            + oer::predict_var_octets(reject.data.len());

        let mut buffer = BytesMut::with_capacity(1 + oer::predict_var_octets(content_len));
        buffer.put_u8(PacketType::Reject as u8);
        buffer.put_var_octets_len(content_len);
        buffer.put_slice(&<[u8; 3]>::from(reject.code)[..]);
        buffer.put_var_octets(triggered_by);
        buffer.put_var_octets(reject.message.as_ref());
        buffer.put_var_octets(reject.data.as_ref());
        buffer
    }
}

impl From<Reject> for BytesMut {
    fn from(reject: Reject) -> Self {
        BytesMut::from(&reject)
    }
}

impl fmt::Debug for Reject {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Reject")
            .field("code", &self.code)
            .field("triggered_by", &self.triggered_by)
            .field("message", &String::from_utf8_lossy(&self.message))
            .field("data_length", &self.data.len())
            .finish()
    }
}

/// Strips the outermost envelope (type byte plus var-length content) and
/// returns the content slice. Trailing bytes after the envelope are an error.
fn deserialize_envelope(
    packet_type: PacketType,
    mut reader: &[u8],
) -> Result<&[u8], ParseError> {
    if reader.is_empty() {
        return Err(ParseError::Oer(unexpected_eof()));
    }
    let got_type = reader.get_u8();
    if got_type != packet_type as u8 {
        return Err(ParseError::UnexpectedPacketType {
            actual: got_type,
            expected: packet_type as u8,
        });
    }
    let content = reader.read_var_octets()?;
    if reader.is_empty() {
        Ok(content)
    } else {
        Err(ParseError::TrailingBytes)
    }
}

fn read_data(reader: &mut &[u8]) -> Result<Bytes, ParseError> {
    let data = reader.read_var_octets()?;
    if data.len() > MAX_DATA_LEN {
        return Err(ParseError::DataTooLarge);
    }
    Ok(Bytes::copy_from_slice(data))
}

fn ensure_consumed(reader: &[u8]) -> Result<(), ParseError> {
    if reader.is_empty() {
        Ok(())
    } else {
        Err(ParseError::TrailingBytes)
    }
}

fn parse_timestamp(digits: &[u8; EXPIRY_LEN]) -> Result<SystemTime, ParseError> {
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::NonNumericTimestamp);
    }
    let as_str = str::from_utf8(&digits[..]).expect("digits are always utf8");
    let parsed = NaiveDateTime::parse_from_str(as_str, INTERLEDGER_TIMESTAMP_FORMAT)?;
    Ok(SystemTime::from(DateTime::<Utc>::from_utc(parsed, Utc)))
}

fn put_timestamp(buffer: &mut BytesMut, timestamp: SystemTime) {
    let mut writer = buffer.writer();
    write!(
        writer,
        "{}",
        DateTime::<Utc>::from(timestamp).format(INTERLEDGER_TIMESTAMP_FORMAT),
    )
    .expect("writing to BytesMut cannot fail");
}

fn round_to_millis(timestamp: SystemTime) -> SystemTime {
    let since_epoch = timestamp
        .duration_since(UNIX_EPOCH)
        .expect("expiry timestamps predate the epoch");
    UNIX_EPOCH + Duration::from_millis(since_epoch.as_millis() as u64)
}

fn unexpected_eof() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "buffer too small")
}

/// Payload of an F08 reject: what was received and the most the account
/// will take, both u64 big-endian.
#[derive(Clone, Debug, PartialEq)]
pub struct MaxPacketAmountDetails {
    amount_received: u64,
    max_amount: u64,
}

impl MaxPacketAmountDetails {
    #[inline]
    pub fn new(amount_received: u64, max_amount: u64) -> Self {
        MaxPacketAmountDetails {
            amount_received,
            max_amount,
        }
    }

    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, std::io::Error> {
        if bytes.remaining() < 16 {
            return Err(unexpected_eof());
        }
        let amount_received = bytes.get_u64();
        let max_amount = bytes.get_u64();
        Ok(MaxPacketAmountDetails::new(amount_received, max_amount))
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.amount_received.to_be_bytes());
        bytes[8..].copy_from_slice(&self.max_amount.to_be_bytes());
        bytes
    }

    #[inline]
    pub fn amount_received(&self) -> u64 {
        self.amount_received
    }

    #[inline]
    pub fn max_amount(&self) -> u64 {
        self.max_amount
    }
}
