use std::convert::TryFrom;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use junction_packet::oer::{OerBufExt, OerBufMutExt};

/// Sub-protocol name carrying serialized ILP packets.
pub const ILP_PROTOCOL_NAME: &str = "ilp";

static GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.3fZ";

#[derive(Error, Debug)]
pub enum FrameParseError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("invalid frame: {0}")]
    Invalid(String),
    #[error("{0}")]
    Oer(#[from] std::io::Error),
    #[error("sub-protocol name was not utf8")]
    NameNotUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[repr(u8)]
enum FrameType {
    Response = 1,
    Error = 2,
    Message = 6,
    Transfer = 7,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameParseError;

    fn try_from(byte: u8) -> Result<Self, FrameParseError> {
        match byte {
            1 => Ok(FrameType::Response),
            2 => Ok(FrameType::Error),
            6 => Ok(FrameType::Message),
            7 => Ok(FrameType::Transfer),
            other => Err(FrameParseError::UnknownFrameType(other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContentType {
    ApplicationOctetStream,
    TextPlainUtf8,
    ApplicationJson,
    Other(u8),
}

impl From<u8> for ContentType {
    fn from(byte: u8) -> Self {
        match byte {
            0 => ContentType::ApplicationOctetStream,
            1 => ContentType::TextPlainUtf8,
            2 => ContentType::ApplicationJson,
            other => ContentType::Other(other),
        }
    }
}

impl From<ContentType> for u8 {
    fn from(content_type: ContentType) -> Self {
        match content_type {
            ContentType::ApplicationOctetStream => 0,
            ContentType::TextPlainUtf8 => 1,
            ContentType::ApplicationJson => 2,
            ContentType::Other(other) => other,
        }
    }
}

/// One named sub-protocol entry within a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolData {
    pub protocol_name: String,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

impl ProtocolData {
    /// Convenience constructor for the common `ilp` entry.
    pub fn ilp(packet_bytes: Vec<u8>) -> Self {
        ProtocolData {
            protocol_name: ILP_PROTOCOL_NAME.to_string(),
            content_type: ContentType::ApplicationOctetStream,
            data: packet_bytes,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageFrame {
    pub request_id: u32,
    pub protocol_data: Vec<ProtocolData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResponseFrame {
    pub request_id: u32,
    pub protocol_data: Vec<ProtocolData>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ErrorFrame {
    pub request_id: u32,
    pub code: String,
    pub name: String,
    pub triggered_at: DateTime<Utc>,
    pub data: String,
    pub protocol_data: Vec<ProtocolData>,
}

/// Money moving over the link, orthogonal to the data path.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferFrame {
    pub request_id: u32,
    pub amount: u64,
    pub protocol_data: Vec<ProtocolData>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Message(MessageFrame),
    Response(ResponseFrame),
    Error(ErrorFrame),
    Transfer(TransferFrame),
}

impl Frame {
    pub fn request_id(&self) -> u32 {
        match self {
            Frame::Message(frame) => frame.request_id,
            Frame::Response(frame) => frame.request_id,
            Frame::Error(frame) => frame.request_id,
            Frame::Transfer(frame) => frame.request_id,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Frame, FrameParseError> {
        let mut reader = bytes;
        let frame_type = FrameType::try_from(reader.read_u8().map_err(|_| FrameParseError::Empty)?)?;
        let request_id = reader.read_u32::<BigEndian>()?;
        let mut contents = reader.read_var_octets()?;

        match frame_type {
            FrameType::Message => Ok(Frame::Message(MessageFrame {
                request_id,
                protocol_data: read_protocol_data(&mut contents)?,
            })),
            FrameType::Response => Ok(Frame::Response(ResponseFrame {
                request_id,
                protocol_data: read_protocol_data(&mut contents)?,
            })),
            FrameType::Error => {
                if contents.len() < 3 {
                    return Err(FrameParseError::Invalid("error frame too short".to_string()));
                }
                let mut code = [0u8; 3];
                code.copy_from_slice(&contents[..3]);
                contents.skip_bytes(3)?;
                let name = String::from_utf8(contents.read_var_octets()?.to_vec())?;
                let triggered_at = String::from_utf8(contents.read_var_octets()?.to_vec())?;
                let triggered_at = NaiveDateTime::parse_from_str(
                    &triggered_at,
                    GENERALIZED_TIME_FORMAT,
                )?;
                let data = String::from_utf8(contents.read_var_octets()?.to_vec())?;
                Ok(Frame::Error(ErrorFrame {
                    request_id,
                    code: String::from_utf8(code.to_vec())?,
                    name,
                    triggered_at: DateTime::from_utc(triggered_at, Utc),
                    data,
                    protocol_data: read_protocol_data(&mut contents)?,
                }))
            }
            FrameType::Transfer => {
                let amount = contents.read_var_uint()?;
                Ok(Frame::Transfer(TransferFrame {
                    request_id,
                    amount,
                    protocol_data: read_protocol_data(&mut contents)?,
                }))
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut contents = Vec::new();
        let (frame_type, request_id) = match self {
            Frame::Message(frame) => {
                put_protocol_data(&mut contents, &frame.protocol_data);
                (FrameType::Message, frame.request_id)
            }
            Frame::Response(frame) => {
                put_protocol_data(&mut contents, &frame.protocol_data);
                (FrameType::Response, frame.request_id)
            }
            Frame::Error(frame) => {
                debug_assert!(frame.code.len() == 3);
                contents.put_slice(frame.code.as_bytes());
                contents.put_var_octets(frame.name.as_bytes());
                contents.put_var_octets(
                    frame
                        .triggered_at
                        .format(GENERALIZED_TIME_FORMAT)
                        .to_string()
                        .as_bytes(),
                );
                contents.put_var_octets(frame.data.as_bytes());
                put_protocol_data(&mut contents, &frame.protocol_data);
                (FrameType::Error, frame.request_id)
            }
            Frame::Transfer(frame) => {
                contents.put_var_uint(frame.amount);
                put_protocol_data(&mut contents, &frame.protocol_data);
                (FrameType::Transfer, frame.request_id)
            }
        };

        let mut buffer = Vec::with_capacity(6 + contents.len());
        buffer.put_u8(frame_type as u8);
        buffer.put_u32(request_id);
        buffer.put_var_octets(&contents);
        buffer
    }

    /// Finds the serialized ILP packet within the frame, if any.
    pub fn ilp_data(&self) -> Option<&[u8]> {
        let protocol_data = match self {
            Frame::Message(frame) => &frame.protocol_data,
            Frame::Response(frame) => &frame.protocol_data,
            Frame::Error(frame) => &frame.protocol_data,
            Frame::Transfer(frame) => &frame.protocol_data,
        };
        protocol_data
            .iter()
            .find(|entry| entry.protocol_name == ILP_PROTOCOL_NAME)
            .map(|entry| entry.data.as_slice())
    }
}

fn read_protocol_data(reader: &mut &[u8]) -> Result<Vec<ProtocolData>, FrameParseError> {
    let count = reader.read_var_uint()?;
    let mut protocol_data = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let protocol_name = String::from_utf8(reader.read_var_octets()?.to_vec())?;
        let content_type = ContentType::from(reader.read_u8()?);
        let data = reader.read_var_octets()?.to_vec();
        protocol_data.push(ProtocolData {
            protocol_name,
            content_type,
            data,
        });
    }
    Ok(protocol_data)
}

fn put_protocol_data(buffer: &mut Vec<u8>, protocol_data: &[ProtocolData]) {
    buffer.put_var_uint(protocol_data.len() as u64);
    for entry in protocol_data {
        buffer.put_var_octets(entry.protocol_name.as_bytes());
        buffer.put_u8(u8::from(entry.content_type));
        buffer.put_var_octets(&entry.data);
    }
}
