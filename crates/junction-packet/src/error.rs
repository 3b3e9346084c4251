use std::fmt;
use std::str;

/// Three-byte ILP error code (IA5String on the wire).
///
/// Codes from interledger RFC 0027: `F..` final, `T..` temporary, `R..`
/// relative.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct ErrorCode([u8; 3]);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Final,
    Temporary,
    Relative,
    Unknown,
}

impl ErrorCode {
    /// Returns `Some` when the bytes are 7-bit ASCII, the only valid encoding.
    pub fn new(bytes: [u8; 3]) -> Option<Self> {
        if bytes.iter().all(|&b| b < 128) {
            Some(ErrorCode(bytes))
        } else {
            None
        }
    }

    #[inline]
    pub fn class(self) -> ErrorClass {
        match self.0[0] {
            b'F' => ErrorClass::Final,
            b'T' => ErrorClass::Temporary,
            b'R' => ErrorClass::Relative,
            _ => ErrorClass::Unknown,
        }
    }

    pub const F00_BAD_REQUEST: Self = ErrorCode(*b"F00");
    pub const F01_INVALID_PACKET: Self = ErrorCode(*b"F01");
    pub const F02_UNREACHABLE: Self = ErrorCode(*b"F02");
    pub const F03_INVALID_AMOUNT: Self = ErrorCode(*b"F03");
    pub const F04_INSUFFICIENT_DESTINATION_AMOUNT: Self = ErrorCode(*b"F04");
    pub const F05_WRONG_CONDITION: Self = ErrorCode(*b"F05");
    pub const F06_UNEXPECTED_PAYMENT: Self = ErrorCode(*b"F06");
    pub const F07_CANNOT_RECEIVE: Self = ErrorCode(*b"F07");
    pub const F08_AMOUNT_TOO_LARGE: Self = ErrorCode(*b"F08");
    pub const F09_INVALID_PEER_RESPONSE: Self = ErrorCode(*b"F09");
    pub const F99_APPLICATION_ERROR: Self = ErrorCode(*b"F99");

    pub const T00_INTERNAL_ERROR: Self = ErrorCode(*b"T00");
    pub const T01_PEER_UNREACHABLE: Self = ErrorCode(*b"T01");
    pub const T02_PEER_BUSY: Self = ErrorCode(*b"T02");
    pub const T03_CONNECTOR_BUSY: Self = ErrorCode(*b"T03");
    pub const T04_INSUFFICIENT_LIQUIDITY: Self = ErrorCode(*b"T04");
    pub const T05_RATE_LIMITED: Self = ErrorCode(*b"T05");
    pub const T99_APPLICATION_ERROR: Self = ErrorCode(*b"T99");

    pub const R00_TRANSFER_TIMED_OUT: Self = ErrorCode(*b"R00");
    pub const R01_INSUFFICIENT_SOURCE_AMOUNT: Self = ErrorCode(*b"R01");
    pub const R02_INSUFFICIENT_TIMEOUT: Self = ErrorCode(*b"R02");
    pub const R99_APPLICATION_ERROR: Self = ErrorCode(*b"R99");

    fn description(self) -> Option<&'static str> {
        Some(match self {
            ErrorCode::F00_BAD_REQUEST => "Bad Request",
            ErrorCode::F01_INVALID_PACKET => "Invalid Packet",
            ErrorCode::F02_UNREACHABLE => "Unreachable",
            ErrorCode::F03_INVALID_AMOUNT => "Invalid Amount",
            ErrorCode::F04_INSUFFICIENT_DESTINATION_AMOUNT => "Insufficient Destination Amount",
            ErrorCode::F05_WRONG_CONDITION => "Wrong Condition",
            ErrorCode::F06_UNEXPECTED_PAYMENT => "Unexpected Payment",
            ErrorCode::F07_CANNOT_RECEIVE => "Cannot Receive",
            ErrorCode::F08_AMOUNT_TOO_LARGE => "Amount Too Large",
            ErrorCode::F09_INVALID_PEER_RESPONSE => "Invalid Peer Response",
            ErrorCode::F99_APPLICATION_ERROR => "Application Error",
            ErrorCode::T00_INTERNAL_ERROR => "Internal Error",
            ErrorCode::T01_PEER_UNREACHABLE => "Peer Unreachable",
            ErrorCode::T02_PEER_BUSY => "Peer Busy",
            ErrorCode::T03_CONNECTOR_BUSY => "Connector Busy",
            ErrorCode::T04_INSUFFICIENT_LIQUIDITY => "Insufficient Liquidity",
            ErrorCode::T05_RATE_LIMITED => "Rate Limited",
            ErrorCode::T99_APPLICATION_ERROR => "Application Error",
            ErrorCode::R00_TRANSFER_TIMED_OUT => "Transfer Timed Out",
            ErrorCode::R01_INSUFFICIENT_SOURCE_AMOUNT => "Insufficient Source Amount",
            ErrorCode::R02_INSUFFICIENT_TIMEOUT => "Insufficient Timeout",
            ErrorCode::R99_APPLICATION_ERROR => "Application Error",
            _ => return None,
        })
    }
}

impl From<ErrorCode> for [u8; 3] {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        let as_str = str::from_utf8(&self.0[..]).expect("codes are always ascii");
        if as_str.chars().any(|c| c.is_ascii_control()) {
            // Escape control characters so raw log output stays readable.
            write!(formatter, "{:?}", as_str)
        } else {
            formatter.write_str(as_str)
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self.description() {
            Some(description) => write!(formatter, "{} ({})", self, description),
            None => write!(formatter, "{}", self),
        }
    }
}
