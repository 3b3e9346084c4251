use std::convert::TryFrom;
use std::io::Read;
use std::str;
use std::time::{Duration, SystemTime};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes};
use log::error;
use once_cell::sync::Lazy;

use junction_packet::oer::{OerBufExt, OerBufMutExt};
use junction_packet::{
    Address, Fulfill, FulfillBuilder, ParseError, Prepare, PrepareBuilder,
};

pub static CCP_CONTROL_DESTINATION: Lazy<Address> = Lazy::new(|| Address::new("peer.route.control"));
pub static CCP_UPDATE_DESTINATION: Lazy<Address> = Lazy::new(|| Address::new("peer.route.update"));

/// Peer-protocol packets fulfill with 32 zero bytes; the condition is its
/// SHA-256.
pub const PEER_PROTOCOL_FULFILLMENT: [u8; 32] = [0; 32];
pub const PEER_PROTOCOL_CONDITION: [u8; 32] = [
    102, 104, 122, 173, 248, 98, 189, 119, 108, 143, 193, 139, 142, 159, 142, 32, 8, 151, 20, 133,
    110, 226, 51, 179, 144, 42, 89, 29, 13, 95, 41, 37,
];

const PEER_PROTOCOL_EXPIRY: Duration = Duration::from_secs(60);

const FLAG_OPTIONAL: u8 = 0x80;
const FLAG_TRANSITIVE: u8 = 0x40;
const FLAG_PARTIAL: u8 = 0x20;
const FLAG_UTF8: u8 = 0x10;

pub static CCP_RESPONSE: Lazy<Fulfill> = Lazy::new(|| {
    FulfillBuilder {
        fulfillment: &PEER_PROTOCOL_FULFILLMENT,
        data: &[],
    }
    .build()
});

#[derive(Clone, Copy, PartialEq, Debug)]
#[repr(u8)]
pub enum Mode {
    Idle = 0,
    Sync = 1,
}

impl TryFrom<u8> for Mode {
    type Error = ParseError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Mode::Idle),
            1 => Ok(Mode::Sync),
            other => Err(ParseError::InvalidPacket(format!(
                "unexpected CCP mode: {}",
                other
            ))),
        }
    }
}

/// Asks the peer to start (SYNC) or stop (IDLE) sending route updates,
/// naming the epoch we want it to resume from.
#[derive(Clone, PartialEq, Debug)]
pub struct RouteControlRequest {
    pub mode: Mode,
    pub last_known_routing_table_id: [u8; 16],
    pub last_known_epoch: u32,
    pub features: Vec<String>,
}

impl RouteControlRequest {
    pub fn try_from_prepare(prepare: &Prepare) -> Result<Self, ParseError> {
        if prepare.expires_at() < SystemTime::now() {
            return Err(ParseError::InvalidPacket("packet expired".to_string()));
        }
        RouteControlRequest::try_from_without_expiry(prepare)
    }

    pub(crate) fn try_from_without_expiry(prepare: &Prepare) -> Result<Self, ParseError> {
        check_peer_protocol(prepare, &CCP_CONTROL_DESTINATION)?;

        let mut data = prepare.data();
        let mode = Mode::try_from(data.read_u8()?)?;
        let mut last_known_routing_table_id = [0u8; 16];
        data.read_exact(&mut last_known_routing_table_id)?;
        let last_known_epoch = data.read_u32::<BigEndian>()?;
        let feature_count = data.read_var_uint()?;
        let mut features = Vec::with_capacity(feature_count as usize);
        for _ in 0..feature_count {
            features.push(read_utf8(&mut data)?);
        }

        Ok(RouteControlRequest {
            mode,
            last_known_routing_table_id,
            last_known_epoch,
            features,
        })
    }

    pub fn to_prepare(&self) -> Prepare {
        let mut data = Vec::new();
        data.put_u8(self.mode as u8);
        data.put_slice(&self.last_known_routing_table_id);
        data.put_u32(self.last_known_epoch);
        data.put_var_uint(self.features.len() as u64);
        for feature in &self.features {
            data.put_var_octets(feature.as_bytes());
        }

        PrepareBuilder {
            destination: CCP_CONTROL_DESTINATION.clone(),
            amount: 0,
            expires_at: SystemTime::now() + PEER_PROTOCOL_EXPIRY,
            execution_condition: &PEER_PROTOCOL_CONDITION,
            data: &data,
        }
        .build()
    }
}

/// Advisory flags attached to an advertised route.
#[derive(Clone, PartialEq, Debug)]
pub struct RouteProp {
    pub is_optional: bool,
    pub is_transitive: bool,
    pub is_partial: bool,
    pub is_utf8: bool,
    pub id: u16,
    pub value: Bytes,
}

impl RouteProp {
    // Advances the cursor in the caller's slice.
    pub fn try_from_data(data: &mut &[u8]) -> Result<Self, ParseError> {
        let meta = data.read_u8()?;
        let id = data.read_u16::<BigEndian>()?;
        let value = Bytes::copy_from_slice(data.read_var_octets()?);

        Ok(RouteProp {
            is_optional: meta & FLAG_OPTIONAL != 0,
            is_transitive: meta & FLAG_TRANSITIVE != 0,
            is_partial: meta & FLAG_PARTIAL != 0,
            is_utf8: meta & FLAG_UTF8 != 0,
            id,
            value,
        })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        let mut meta = 0u8;
        if self.is_optional {
            meta |= FLAG_OPTIONAL;
        }
        if self.is_transitive {
            meta |= FLAG_TRANSITIVE;
        }
        if self.is_partial {
            meta |= FLAG_PARTIAL;
        }
        if self.is_utf8 {
            meta |= FLAG_UTF8;
        }
        buf.put_u8(meta);
        buf.put_u16(self.id);
        buf.put_var_octets(&self.value[..]);
    }
}

/// One advertised route: the prefix, the path already traversed (loop
/// prevention), and an auth token proving freshness.
#[derive(Clone, PartialEq, Debug)]
pub struct Route {
    pub prefix: String,
    pub path: Vec<String>,
    pub auth: [u8; 32],
    pub props: Vec<RouteProp>,
}

impl Route {
    // Advances the cursor in the caller's slice.
    pub fn try_from_data(data: &mut &[u8]) -> Result<Self, ParseError> {
        let prefix = read_utf8(data)?;
        let path_len = data.read_var_uint()? as usize;
        let mut path = Vec::with_capacity(path_len);
        for _ in 0..path_len {
            path.push(read_utf8(data)?);
        }
        let mut auth = [0u8; 32];
        data.read_exact(&mut auth)?;
        let prop_count = data.read_var_uint()? as usize;
        let mut props = Vec::with_capacity(prop_count);
        for _ in 0..prop_count {
            props.push(RouteProp::try_from_data(data)?);
        }

        Ok(Route {
            prefix,
            path,
            auth,
            props,
        })
    }

    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_var_octets(self.prefix.as_bytes());
        buf.put_var_uint(self.path.len() as u64);
        for hop in &self.path {
            buf.put_var_octets(hop.as_bytes());
        }
        buf.put_slice(&self.auth);
        buf.put_var_uint(self.props.len() as u64);
        for prop in &self.props {
            prop.write_to(buf);
        }
    }
}

/// An incremental diff of the peer's routing table covering epochs
/// `[from_epoch_index, to_epoch_index)`.
#[derive(Clone, PartialEq, Debug)]
pub struct RouteUpdateRequest {
    pub routing_table_id: [u8; 16],
    pub current_epoch_index: u32,
    pub from_epoch_index: u32,
    pub to_epoch_index: u32,
    pub hold_down_time: u32,
    pub speaker: String,
    pub new_routes: Vec<Route>,
    pub withdrawn_routes: Vec<String>,
}

impl RouteUpdateRequest {
    pub fn try_from_prepare(prepare: &Prepare) -> Result<Self, ParseError> {
        if prepare.expires_at() < SystemTime::now() {
            return Err(ParseError::InvalidPacket("packet expired".to_string()));
        }
        RouteUpdateRequest::try_from_without_expiry(prepare)
    }

    pub(crate) fn try_from_without_expiry(prepare: &Prepare) -> Result<Self, ParseError> {
        check_peer_protocol(prepare, &CCP_UPDATE_DESTINATION)?;

        let mut data = prepare.data();
        let mut routing_table_id = [0u8; 16];
        data.read_exact(&mut routing_table_id)?;
        let current_epoch_index = data.read_u32::<BigEndian>()?;
        let from_epoch_index = data.read_u32::<BigEndian>()?;
        let to_epoch_index = data.read_u32::<BigEndian>()?;
        let hold_down_time = data.read_u32::<BigEndian>()?;
        let speaker = read_utf8(&mut data)?;
        let new_route_count = data.read_var_uint()? as usize;
        let mut new_routes = Vec::with_capacity(new_route_count);
        for _ in 0..new_route_count {
            new_routes.push(Route::try_from_data(&mut data)?);
        }
        let withdrawn_count = data.read_var_uint()? as usize;
        let mut withdrawn_routes = Vec::with_capacity(withdrawn_count);
        for _ in 0..withdrawn_count {
            withdrawn_routes.push(read_utf8(&mut data)?);
        }

        Ok(RouteUpdateRequest {
            routing_table_id,
            current_epoch_index,
            from_epoch_index,
            to_epoch_index,
            hold_down_time,
            speaker,
            new_routes,
            withdrawn_routes,
        })
    }

    pub fn to_prepare(&self) -> Prepare {
        let mut data = Vec::new();
        data.put_slice(&self.routing_table_id);
        data.put_u32(self.current_epoch_index);
        data.put_u32(self.from_epoch_index);
        data.put_u32(self.to_epoch_index);
        data.put_u32(self.hold_down_time);
        data.put_var_octets(self.speaker.as_bytes());
        data.put_var_uint(self.new_routes.len() as u64);
        for route in &self.new_routes {
            route.write_to(&mut data);
        }
        data.put_var_uint(self.withdrawn_routes.len() as u64);
        for withdrawn in &self.withdrawn_routes {
            data.put_var_octets(withdrawn.as_bytes());
        }

        PrepareBuilder {
            destination: CCP_UPDATE_DESTINATION.clone(),
            amount: 0,
            expires_at: SystemTime::now() + PEER_PROTOCOL_EXPIRY,
            execution_condition: &PEER_PROTOCOL_CONDITION,
            data: &data,
        }
        .build()
    }

    /// True when this update carries no changes (a keep-alive).
    pub fn is_heartbeat(&self) -> bool {
        self.new_routes.is_empty() && self.withdrawn_routes.is_empty()
    }
}

fn check_peer_protocol(prepare: &Prepare, destination: &Address) -> Result<(), ParseError> {
    if prepare.destination() != *destination {
        return Err(ParseError::InvalidPacket(format!(
            "not a CCP message, destination: {}",
            prepare.destination()
        )));
    }
    if prepare.execution_condition() != PEER_PROTOCOL_CONDITION {
        error!(
            "Unexpected peer protocol condition: {:x?}",
            prepare.execution_condition()
        );
        return Err(ParseError::InvalidPacket("wrong condition".to_string()));
    }
    Ok(())
}

fn read_utf8(data: &mut &[u8]) -> Result<String, ParseError> {
    let bytes = data.read_var_octets()?;
    str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| ParseError::InvalidPacket("route field was not utf8".to_string()))
}
