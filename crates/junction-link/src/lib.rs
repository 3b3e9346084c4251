//! # junction-link
//!
//! The bilateral peer link: a length-free frame codec (MESSAGE / RESPONSE /
//! ERROR / TRANSFER, each carrying named sub-protocols), a transport
//! capability that production adapters implement, and the [`LinkService`]
//! that correlates requests with responses per link.
//!
//! ILP packets ride in the `ilp` sub-protocol. Link-local protocols (route
//! updates, settlement messages) are ILP prepares addressed under `peer.`,
//! so the frame layer stays oblivious to them.

mod packet;
mod service;
mod transport;

pub use self::packet::{
    ContentType, ErrorFrame, Frame, FrameParseError, MessageFrame, ProtocolData, ResponseFrame,
    TransferFrame, ILP_PROTOCOL_NAME,
};
pub use self::service::{IgnoreMoney, LinkService, MoneyHandler};
pub use self::transport::{link_pair, LinkTransport};
