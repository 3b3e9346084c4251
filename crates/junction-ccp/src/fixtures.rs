//! Shared CCP test fixtures.

use once_cell::sync::Lazy;

use crate::packet::{Mode, Route, RouteControlRequest, RouteUpdateRequest};

pub static ROUTING_TABLE_ID: [u8; 16] = [
    0x21, 0xe5, 0x5f, 0x8e, 0xab, 0xcd, 0x4e, 0x97, 0x9a, 0xb9, 0xbf, 0x0f, 0xf0, 0x0a, 0x22,
    0x4c,
];

pub static CONTROL_REQUEST: Lazy<RouteControlRequest> = Lazy::new(|| RouteControlRequest {
    mode: Mode::Sync,
    last_known_routing_table_id: ROUTING_TABLE_ID,
    last_known_epoch: 32,
    features: vec!["foo".to_string(), "bar".to_string()],
});

pub static UPDATE_REQUEST_HEARTBEAT: Lazy<RouteUpdateRequest> = Lazy::new(|| RouteUpdateRequest {
    routing_table_id: ROUTING_TABLE_ID,
    current_epoch_index: 52,
    from_epoch_index: 52,
    to_epoch_index: 52,
    hold_down_time: 30_000,
    speaker: "example.alice".to_string(),
    new_routes: Vec::new(),
    withdrawn_routes: Vec::new(),
});

pub static UPDATE_REQUEST_COMPLEX: Lazy<RouteUpdateRequest> = Lazy::new(|| RouteUpdateRequest {
    routing_table_id: ROUTING_TABLE_ID,
    current_epoch_index: 52,
    from_epoch_index: 46,
    to_epoch_index: 52,
    hold_down_time: 30_000,
    speaker: "example.alice".to_string(),
    new_routes: vec![
        Route {
            prefix: "example.prefix1".to_string(),
            path: vec!["example.prefix1".to_string()],
            auth: [
                0xb9, 0xcc, 0x03, 0x67, 0xa3, 0x06, 0xba, 0xe3, 0x25, 0xa6, 0x1c, 0x93, 0xbe,
                0xcd, 0x5d, 0x6e, 0x0b, 0x48, 0x12, 0x6c, 0xff, 0xc7, 0x53, 0x8a, 0x43, 0x3d,
                0xdb, 0xd4, 0x51, 0x1f, 0x0d, 0x6b,
            ],
            props: Vec::new(),
        },
        Route {
            prefix: "example.prefix2".to_string(),
            path: vec![
                "example.connector1".to_string(),
                "example.prefix2".to_string(),
            ],
            auth: [
                0x51, 0xad, 0x54, 0x84, 0xf5, 0x4f, 0xc8, 0x18, 0x4b, 0x6f, 0x1a, 0x17, 0x9f,
                0x47, 0x32, 0x23, 0x41, 0xcc, 0x8a, 0xe4, 0x96, 0x2c, 0x34, 0xa6, 0x63, 0xde,
                0xac, 0x00, 0x71, 0x60, 0x04, 0x3b,
            ],
            props: Vec::new(),
        },
    ],
    withdrawn_routes: vec![
        "example.prefix3".to_string(),
        "example.prefix4".to_string(),
    ],
});
