//! Byte-exact packet fixtures shared by the codec tests.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::{Address, ErrorCode, Fulfill, FulfillBuilder, Prepare, PrepareBuilder, Reject, RejectBuilder};

pub static EXPIRES_AT: Lazy<SystemTime> = Lazy::new(|| {
    SystemTime::from(
        DateTime::parse_from_rfc3339("2024-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc),
    )
});

pub static PREPARE: Lazy<Prepare> = Lazy::new(|| {
    PrepareBuilder {
        amount: 1000,
        expires_at: *EXPIRES_AT,
        execution_condition: &[0x0c; 32],
        destination: Address::new("test.bob"),
        data: b"",
    }
    .build()
});

// type | varlen | amount | "20240101120000000" | condition | destination | data
pub static PREPARE_BYTES: Lazy<Vec<u8>> = Lazy::new(|| {
    hex::decode(concat!(
        "0c43",
        "00000000000003e8",
        "3230323430313031313230303030303030",
        "0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c",
        "08746573742e626f62",
        "00",
    ))
    .unwrap()
});

pub static FULFILL: Lazy<Fulfill> = Lazy::new(|| {
    FulfillBuilder {
        fulfillment: &[0u8; 32],
        data: b"",
    }
    .build()
});

pub static FULFILL_BYTES: Lazy<Vec<u8>> = Lazy::new(|| {
    hex::decode(concat!(
        "0d21",
        "0000000000000000000000000000000000000000000000000000000000000000",
        "00",
    ))
    .unwrap()
});

pub static TRIGGERED_BY: Lazy<Address> = Lazy::new(|| Address::new("test.node"));

pub static REJECT: Lazy<Reject> = Lazy::new(|| {
    RejectBuilder {
        code: ErrorCode::F02_UNREACHABLE,
        message: b"",
        triggered_by: Some(&TRIGGERED_BY),
        data: b"",
    }
    .build()
});

pub static REJECT_BYTES: Lazy<Vec<u8>> = Lazy::new(|| {
    hex::decode(concat!(
        "0e0f",
        "463032",
        "09746573742e6e6f6465",
        "00",
        "00",
    ))
    .unwrap()
});
