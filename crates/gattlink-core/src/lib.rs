//! Host-independent building blocks for the gattlink BLE data channel.
//!
//! Includes preset resolution, the characteristic wire frame, UUID parsing
//! and advertising payload construction. Nothing here talks to a BLE stack.

pub mod adv;
pub mod config;
pub mod error;
pub mod frame;
pub mod overrides;
pub mod uuid;

pub use config::{
    resolve, resolve_named, resolve_repr, supports_extended_advertising, BleConfig, Preset,
};
pub use error::{ConfigError, FrameError, UuidError};
pub use frame::{decode, encode, Packet, FRAME_HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD};
pub use overrides::ConfigOverrides;
pub use uuid::{BleUuid, UuidByteOrder};
