//! Peripheral-side BLE GATT data channel.
//!
//! A [`Transport`] drives an external BLE host stack (abstracted behind
//! [`BleHost`]) to expose one service/characteristic pair as a framed,
//! bidirectional packet channel. Host events come back through an
//! [`EventSink`] registered at bring-up and are translated by the event
//! bridge into connection tracking and inbound packet delivery.

pub mod bridge;
pub mod error;
pub mod host;
pub mod mock;
pub mod registry;
pub mod timer;
pub mod transport;

pub use bridge::{Inbound, InboundHandler};
pub use error::{HostError, TransportError};
pub use host::{
    AdvOperation, BleHost, EventSink, GattIf, HostEvent, HostResult, PeerAddress, WriteStatus,
};
pub use registry::{Connection, ConnectionRegistry};
pub use timer::{ManualTimer, ThreadTimer, Timer};
pub use transport::{SendTarget, Transport, TransportBuilder};
