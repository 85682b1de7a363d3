//! Contract with the external BLE host stack.
//!
//! The transport issues commands through [`BleHost`]. The host reports
//! completions and link activity by handing [`HostEvent`]s to the
//! [`EventSink`] it was given during bring-up. Hosts may deliver events from
//! their own thread or synchronously from inside a command.

use std::fmt;
use std::sync::{Arc, Weak};

use gattlink_core::config::{
    CharPermissions, CharProperties, ControllerParams, ExtAdvParams, LegacyAdvParams, PhyMask,
    SecurityParams,
};
use gattlink_core::BleUuid;

use crate::bridge;
use crate::error::HostError;
use crate::transport::Shared;

pub type HostResult = Result<(), HostError>;

/// Server interface handle assigned by the host when the GATT application
/// registers.
pub type GattIf = u8;

/// 6-byte link-layer device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvOperation {
    ParamsSet,
    DataSet,
    ScanResponseSet,
    Started,
    Stopped,
}

/// Outcome carried by a write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    /// The value is not a well-formed frame.
    InvalidLength,
    /// The write was accepted on the wire but could not be delivered.
    Unlikely,
}

impl WriteStatus {
    /// ATT status byte for the response PDU.
    pub fn att_code(self) -> u8 {
        match self {
            WriteStatus::Success => 0x00,
            WriteStatus::InvalidLength => 0x0d,
            WriteStatus::Unlikely => 0x0e,
        }
    }
}

/// Everything the host reports back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Registered {
        gatt_if: GattIf,
        app_id: u16,
        status: HostResult,
    },
    ServiceCreated {
        service_handle: u16,
        status: HostResult,
    },
    CharacteristicAdded {
        char_handle: u16,
        status: HostResult,
    },
    Connected {
        conn_id: u16,
        peer: PeerAddress,
    },
    Disconnected {
        conn_id: u16,
        reason: u8,
    },
    Write {
        conn_id: u16,
        trans_id: u32,
        handle: u16,
        value: Vec<u8>,
        need_rsp: bool,
    },
    MtuChanged {
        conn_id: u16,
        mtu: u16,
    },
    PhyUpdated {
        peer: PeerAddress,
        tx_phy: u8,
        rx_phy: u8,
        status: HostResult,
    },
    AdvertisingStatus {
        op: AdvOperation,
        status: HostResult,
    },
}

/// Context handle the host uses to deliver events to one transport.
///
/// Holds only a weak reference: events delivered after the transport is
/// dropped, or after the bring-up that issued this sink was torn down, are
/// discarded.
#[derive(Clone)]
pub struct EventSink {
    shared: Weak<Shared>,
    generation: u64,
}

impl EventSink {
    pub(crate) fn new(shared: &Arc<Shared>, generation: u64) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            generation,
        }
    }

    pub fn deliver(&self, event: HostEvent) {
        match self.shared.upgrade() {
            Some(shared) => bridge::dispatch(&shared, self.generation, event),
            None => tracing::debug!(?event, "transport dropped, ignoring host event"),
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("generation", &self.generation)
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// Commands the transport issues to the BLE host.
///
/// Each call returns as soon as the host accepted (or rejected) the command;
/// completions arrive later as [`HostEvent`]s.
pub trait BleHost: Send + Sync {
    fn controller_init(&self, params: &ControllerParams) -> HostResult;
    fn controller_enable(&self) -> HostResult;
    fn stack_init(&self) -> HostResult;
    fn stack_enable(&self) -> HostResult;
    fn register_event_sink(&self, sink: EventSink) -> HostResult;
    fn set_device_name(&self, name: &str) -> HostResult;
    fn set_security_params(&self, params: &SecurityParams) -> HostResult;
    fn register_app(&self, app_id: u16) -> HostResult;
    fn unregister_app(&self, app_id: u16) -> HostResult;

    fn set_connection_phy(&self, peer: PeerAddress, tx: PhyMask, rx: PhyMask) -> HostResult;
    fn set_default_phy(&self, tx: PhyMask, rx: PhyMask) -> HostResult;

    fn create_service(
        &self,
        gatt_if: GattIf,
        uuid: BleUuid,
        primary: bool,
        num_handles: u16,
    ) -> HostResult;
    fn start_service(&self, service_handle: u16) -> HostResult;
    fn add_characteristic(
        &self,
        service_handle: u16,
        uuid: BleUuid,
        permissions: CharPermissions,
        properties: CharProperties,
        max_len: u16,
    ) -> HostResult;
    fn delete_service(&self, service_handle: u16) -> HostResult;

    fn set_ext_adv_params(&self, instance: u8, params: &ExtAdvParams) -> HostResult;
    fn set_ext_adv_data(&self, instance: u8, data: &[u8]) -> HostResult;
    fn set_ext_scan_response(&self, instance: u8, data: &[u8]) -> HostResult;
    /// `duration == 0` and `max_events == 0` advertise until stopped.
    fn start_ext_advertising(&self, instance: u8, duration: u16, max_events: u8) -> HostResult;
    fn stop_ext_advertising(&self, instances: &[u8]) -> HostResult;
    fn set_legacy_adv_data(&self, data: &[u8]) -> HostResult;
    fn start_legacy_advertising(&self, params: &LegacyAdvParams) -> HostResult;
    fn stop_legacy_advertising(&self) -> HostResult;

    /// Sends `value` as a notification (not an indication) on `char_handle`.
    fn notify(&self, gatt_if: GattIf, conn_id: u16, char_handle: u16, value: &[u8])
        -> HostResult;
    /// Answers a write that asked for a response. The value is always empty.
    fn send_response(
        &self,
        gatt_if: GattIf,
        conn_id: u16,
        trans_id: u32,
        status: WriteStatus,
    ) -> HostResult;

    fn stack_disable(&self) -> HostResult;
    fn stack_deinit(&self) -> HostResult;
    fn controller_disable(&self) -> HostResult;
    fn controller_deinit(&self) -> HostResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_address_formats_as_colon_hex() {
        let addr = PeerAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        assert_eq!(addr.to_string(), "de:ad:be:ef:00:01");
    }

    #[test]
    fn write_status_maps_to_att_codes() {
        assert_eq!(WriteStatus::Success.att_code(), 0);
        assert_eq!(WriteStatus::InvalidLength.att_code(), 0x0d);
        assert_eq!(WriteStatus::Unlikely.att_code(), 0x0e);
    }
}
