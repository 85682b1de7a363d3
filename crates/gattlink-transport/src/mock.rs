//! In-process fake BLE host.
//!
//! Records every command, fails commands on request and raises the
//! completion events a real host would, synchronously, from inside the
//! command that caused them. Tests (and the echo demo) drive link activity
//! with [`MockHost::connect`], [`MockHost::write`] and friends.

use std::collections::HashMap;

use gattlink_core::config::{
    CharPermissions, CharProperties, ControllerParams, ExtAdvParams, LegacyAdvParams, PhyMask,
    SecurityParams,
};
use gattlink_core::BleUuid;
use parking_lot::Mutex;

use crate::error::HostError;
use crate::host::{
    AdvOperation, BleHost, EventSink, GattIf, HostEvent, HostResult, PeerAddress, WriteStatus,
};

pub const MOCK_GATT_IF: GattIf = 3;
pub const MOCK_SERVICE_HANDLE: u16 = 40;
pub const MOCK_CHAR_HANDLE: u16 = 42;

/// Generic failure code used when a test does not care about the value.
pub const MOCK_FAIL: HostError = HostError::new(-1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    ControllerInit,
    ControllerEnable,
    StackInit,
    StackEnable,
    RegisterEventSink,
    SetDeviceName(String),
    SetSecurityParams,
    RegisterApp(u16),
    UnregisterApp(u16),
    SetConnectionPhy {
        peer: PeerAddress,
        tx: PhyMask,
        rx: PhyMask,
    },
    SetDefaultPhy {
        tx: PhyMask,
        rx: PhyMask,
    },
    CreateService {
        gatt_if: GattIf,
        uuid: BleUuid,
        primary: bool,
        num_handles: u16,
    },
    StartService(u16),
    AddCharacteristic {
        service_handle: u16,
        uuid: BleUuid,
        permissions: CharPermissions,
        properties: CharProperties,
        max_len: u16,
    },
    DeleteService(u16),
    SetExtAdvParams(u8),
    SetExtAdvData {
        instance: u8,
        data: Vec<u8>,
    },
    SetExtScanResponse {
        instance: u8,
        data: Vec<u8>,
    },
    StartExtAdvertising {
        instance: u8,
        duration: u16,
        max_events: u8,
    },
    StopExtAdvertising(Vec<u8>),
    SetLegacyAdvData(Vec<u8>),
    StartLegacyAdvertising,
    StopLegacyAdvertising,
    Notify {
        gatt_if: GattIf,
        conn_id: u16,
        char_handle: u16,
        value: Vec<u8>,
    },
    SendResponse {
        gatt_if: GattIf,
        conn_id: u16,
        trans_id: u32,
        status: WriteStatus,
    },
    StackDisable,
    StackDeinit,
    ControllerDisable,
    ControllerDeinit,
}

/// Payload-free discriminant of [`HostCommand`], used to target failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ControllerInit,
    ControllerEnable,
    StackInit,
    StackEnable,
    RegisterEventSink,
    SetDeviceName,
    SetSecurityParams,
    RegisterApp,
    UnregisterApp,
    SetConnectionPhy,
    SetDefaultPhy,
    CreateService,
    StartService,
    AddCharacteristic,
    DeleteService,
    SetExtAdvParams,
    SetExtAdvData,
    SetExtScanResponse,
    StartExtAdvertising,
    StopExtAdvertising,
    SetLegacyAdvData,
    StartLegacyAdvertising,
    StopLegacyAdvertising,
    Notify,
    SendResponse,
    StackDisable,
    StackDeinit,
    ControllerDisable,
    ControllerDeinit,
}

impl HostCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            HostCommand::ControllerInit => CommandKind::ControllerInit,
            HostCommand::ControllerEnable => CommandKind::ControllerEnable,
            HostCommand::StackInit => CommandKind::StackInit,
            HostCommand::StackEnable => CommandKind::StackEnable,
            HostCommand::RegisterEventSink => CommandKind::RegisterEventSink,
            HostCommand::SetDeviceName(_) => CommandKind::SetDeviceName,
            HostCommand::SetSecurityParams => CommandKind::SetSecurityParams,
            HostCommand::RegisterApp(_) => CommandKind::RegisterApp,
            HostCommand::UnregisterApp(_) => CommandKind::UnregisterApp,
            HostCommand::SetConnectionPhy { .. } => CommandKind::SetConnectionPhy,
            HostCommand::SetDefaultPhy { .. } => CommandKind::SetDefaultPhy,
            HostCommand::CreateService { .. } => CommandKind::CreateService,
            HostCommand::StartService(_) => CommandKind::StartService,
            HostCommand::AddCharacteristic { .. } => CommandKind::AddCharacteristic,
            HostCommand::DeleteService(_) => CommandKind::DeleteService,
            HostCommand::SetExtAdvParams(_) => CommandKind::SetExtAdvParams,
            HostCommand::SetExtAdvData { .. } => CommandKind::SetExtAdvData,
            HostCommand::SetExtScanResponse { .. } => CommandKind::SetExtScanResponse,
            HostCommand::StartExtAdvertising { .. } => CommandKind::StartExtAdvertising,
            HostCommand::StopExtAdvertising(_) => CommandKind::StopExtAdvertising,
            HostCommand::SetLegacyAdvData(_) => CommandKind::SetLegacyAdvData,
            HostCommand::StartLegacyAdvertising => CommandKind::StartLegacyAdvertising,
            HostCommand::StopLegacyAdvertising => CommandKind::StopLegacyAdvertising,
            HostCommand::Notify { .. } => CommandKind::Notify,
            HostCommand::SendResponse { .. } => CommandKind::SendResponse,
            HostCommand::StackDisable => CommandKind::StackDisable,
            HostCommand::StackDeinit => CommandKind::StackDeinit,
            HostCommand::ControllerDisable => CommandKind::ControllerDisable,
            HostCommand::ControllerDeinit => CommandKind::ControllerDeinit,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FailRule {
    Once(HostError),
    Always(HostError),
}

#[derive(Debug, Default)]
struct MockState {
    commands: Vec<HostCommand>,
    failures: HashMap<CommandKind, FailRule>,
    /// 1-based notify ordinal to fail, with its error.
    fail_nth_notify: Option<(usize, HostError)>,
    notify_count: usize,
    sink: Option<EventSink>,
    next_trans_id: u32,
}

/// Recording fake host. See the module docs.
#[derive(Debug, Default)]
pub struct MockHost {
    inner: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `kind` command with `err`.
    pub fn fail_once(&self, kind: CommandKind, err: HostError) {
        self.inner.lock().failures.insert(kind, FailRule::Once(err));
    }

    /// Fails every `kind` command with `err` until cleared.
    pub fn fail_always(&self, kind: CommandKind, err: HostError) {
        self.inner.lock().failures.insert(kind, FailRule::Always(err));
    }

    /// Fails the `n`-th notify (1-based, counted from now) with `err`.
    pub fn fail_nth_notify(&self, n: usize, err: HostError) {
        let mut inner = self.inner.lock();
        let base = inner.notify_count;
        inner.fail_nth_notify = Some((base + n, err));
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock();
        inner.failures.clear();
        inner.fail_nth_notify = None;
    }

    pub fn commands(&self) -> Vec<HostCommand> {
        self.inner.lock().commands.clone()
    }

    pub fn kinds(&self) -> Vec<CommandKind> {
        self.inner.lock().commands.iter().map(HostCommand::kind).collect()
    }

    pub fn count(&self, kind: CommandKind) -> usize {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    pub fn clear_commands(&self) {
        self.inner.lock().commands.clear();
    }

    /// Every attempted notify as `(conn_id, value)`, failed ones included.
    pub fn notifications(&self) -> Vec<(u16, Vec<u8>)> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                HostCommand::Notify { conn_id, value, .. } => Some((*conn_id, value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn has_sink(&self) -> bool {
        self.inner.lock().sink.is_some()
    }

    /// Delivers `event` to the registered sink. Returns false when no sink
    /// is registered.
    pub fn raise(&self, event: HostEvent) -> bool {
        let sink = self.inner.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink.deliver(event);
                true
            }
            None => false,
        }
    }

    pub fn connect(&self, conn_id: u16, peer: PeerAddress) -> bool {
        self.raise(HostEvent::Connected { conn_id, peer })
    }

    pub fn disconnect(&self, conn_id: u16) -> bool {
        self.raise(HostEvent::Disconnected {
            conn_id,
            reason: 0x13,
        })
    }

    pub fn negotiate_mtu(&self, conn_id: u16, mtu: u16) -> bool {
        self.raise(HostEvent::MtuChanged { conn_id, mtu })
    }

    /// Raises a write on `handle` and returns the transaction id used.
    pub fn write(&self, conn_id: u16, handle: u16, value: &[u8], need_rsp: bool) -> u32 {
        let trans_id = {
            let mut inner = self.inner.lock();
            inner.next_trans_id = inner.next_trans_id.wrapping_add(1);
            inner.next_trans_id
        };
        self.raise(HostEvent::Write {
            conn_id,
            trans_id,
            handle,
            value: value.to_vec(),
            need_rsp,
        });
        trans_id
    }

    fn record(&self, command: HostCommand) -> HostResult {
        let mut inner = self.inner.lock();
        let kind = command.kind();
        inner.commands.push(command);

        if kind == CommandKind::Notify {
            inner.notify_count += 1;
            if let Some((n, err)) = inner.fail_nth_notify {
                if inner.notify_count == n {
                    inner.fail_nth_notify = None;
                    return Err(err);
                }
            }
        }
        match inner.failures.get(&kind).copied() {
            Some(FailRule::Once(err)) => {
                inner.failures.remove(&kind);
                Err(err)
            }
            Some(FailRule::Always(err)) => Err(err),
            None => Ok(()),
        }
    }

    fn record_then_raise(&self, command: HostCommand, event: HostEvent) -> HostResult {
        self.record(command)?;
        self.raise(event);
        Ok(())
    }
}

impl BleHost for MockHost {
    fn controller_init(&self, _params: &ControllerParams) -> HostResult {
        self.record(HostCommand::ControllerInit)
    }

    fn controller_enable(&self) -> HostResult {
        self.record(HostCommand::ControllerEnable)
    }

    fn stack_init(&self) -> HostResult {
        self.record(HostCommand::StackInit)
    }

    fn stack_enable(&self) -> HostResult {
        self.record(HostCommand::StackEnable)
    }

    fn register_event_sink(&self, sink: EventSink) -> HostResult {
        self.record(HostCommand::RegisterEventSink)?;
        self.inner.lock().sink = Some(sink);
        Ok(())
    }

    fn set_device_name(&self, name: &str) -> HostResult {
        self.record(HostCommand::SetDeviceName(name.to_string()))
    }

    fn set_security_params(&self, _params: &SecurityParams) -> HostResult {
        self.record(HostCommand::SetSecurityParams)
    }

    fn register_app(&self, app_id: u16) -> HostResult {
        self.record_then_raise(
            HostCommand::RegisterApp(app_id),
            HostEvent::Registered {
                gatt_if: MOCK_GATT_IF,
                app_id,
                status: Ok(()),
            },
        )
    }

    fn unregister_app(&self, app_id: u16) -> HostResult {
        self.record(HostCommand::UnregisterApp(app_id))
    }

    fn set_connection_phy(&self, peer: PeerAddress, tx: PhyMask, rx: PhyMask) -> HostResult {
        self.record(HostCommand::SetConnectionPhy { peer, tx, rx })
    }

    fn set_default_phy(&self, tx: PhyMask, rx: PhyMask) -> HostResult {
        self.record(HostCommand::SetDefaultPhy { tx, rx })
    }

    fn create_service(
        &self,
        gatt_if: GattIf,
        uuid: BleUuid,
        primary: bool,
        num_handles: u16,
    ) -> HostResult {
        self.record_then_raise(
            HostCommand::CreateService {
                gatt_if,
                uuid,
                primary,
                num_handles,
            },
            HostEvent::ServiceCreated {
                service_handle: MOCK_SERVICE_HANDLE,
                status: Ok(()),
            },
        )
    }

    fn start_service(&self, service_handle: u16) -> HostResult {
        self.record(HostCommand::StartService(service_handle))
    }

    fn add_characteristic(
        &self,
        service_handle: u16,
        uuid: BleUuid,
        permissions: CharPermissions,
        properties: CharProperties,
        max_len: u16,
    ) -> HostResult {
        self.record_then_raise(
            HostCommand::AddCharacteristic {
                service_handle,
                uuid,
                permissions,
                properties,
                max_len,
            },
            HostEvent::CharacteristicAdded {
                char_handle: MOCK_CHAR_HANDLE,
                status: Ok(()),
            },
        )
    }

    fn delete_service(&self, service_handle: u16) -> HostResult {
        self.record(HostCommand::DeleteService(service_handle))
    }

    fn set_ext_adv_params(&self, instance: u8, _params: &ExtAdvParams) -> HostResult {
        self.record(HostCommand::SetExtAdvParams(instance))
    }

    fn set_ext_adv_data(&self, instance: u8, data: &[u8]) -> HostResult {
        self.record(HostCommand::SetExtAdvData {
            instance,
            data: data.to_vec(),
        })
    }

    fn set_ext_scan_response(&self, instance: u8, data: &[u8]) -> HostResult {
        self.record(HostCommand::SetExtScanResponse {
            instance,
            data: data.to_vec(),
        })
    }

    fn start_ext_advertising(&self, instance: u8, duration: u16, max_events: u8) -> HostResult {
        self.record_then_raise(
            HostCommand::StartExtAdvertising {
                instance,
                duration,
                max_events,
            },
            HostEvent::AdvertisingStatus {
                op: AdvOperation::Started,
                status: Ok(()),
            },
        )
    }

    fn stop_ext_advertising(&self, instances: &[u8]) -> HostResult {
        self.record(HostCommand::StopExtAdvertising(instances.to_vec()))
    }

    fn set_legacy_adv_data(&self, data: &[u8]) -> HostResult {
        self.record(HostCommand::SetLegacyAdvData(data.to_vec()))
    }

    fn start_legacy_advertising(&self, _params: &LegacyAdvParams) -> HostResult {
        self.record_then_raise(
            HostCommand::StartLegacyAdvertising,
            HostEvent::AdvertisingStatus {
                op: AdvOperation::Started,
                status: Ok(()),
            },
        )
    }

    fn stop_legacy_advertising(&self) -> HostResult {
        self.record(HostCommand::StopLegacyAdvertising)
    }

    fn notify(
        &self,
        gatt_if: GattIf,
        conn_id: u16,
        char_handle: u16,
        value: &[u8],
    ) -> HostResult {
        self.record(HostCommand::Notify {
            gatt_if,
            conn_id,
            char_handle,
            value: value.to_vec(),
        })
    }

    fn send_response(
        &self,
        gatt_if: GattIf,
        conn_id: u16,
        trans_id: u32,
        status: WriteStatus,
    ) -> HostResult {
        self.record(HostCommand::SendResponse {
            gatt_if,
            conn_id,
            trans_id,
            status,
        })
    }

    fn stack_disable(&self) -> HostResult {
        self.record(HostCommand::StackDisable)
    }

    fn stack_deinit(&self) -> HostResult {
        self.record(HostCommand::StackDeinit)
    }

    fn controller_disable(&self) -> HostResult {
        self.record(HostCommand::ControllerDisable)
    }

    fn controller_deinit(&self) -> HostResult {
        self.record(HostCommand::ControllerDeinit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fail_once_then_recovers() {
        let host = MockHost::new();
        host.fail_once(CommandKind::StackInit, HostError::new(7));
        assert_eq!(host.stack_init(), Err(HostError::new(7)));
        assert_eq!(host.stack_init(), Ok(()));
        assert_eq!(host.count(CommandKind::StackInit), 2);
    }

    #[test]
    fn nth_notify_failure_counts_from_arming() {
        let host = MockHost::new();
        host.notify(1, 1, 42, b"a").expect("first notify");
        host.fail_nth_notify(2, MOCK_FAIL);
        assert!(host.notify(1, 1, 42, b"b").is_ok());
        assert_eq!(host.notify(1, 2, 42, b"c"), Err(MOCK_FAIL));
        assert!(host.notify(1, 3, 42, b"d").is_ok());
        assert_eq!(host.notifications().len(), 4);
    }

    #[test]
    fn raise_without_sink_reports_false() {
        let host = MockHost::new();
        assert!(!host.has_sink());
        assert!(!host.connect(1, PeerAddress::default()));
    }
}
