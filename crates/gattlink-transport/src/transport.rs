//! The application-facing transport facade.
//!
//! All mutable state sits behind one reentrant lock shared with the event
//! bridge. The lock is held across host commands so concurrent sends
//! serialize; `RefCell` borrows never are, because hosts may raise events
//! synchronously from inside a command.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

use gattlink_core::adv::{build_extended_payload, build_legacy_payload};
use gattlink_core::config::{CharProperties, PhyMask};
use gattlink_core::frame::frame_len;
use gattlink_core::{
    resolve, supports_extended_advertising, BleConfig, BleUuid, Packet, Preset, MAX_FRAME_LEN,
};
use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, warn};

use crate::bridge::InboundHandler;
use crate::error::{HostError, TransportError};
use crate::host::{BleHost, EventSink, GattIf, HostResult};
use crate::registry::{Connection, ConnectionRegistry};
use crate::timer::{ThreadTimer, Timer};

/// ATT MTU before any exchange.
pub const DEFAULT_MTU: u16 = 23;
/// Quiet period the host needs between a disconnect and re-advertising.
pub const DEFAULT_READVERTISE_DELAY: Duration = Duration::from_millis(500);
/// Attribute handles reserved for the service: declaration, characteristic
/// declaration, value and CCCD.
pub const SERVICE_NUM_HANDLES: u16 = 4;
/// Advertising set used for extended advertising.
pub const EXT_ADV_INSTANCE: u8 = 0;

/// Destination of an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendTarget {
    /// Every registered connection.
    Broadcast,
    Connection(u16),
}

/// Connection id 0 is the broadcast sentinel.
impl From<u16> for SendTarget {
    fn from(conn_id: u16) -> Self {
        if conn_id == 0 {
            SendTarget::Broadcast
        } else {
            SendTarget::Connection(conn_id)
        }
    }
}

pub(crate) struct State {
    pub(crate) config: BleConfig,
    pub(crate) initialized: bool,
    /// Bumped on every teardown; event sinks from older bring-ups are stale.
    pub(crate) generation: u64,
    pub(crate) device_name: String,
    pub(crate) gatt_if: Option<GattIf>,
    pub(crate) service_handle: Option<u16>,
    pub(crate) char_handle: Option<u16>,
    pub(crate) mtu: u16,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) handler: Option<Box<dyn InboundHandler>>,
}

impl State {
    fn new(config: BleConfig) -> Self {
        Self {
            config,
            initialized: false,
            generation: 0,
            device_name: String::new(),
            gatt_if: None,
            service_handle: None,
            char_handle: None,
            mtu: DEFAULT_MTU,
            registry: ConnectionRegistry::new(),
            handler: None,
        }
    }

    /// Resets everything a bring-up established and returns the released
    /// handler so it can be dropped outside the borrow.
    fn reset(&mut self) -> Option<Box<dyn InboundHandler>> {
        self.initialized = false;
        self.generation = self.generation.wrapping_add(1);
        self.gatt_if = None;
        self.service_handle = None;
        self.char_handle = None;
        self.mtu = DEFAULT_MTU;
        self.registry.clear();
        self.handler.take()
    }
}

pub(crate) struct Shared {
    pub(crate) state: ReentrantMutex<RefCell<State>>,
    pub(crate) host: Arc<dyn BleHost>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) readvertise_delay: Duration,
}

#[derive(Debug, Clone, Copy)]
enum BringUpStep {
    ControllerInit,
    ControllerEnable,
    StackInit,
    StackEnable,
    AppRegistered(u16),
}

/// Records completed bring-up steps and undoes them in reverse order unless
/// committed.
struct BringUp<'a> {
    host: &'a dyn BleHost,
    done: Vec<BringUpStep>,
}

impl<'a> BringUp<'a> {
    fn new(host: &'a dyn BleHost) -> Self {
        Self {
            host,
            done: Vec::new(),
        }
    }

    fn run(
        &mut self,
        what: &'static str,
        undo: Option<BringUpStep>,
        step: impl FnOnce(&dyn BleHost) -> HostResult,
    ) -> Result<(), HostError> {
        if let Err(err) = step(self.host) {
            error!(step = what, code = err.code, "bring-up step failed");
            return Err(err);
        }
        debug!(step = what, "bring-up step ok");
        if let Some(undo) = undo {
            self.done.push(undo);
        }
        Ok(())
    }

    fn commit(mut self) {
        self.done.clear();
    }
}

impl Drop for BringUp<'_> {
    fn drop(&mut self) {
        while let Some(step) = self.done.pop() {
            let result = match step {
                BringUpStep::AppRegistered(app_id) => self.host.unregister_app(app_id),
                BringUpStep::StackEnable => self.host.stack_disable(),
                BringUpStep::StackInit => self.host.stack_deinit(),
                BringUpStep::ControllerEnable => self.host.controller_disable(),
                BringUpStep::ControllerInit => self.host.controller_deinit(),
            };
            if let Err(err) = result {
                warn!(?step, code = err.code, "rollback step failed");
            }
        }
    }
}

impl Shared {
    fn initialize(
        self: &Arc<Self>,
        device_name: &str,
        handler: Option<Box<dyn InboundHandler>>,
    ) -> Result<(), TransportError> {
        let guard = self.state.lock();
        if guard.borrow().initialized {
            warn!("already initialized");
            return Ok(());
        }
        if device_name.is_empty() {
            error!("refusing to initialize with an empty device name");
            return Err(TransportError::InvalidArgument("device name is empty"));
        }
        let Some(handler) = handler else {
            error!("refusing to initialize without an inbound handler");
            return Err(TransportError::InvalidArgument("inbound handler is unset"));
        };

        let (config, generation) = {
            let mut st = guard.borrow_mut();
            st.device_name = device_name.to_string();
            st.handler = Some(handler);
            (st.config.clone(), st.generation)
        };
        let sink = EventSink::new(self, generation);

        let mut bring_up = BringUp::new(self.host.as_ref());
        let result = (|| {
            bring_up.run("controller init", Some(BringUpStep::ControllerInit), |h| {
                h.controller_init(&config.controller)
            })?;
            bring_up.run("controller enable", Some(BringUpStep::ControllerEnable), |h| {
                h.controller_enable()
            })?;
            bring_up.run("stack init", Some(BringUpStep::StackInit), |h| h.stack_init())?;
            bring_up.run("stack enable", Some(BringUpStep::StackEnable), |h| h.stack_enable())?;
            bring_up.run("register event sink", None, |h| h.register_event_sink(sink))?;
            bring_up.run("set device name", None, |h| h.set_device_name(device_name))?;
            bring_up.run("set security params", None, |h| {
                h.set_security_params(&config.security)
            })?;
            bring_up.run(
                "register gatt app",
                Some(BringUpStep::AppRegistered(config.gatt.app_id)),
                |h| h.register_app(config.gatt.app_id),
            )
        })();

        if let Err(err) = result {
            drop(bring_up);
            let released = guard.borrow_mut().reset();
            drop(released);
            return Err(err.into());
        }

        guard.borrow_mut().initialized = true;
        if let Err(err) = self.set_preferred_phy(config.phy.tx, config.phy.rx) {
            error!(%err, "failed to set preferred phy");
            drop(bring_up);
            let released = guard.borrow_mut().reset();
            drop(released);
            return Err(err);
        }
        bring_up.commit();

        info!(device_name, preset = %config.preset, "transport initialized");
        Ok(())
    }

    pub(crate) fn set_preferred_phy(&self, tx: PhyMask, rx: PhyMask) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let peers: Vec<Connection> = {
            let st = guard.borrow();
            if !st.initialized {
                return Err(TransportError::InvalidState("transport not initialized"));
            }
            st.registry.iter().copied().collect()
        };
        for conn in peers {
            self.host.set_connection_phy(conn.peer, tx, rx).map_err(|err| {
                error!(conn_id = conn.conn_id, peer = %conn.peer, code = err.code, "set connection phy failed");
                err
            })?;
        }
        self.host.set_default_phy(tx, rx)?;
        debug!(tx = tx.bits(), rx = rx.bits(), "preferred phy set");
        Ok(())
    }

    fn create_service(&self, uuid: BleUuid, primary: bool) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let gatt_if = {
            let st = guard.borrow();
            if !st.initialized {
                return Err(TransportError::InvalidState("transport not initialized"));
            }
            if let Some(handle) = st.service_handle {
                debug!(handle, "service already exists");
                return Ok(());
            }
            st.gatt_if
                .ok_or(TransportError::InvalidState("gatt application not registered"))?
        };
        self.host
            .create_service(gatt_if, uuid, primary, SERVICE_NUM_HANDLES)
            .map_err(|err| {
                error!(%uuid, code = err.code, "create service failed");
                TransportError::Host(err)
            })
    }

    fn create_characteristic(
        &self,
        uuid: BleUuid,
        properties: CharProperties,
    ) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let (service_handle, permissions) = {
            let st = guard.borrow();
            if !st.initialized {
                return Err(TransportError::InvalidState("transport not initialized"));
            }
            let Some(service_handle) = st.service_handle else {
                return Err(TransportError::InvalidState("service not created"));
            };
            if let Some(handle) = st.char_handle {
                debug!(handle, "characteristic already exists");
                return Ok(());
            }
            (service_handle, st.config.gatt.char_permissions)
        };
        self.host
            .add_characteristic(
                service_handle,
                uuid,
                permissions,
                properties,
                MAX_FRAME_LEN as u16,
            )
            .map_err(|err| {
                error!(%uuid, code = err.code, "add characteristic failed");
                TransportError::Host(err)
            })
    }

    pub(crate) fn start_advertising(&self) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let (config, name) = {
            let st = guard.borrow();
            if !st.initialized {
                return Err(TransportError::InvalidState("transport not initialized"));
            }
            if st.service_handle.is_none() {
                return Err(TransportError::InvalidState("service not created"));
            }
            (st.config.clone(), st.device_name.clone())
        };
        let service = config.gatt.service_uuid();

        if supports_extended_advertising(&config) {
            let payload = build_extended_payload(config.adv_flags, &name, service);
            self.host.set_ext_adv_params(EXT_ADV_INSTANCE, &config.ext_adv)?;
            self.host.set_ext_adv_data(EXT_ADV_INSTANCE, &payload)?;
            self.host.set_ext_scan_response(EXT_ADV_INSTANCE, &[])?;
            self.host.start_ext_advertising(EXT_ADV_INSTANCE, 0, 0)?;
            info!(len = payload.len(), "extended advertising started");
        } else {
            let payload = build_legacy_payload(config.adv_flags, &name, service);
            self.host.set_legacy_adv_data(&payload)?;
            self.host.start_legacy_advertising(&config.legacy_adv)?;
            info!(len = payload.len(), "legacy advertising started");
        }
        Ok(())
    }

    pub(crate) fn send(
        &self,
        target: SendTarget,
        id: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let (gatt_if, char_handle, frame, conn_ids) = {
            let st = guard.borrow();
            if payload.is_empty() {
                return Err(TransportError::InvalidArgument("payload is empty"));
            }
            if !st.initialized {
                return Err(TransportError::InvalidState("transport not initialized"));
            }
            let (Some(gatt_if), Some(char_handle)) = (st.gatt_if, st.char_handle) else {
                return Err(TransportError::InvalidState("characteristic not created"));
            };
            let len = frame_len(payload.len());
            if len > usize::from(st.mtu) {
                warn!(len, mtu = st.mtu, "frame exceeds negotiated mtu");
                return Err(TransportError::InvalidArgument("frame exceeds negotiated mtu"));
            }
            let frame = gattlink_core::encode(id, payload)?;
            let conn_ids: Vec<u16> = match target {
                SendTarget::Broadcast => {
                    if st.registry.is_empty() {
                        warn!("no connections for broadcast");
                        return Err(TransportError::ConnectionNotFound(0));
                    }
                    st.registry.iter().map(|c| c.conn_id).collect()
                }
                SendTarget::Connection(conn_id) => vec![st.registry.find(conn_id)?.conn_id],
            };
            (gatt_if, char_handle, frame, conn_ids)
        };

        let mut last_err = None;
        for conn_id in conn_ids {
            match self.host.notify(gatt_if, conn_id, char_handle, &frame) {
                Ok(()) => debug!(conn_id, len = frame.len(), "frame sent"),
                Err(err) => {
                    error!(conn_id, code = err.code, "notify failed");
                    last_err = Some(err);
                }
            }
        }
        match last_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn stop(&self) -> Result<(), TransportError> {
        let guard = self.state.lock();
        let (extended, service_handle) = {
            let st = guard.borrow();
            if !st.initialized {
                return Ok(());
            }
            (supports_extended_advertising(&st.config), st.service_handle)
        };

        let mut last_err: Option<HostError> = None;
        let mut check = |what: &'static str, result: HostResult| {
            if let Err(err) = result {
                error!(step = what, code = err.code, "teardown step failed");
                last_err = Some(err);
            }
        };

        if extended {
            check("stop advertising", self.host.stop_ext_advertising(&[EXT_ADV_INSTANCE]));
        } else {
            check("stop advertising", self.host.stop_legacy_advertising());
        }
        if let Some(handle) = service_handle {
            check("delete service", self.host.delete_service(handle));
        }
        check("stack disable", self.host.stack_disable());
        check("stack deinit", self.host.stack_deinit());
        check("controller disable", self.host.controller_disable());
        check("controller deinit", self.host.controller_deinit());

        let released = guard.borrow_mut().reset();
        drop(released);

        match last_err {
            Some(err) => {
                warn!(code = err.code, "transport stopped with errors");
                Err(err.into())
            }
            None => {
                info!("transport stopped");
                Ok(())
            }
        }
    }
}

impl Shared {
    /// Restarts advertising if the bring-up identified by `generation` is
    /// still live, has a service and nobody is connected.
    pub(crate) fn rearm_advertising(&self, generation: u64) {
        let guard = self.state.lock();
        {
            let st = guard.borrow();
            if st.generation != generation || !st.initialized {
                debug!("transport restarted or stopped, skipping re-advertise");
                return;
            }
            if st.service_handle.is_none() || !st.registry.is_empty() {
                debug!(connections = st.registry.count(), "not idle, skipping re-advertise");
                return;
            }
        }
        if let Err(err) = self.start_advertising() {
            error!(%err, "failed to restart advertising");
        }
    }
}

/// Builder for [`Transport`].
pub struct TransportBuilder {
    host: Arc<dyn BleHost>,
    timer: Option<Arc<dyn Timer>>,
    readvertise_delay: Duration,
    config: BleConfig,
}

impl TransportBuilder {
    pub fn config(mut self, config: BleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preset(mut self, preset: Preset) -> Self {
        self.config = resolve(preset);
        self
    }

    /// Timer used to defer advertising restarts. Defaults to [`ThreadTimer`].
    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn readvertise_delay(mut self, delay: Duration) -> Self {
        self.readvertise_delay = delay;
        self
    }

    pub fn build(self) -> Transport {
        let shared = Shared {
            state: ReentrantMutex::new(RefCell::new(State::new(self.config))),
            host: self.host,
            timer: self.timer.unwrap_or_else(|| Arc::new(ThreadTimer)),
            readvertise_delay: self.readvertise_delay,
        };
        Transport {
            shared: Arc::new(shared),
        }
    }
}

/// Peripheral-side GATT data channel over one service/characteristic pair.
///
/// Dropping the transport stops it.
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    pub fn builder(host: Arc<dyn BleHost>) -> TransportBuilder {
        TransportBuilder {
            host,
            timer: None,
            readvertise_delay: DEFAULT_READVERTISE_DELAY,
            config: BleConfig::default(),
        }
    }

    pub fn new(host: Arc<dyn BleHost>, config: BleConfig) -> Self {
        Self::builder(host).config(config).build()
    }

    /// Brings the host up and registers the GATT application.
    ///
    /// Returns `Ok` without side effects when already initialized. On a
    /// host failure every completed step is undone and the host's error is
    /// returned unchanged.
    pub fn initialize<H>(&self, device_name: &str, handler: H) -> Result<(), TransportError>
    where
        H: InboundHandler + 'static,
    {
        self.shared.initialize(device_name, Some(Box::new(handler)))
    }

    /// Like [`Transport::initialize`], with the handler optional so callers
    /// forwarding a possibly-absent callback get `InvalidArgument`.
    pub fn initialize_boxed(
        &self,
        device_name: &str,
        handler: Option<Box<dyn InboundHandler>>,
    ) -> Result<(), TransportError> {
        self.shared.initialize(device_name, handler)
    }

    /// Initializes, creates the configured service and characteristic and
    /// starts advertising. Any failure after bring-up stops the transport
    /// before the error is returned.
    pub fn quick_start<H>(&self, device_name: &str, handler: H) -> Result<(), TransportError>
    where
        H: InboundHandler + 'static,
    {
        self.initialize(device_name, handler)?;
        if let Err(err) = self.finish_quick_start() {
            error!(%err, "quick start failed, stopping");
            if let Err(stop_err) = self.stop() {
                warn!(%stop_err, "cleanup after failed quick start reported errors");
            }
            return Err(err);
        }
        info!(device_name, "quick start completed");
        Ok(())
    }

    fn finish_quick_start(&self) -> Result<(), TransportError> {
        let gatt = self.config().gatt;
        let service = gatt
            .service_uuid()
            .ok_or(TransportError::InvalidArgument("configured service uuid is invalid"))?;
        self.create_service(service, true)?;
        let characteristic = gatt
            .char_uuid()
            .ok_or(TransportError::InvalidArgument("configured characteristic uuid is invalid"))?;
        self.create_characteristic(characteristic, gatt.char_properties)?;
        self.start_advertising()
    }

    pub fn create_service(&self, uuid: BleUuid, primary: bool) -> Result<(), TransportError> {
        self.shared.create_service(uuid, primary)
    }

    pub fn create_characteristic(
        &self,
        uuid: BleUuid,
        properties: CharProperties,
    ) -> Result<(), TransportError> {
        self.shared.create_characteristic(uuid, properties)
    }

    /// Builds a fresh advertising payload and starts extended or legacy
    /// advertising depending on the preset.
    pub fn start_advertising(&self) -> Result<(), TransportError> {
        self.shared.start_advertising()
    }

    pub fn set_preferred_phy(&self, tx: PhyMask, rx: PhyMask) -> Result<(), TransportError> {
        self.shared.set_preferred_phy(tx, rx)
    }

    /// Frames `payload` under `id` and notifies it to `target`.
    ///
    /// A broadcast attempts every connection and reports the last failure.
    pub fn send(
        &self,
        target: impl Into<SendTarget>,
        id: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        self.shared.send(target.into(), id, payload)
    }

    pub fn send_packet(
        &self,
        target: impl Into<SendTarget>,
        packet: &Packet,
    ) -> Result<(), TransportError> {
        self.shared.send(target.into(), packet.id, &packet.payload)
    }

    /// Best-effort teardown. Every step runs; the last host error is
    /// returned, but the transport always ends uninitialized.
    pub fn stop(&self) -> Result<(), TransportError> {
        self.shared.stop()
    }

    /// Replaces the configuration. Only legal before initialization.
    pub fn update_config(&self, config: BleConfig) -> Result<(), TransportError> {
        let guard = self.shared.state.lock();
        let mut st = guard.borrow_mut();
        if st.initialized {
            error!("cannot update config after initialization");
            return Err(TransportError::InvalidState("config is frozen while initialized"));
        }
        if let Err(err) = config.validate() {
            error!(%err, "rejecting config update");
            return Err(TransportError::InvalidArgument("config failed validation"));
        }
        debug!(preset = %config.preset, "config updated");
        st.config = config;
        Ok(())
    }

    pub fn connected_devices_count(&self) -> u8 {
        self.shared.state.lock().borrow().registry.count()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.shared.state.lock().borrow().registry.iter().copied().collect()
    }

    pub fn mtu(&self) -> u16 {
        self.shared.state.lock().borrow().mtu
    }

    pub fn config(&self) -> BleConfig {
        self.shared.state.lock().borrow().config.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.state.lock().borrow().initialized
    }

    pub fn service_handle(&self) -> Option<u16> {
        self.shared.state.lock().borrow().service_handle
    }

    pub fn characteristic_handle(&self) -> Option<u16> {
        self.shared.state.lock().borrow().char_handle
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(%err, "stop on drop reported errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_conn_id_is_broadcast() {
        assert_eq!(SendTarget::from(0), SendTarget::Broadcast);
        assert_eq!(SendTarget::from(9), SendTarget::Connection(9));
    }

    #[test]
    fn state_reset_bumps_generation_and_clears_handles() {
        let mut state = State::new(BleConfig::default());
        state.initialized = true;
        state.service_handle = Some(40);
        state.char_handle = Some(42);
        state.mtu = 200;
        state.registry.on_connect(1, Default::default());

        assert!(state.reset().is_none());
        assert!(!state.initialized);
        assert_eq!(state.generation, 1);
        assert_eq!(state.service_handle, None);
        assert_eq!(state.char_handle, None);
        assert_eq!(state.mtu, DEFAULT_MTU);
        assert!(state.registry.is_empty());
    }
}
