//! Translation of host events into transport state changes and inbound
//! packet delivery.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use gattlink_core::{decode, Packet, MAX_FRAME_LEN};
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::host::{AdvOperation, HostEvent, HostResult, PeerAddress, WriteStatus};
use crate::transport::{SendTarget, Shared, State};

/// Receives every decoded inbound packet.
///
/// Runs with the transport lock held, so it may call back into the
/// transport (for example through [`Inbound::reply`]) but should return
/// promptly. If it panics, the panic reaches the host's event thread and the
/// handler stays installed for later writes.
pub trait InboundHandler: Send {
    fn on_packet(&mut self, inbound: Inbound, packet: Packet);
}

impl<F> InboundHandler for F
where
    F: FnMut(Inbound, Packet) + Send,
{
    fn on_packet(&mut self, inbound: Inbound, packet: Packet) {
        self(inbound, packet)
    }
}

/// Origin of an inbound packet and a handle for answering it.
#[derive(Clone)]
pub struct Inbound {
    shared: Weak<Shared>,
    conn_id: u16,
}

impl Inbound {
    pub fn conn_id(&self) -> u16 {
        self.conn_id
    }

    /// Sends a packet back to the connection this one arrived on.
    pub fn reply(&self, id: u8, payload: &[u8]) -> Result<(), TransportError> {
        self.send(SendTarget::Connection(self.conn_id), id, payload)
    }

    pub fn send(
        &self,
        target: impl Into<SendTarget>,
        id: u8,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or(TransportError::InvalidState("transport dropped"))?;
        shared.send(target.into(), id, payload)
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("conn_id", &self.conn_id)
            .finish()
    }
}

pub(crate) fn dispatch(shared: &Arc<Shared>, generation: u64, event: HostEvent) {
    let guard = shared.state.lock();
    let cell: &RefCell<State> = &guard;
    {
        let st = cell.borrow();
        if st.generation != generation {
            debug!(?event, "event from a torn-down bring-up, ignoring");
            return;
        }
    }

    match event {
        HostEvent::Registered {
            gatt_if,
            app_id,
            status,
        } => on_registered(cell, gatt_if, app_id, status),
        HostEvent::ServiceCreated {
            service_handle,
            status,
        } => on_service_created(shared, cell, service_handle, status),
        HostEvent::CharacteristicAdded {
            char_handle,
            status,
        } => on_characteristic_added(cell, char_handle, status),
        HostEvent::Connected { conn_id, peer } => on_connected(cell, conn_id, peer),
        HostEvent::Disconnected { conn_id, reason } => {
            on_disconnected(shared, cell, conn_id, reason)
        }
        HostEvent::Write {
            conn_id,
            trans_id,
            handle,
            value,
            need_rsp,
        } => on_write(shared, cell, conn_id, trans_id, handle, &value, need_rsp),
        HostEvent::MtuChanged { conn_id, mtu } => on_mtu_changed(cell, conn_id, mtu),
        HostEvent::PhyUpdated {
            peer,
            tx_phy,
            rx_phy,
            status,
        } => match status {
            Ok(()) => info!(%peer, tx_phy, rx_phy, "phy updated"),
            Err(err) => warn!(%peer, code = err.code, "phy update failed"),
        },
        HostEvent::AdvertisingStatus { op, status } => on_advertising_status(op, status),
    }
}

fn on_registered(cell: &RefCell<State>, gatt_if: u8, app_id: u16, status: HostResult) {
    if let Err(err) = status {
        error!(app_id, code = err.code, "gatt app registration failed");
        return;
    }
    let mut st = cell.borrow_mut();
    if app_id != st.config.gatt.app_id {
        debug!(app_id, "registration for another app");
        return;
    }
    st.gatt_if = Some(gatt_if);
    info!(gatt_if, app_id, "gatt app registered");
}

fn on_service_created(
    shared: &Shared,
    cell: &RefCell<State>,
    service_handle: u16,
    status: HostResult,
) {
    if let Err(err) = status {
        error!(code = err.code, "service creation failed");
        return;
    }
    cell.borrow_mut().service_handle = Some(service_handle);
    info!(handle = service_handle, "service created");
    if let Err(err) = shared.host.start_service(service_handle) {
        error!(handle = service_handle, code = err.code, "start service failed");
    }
}

fn on_characteristic_added(cell: &RefCell<State>, char_handle: u16, status: HostResult) {
    if let Err(err) = status {
        error!(code = err.code, "characteristic creation failed");
        return;
    }
    cell.borrow_mut().char_handle = Some(char_handle);
    info!(handle = char_handle, "characteristic added");
}

fn on_connected(cell: &RefCell<State>, conn_id: u16, peer: PeerAddress) {
    let mut st = cell.borrow_mut();
    if !st.initialized {
        debug!(conn_id, "connect while not initialized, ignoring");
        return;
    }
    st.registry.on_connect(conn_id, peer);
    info!(conn_id, %peer, connections = st.registry.count(), "device connected");
}

fn on_disconnected(shared: &Arc<Shared>, cell: &RefCell<State>, conn_id: u16, reason: u8) {
    let generation = {
        let mut st = cell.borrow_mut();
        if !st.initialized {
            debug!(conn_id, "disconnect while not initialized, ignoring");
            return;
        }
        if st.registry.on_disconnect(conn_id).is_none() {
            return;
        }
        info!(conn_id, reason, connections = st.registry.count(), "device disconnected");
        if !st.registry.is_empty() {
            return;
        }
        st.generation
    };

    let weak = Arc::downgrade(shared);
    shared.timer.schedule_once(
        shared.readvertise_delay,
        Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.rearm_advertising(generation);
            }
        }),
    );
    debug!(delay = ?shared.readvertise_delay, "advertising restart armed");
}

fn on_write(
    shared: &Arc<Shared>,
    cell: &RefCell<State>,
    conn_id: u16,
    trans_id: u32,
    handle: u16,
    value: &[u8],
    need_rsp: bool,
) {
    let (gatt_if, generation) = {
        let st = cell.borrow();
        if !st.initialized {
            debug!(conn_id, "write while not initialized, ignoring");
            return;
        }
        if st.char_handle != Some(handle) {
            debug!(conn_id, handle, "write for another attribute, ignoring");
            return;
        }
        let Some(gatt_if) = st.gatt_if else {
            warn!(conn_id, "write before app registration, dropping");
            return;
        };
        (gatt_if, st.generation)
    };
    let respond = |status: WriteStatus| {
        if !need_rsp {
            return;
        }
        if let Err(err) = shared.host.send_response(gatt_if, conn_id, trans_id, status) {
            error!(conn_id, trans_id, ?status, code = err.code, "write response failed");
        }
    };

    if value.is_empty() || value.len() > MAX_FRAME_LEN {
        warn!(conn_id, len = value.len(), "write length out of bounds, dropping");
        respond(WriteStatus::InvalidLength);
        return;
    }
    let packet = match decode(value) {
        Ok(packet) => packet,
        Err(err) => {
            warn!(conn_id, len = value.len(), %err, "malformed frame, dropping");
            respond(WriteStatus::InvalidLength);
            return;
        }
    };

    let handler = cell.borrow_mut().handler.take();
    let Some(handler) = handler else {
        warn!(conn_id, "no inbound handler set, dropping packet");
        respond(WriteStatus::Unlikely);
        return;
    };

    debug!(conn_id, id = packet.id, len = packet.payload.len(), "packet received");
    {
        let mut slot = HandlerSlot {
            cell,
            handler: Some(handler),
            generation,
        };
        if let Some(handler) = slot.handler.as_mut() {
            handler.on_packet(
                Inbound {
                    shared: Arc::downgrade(shared),
                    conn_id,
                },
                packet,
            );
        }
    }
    respond(WriteStatus::Success);
}

/// Holds the inbound handler while it runs and hands it back to the state
/// when dropped, unwinding included.
struct HandlerSlot<'a> {
    cell: &'a RefCell<State>,
    handler: Option<Box<dyn InboundHandler>>,
    generation: u64,
}

impl Drop for HandlerSlot<'_> {
    fn drop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        let mut st = self.cell.borrow_mut();
        if st.generation == self.generation && st.initialized && st.handler.is_none() {
            st.handler = Some(handler);
            return;
        }
        drop(st);
        debug!("transport torn down during delivery, releasing handler");
        drop(handler);
    }
}

fn on_mtu_changed(cell: &RefCell<State>, conn_id: u16, mtu: u16) {
    let mut st = cell.borrow_mut();
    if !st.initialized {
        return;
    }
    let clamped = mtu.min(MAX_FRAME_LEN as u16);
    if clamped != mtu {
        debug!(conn_id, reported = mtu, clamped, "clamping mtu");
    }
    st.mtu = clamped;
    info!(conn_id, mtu = clamped, "mtu updated");
}

fn on_advertising_status(op: AdvOperation, status: HostResult) {
    match status {
        Ok(()) => debug!(?op, "advertising status"),
        Err(err) => error!(?op, code = err.code, "advertising operation failed"),
    }
}
