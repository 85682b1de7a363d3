use tracing::{debug, warn};

use crate::error::TransportError;
use crate::host::PeerAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub conn_id: u16,
    pub peer: PeerAddress,
}

/// Currently connected centrals, in connect order.
///
/// Connection ids are unique: a repeated connect for a known id replaces
/// the stored peer address instead of adding a second entry.
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&mut self, conn_id: u16, peer: PeerAddress) {
        if let Some(existing) = self.connections.iter_mut().find(|c| c.conn_id == conn_id) {
            warn!(conn_id, old = %existing.peer, new = %peer, "duplicate connect, replacing peer");
            existing.peer = peer;
            return;
        }
        self.connections.push(Connection { conn_id, peer });
    }

    /// Removes the connection with `conn_id`. Unknown ids are tolerated.
    pub fn on_disconnect(&mut self, conn_id: u16) -> Option<Connection> {
        match self.connections.iter().position(|c| c.conn_id == conn_id) {
            Some(index) => Some(self.connections.remove(index)),
            None => {
                debug!(conn_id, "disconnect for unknown connection");
                None
            }
        }
    }

    pub fn count(&self) -> u8 {
        u8::try_from(self.connections.len()).unwrap_or(u8::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn find(&self, conn_id: u16) -> Result<&Connection, TransportError> {
        self.connections
            .iter()
            .find(|c| c.conn_id == conn_id)
            .ok_or(TransportError::ConnectionNotFound(conn_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> PeerAddress {
        PeerAddress([0x10, 0x20, 0x30, 0x40, 0x50, last])
    }

    #[test]
    fn connect_disconnect_updates_count_and_lookup() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect(5, addr(1));
        registry.on_connect(7, addr(2));
        assert_eq!(registry.count(), 2);

        let removed = registry.on_disconnect(5).expect("5 was connected");
        assert_eq!(removed.peer, addr(1));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.find(5), Err(TransportError::ConnectionNotFound(5)));
        assert_eq!(registry.find(7).expect("7 still connected").peer, addr(2));
    }

    #[test]
    fn unknown_disconnect_is_a_no_op() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect(1, addr(1));
        assert!(registry.on_disconnect(999).is_none());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn duplicate_connect_keeps_ids_unique() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connect(3, addr(1));
        registry.on_connect(3, addr(9));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.find(3).expect("present").peer, addr(9));
    }

    #[test]
    fn iteration_preserves_connect_order() {
        let mut registry = ConnectionRegistry::new();
        for id in [4, 2, 8] {
            registry.on_connect(id, addr(id as u8));
        }
        let ids: Vec<u16> = registry.iter().map(|c| c.conn_id).collect();
        assert_eq!(ids, vec![4, 2, 8]);
        registry.clear();
        assert!(registry.is_empty());
    }
}
