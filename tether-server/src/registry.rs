//! Concurrency-safe registry of live connections.

use crate::connection::{Connection, ConnectionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps connection identities to live connections.
///
/// The registry does not track liveness itself: a connection may reach
/// `Closed` while still present, until its close callback removes it.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a connection, replacing any previous entry with the same id.
    pub fn add(&self, conn: Arc<Connection>) {
        let count = {
            let mut connections = self.connections.write();
            connections.insert(conn.id(), Arc::clone(&conn));
            connections.len()
        };
        tracing::info!(conn = %conn.id(), total = count, "connection added");
    }

    /// Removes a connection, returning whether it was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        if removed {
            tracing::info!(conn = %id, total = count, "connection removed");
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Returns a point-in-time copy of all current connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Sends a message to every connection in a snapshot.
    ///
    /// One connection's failure does not abort delivery to the rest.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, discriminator: u32, payload: &[u8]) -> usize {
        let targets = self.snapshot();
        let mut delivered = 0;
        for conn in targets {
            if conn.send(discriminator, payload).await {
                delivered += 1;
            } else {
                tracing::debug!(conn = %conn.id(), "broadcast delivery failed");
            }
        }
        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
