//! Role-group fan-out — the transport's room primitive.
//!
//! All live connections are indexed by handle; the `producers` and
//! `consumers` groups are role filters over that index. Broadcasts serialize
//! once and iterate a read-locked snapshot, so each recipient sees a coherent
//! frame; inter-recipient ordering is not promised.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use beacon_core::ids::ConnectionId;
use beacon_core::protocol::{Role, ServerEvent};

use super::connection::ClientConnection;
use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Live connections and the role groups over them.
#[derive(Default)]
pub struct RoleGroups {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl RoleGroups {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id.clone(), connection);
    }

    /// Remove a connection by handle.
    pub async fn remove(&self, connection_id: &ConnectionId) {
        let mut conns = self.connections.write().await;
        let _ = conns.remove(connection_id);
    }

    /// Look up a live connection by handle.
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(connection_id).cloned()
    }

    /// Broadcast an event to every connection in `role`'s group.
    pub async fn broadcast_role(&self, role: Role, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                warn!(event = event.kind(), error = %e, "failed to serialize broadcast");
                return;
            }
        };
        let conns = self.connections.read().await;
        let mut recipients = 0usize;
        for conn in conns.values().filter(|c| c.role == role) {
            recipients += 1;
            if !conn.send_raw(json.clone()) {
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                warn!(connection = %conn.id, client_id = %conn.client_id, "broadcast frame dropped");
            }
        }
        debug!(event = event.kind(), role = %role, recipients, "broadcast");
    }

    /// Directed send to one connection handle. Returns `false` when the
    /// handle is gone or its channel rejected the frame.
    pub async fn send_to(&self, connection_id: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(conn) = self.get(connection_id).await else {
            return false;
        };
        let delivered = conn.send_event(event);
        if !delivered {
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
        }
        delivered
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of live connections in one role group.
    pub async fn count_role(&self, role: Role) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.role == role)
            .count()
    }
}
