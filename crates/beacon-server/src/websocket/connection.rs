//! Per-connection client state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use beacon_core::ids::{ClientId, ConnectionId};
use beacon_core::protocol::{Role, ServerEvent};

/// A connected client.
///
/// Identity and role come from the verified handshake token and never change
/// for the lifetime of the connection. Outbound traffic goes through a
/// bounded channel drained by the socket writer task; a full channel counts a
/// drop rather than blocking the sender, so state mutation never waits on
/// transport backpressure.
pub struct ClientConnection {
    /// Transport-assigned connection handle.
    pub id: ConnectionId,
    /// Authenticated client identity.
    pub client_id: ClientId,
    /// Authenticated role.
    pub role: Role,
    /// Send channel to this connection's socket writer task.
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Set once `register-<role>` succeeds.
    registered: AtomicBool,
    /// Whether the client has shown liveness since the last check.
    pub is_alive: AtomicBool,
    /// Messages dropped because the channel was full or closed.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, client_id: ClientId, role: Role, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            client_id,
            role,
            tx,
            connected_at: Instant::now(),
            registered: AtomicBool::new(false),
            is_alive: AtomicBool::new(true),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a raw text frame. Returns `false` (and counts a drop) when the
    /// channel is full or closed.
    pub fn send_raw(&self, message: String) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and enqueue an event.
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(json) => self.send_raw(json),
            Err(e) => {
                warn!(connection = %self.id, event = event.kind(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Mark the `register-<role>` handshake as completed.
    pub fn mark_registered(&self) {
        self.registered.store(true, Ordering::Relaxed);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Relaxed)
    }

    /// Record liveness (protocol Pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the liveness flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
