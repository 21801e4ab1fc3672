//! Connection lifecycle — one authenticated client from upgrade through
//! disconnect cleanup.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use beacon_auth::Identity;
use beacon_core::ids::ConnectionId;
use beacon_core::protocol::ServerEvent;
use beacon_core::time;

use super::connection::ClientConnection;
use super::dispatch;
use crate::context::BrokerContext;
use crate::controller;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Outbound channel depth per connection. Signaling frames are small; a
/// reader this far behind is effectively gone.
const SEND_QUEUE_DEPTH: usize = 256;

/// Protocol-level Ping cadence from the writer task.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection with no inbound frame or Pong for this long is closed.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Run one WebSocket connection to completion.
///
/// 1. Pushes `connection-established` with the authenticated identity
/// 2. Forwards outbound frames from the bounded channel to the socket
/// 3. Routes inbound frames through the dispatcher, in arrival order
/// 4. Runs the disconnect cascade and leaves the groups on exit
#[instrument(skip_all, fields(client_id = %identity.client_id, role = %identity.role))]
pub async fn run_connection(ws: WebSocket, identity: Identity, ctx: Arc<BrokerContext>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let connection_id = ConnectionId::generate();
    let (send_tx, mut send_rx) = mpsc::channel::<String>(SEND_QUEUE_DEPTH);
    let conn = Arc::new(ClientConnection::new(
        connection_id.clone(),
        identity.client_id,
        identity.role,
        send_tx,
    ));

    counter!(WS_CONNECTIONS_TOTAL, "role" => conn.role.as_str()).increment(1);
    info!(connection = %connection_id, "client connected");
    ctx.groups.add(conn.clone()).await;

    // Greet with the pinned identity so the client knows what it
    // authenticated as.
    let hello = ServerEvent::ConnectionEstablished {
        client_id: conn.client_id.clone(),
        role: conn.role,
        timestamp: time::now_rfc3339(),
    };
    if let Ok(json) = serde_json::to_string(&hello) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound writer: drains the bounded channel onto the socket and pings
    // on a fixed cadence so quiet clients still show liveness via Pong.
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        ping_interval.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                frame = send_rx.recv() => match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop: one frame at a time, in arrival order. A liveness check
    // closes connections that stopped answering pings.
    let mut liveness_check = tokio::time::interval(CONNECTION_TIMEOUT);
    liveness_check.tick().await;
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(_)) | None => break,
            },
            _ = liveness_check.tick() => {
                if conn.check_alive() {
                    continue;
                }
                info!(connection = %connection_id, "connection unresponsive, closing");
                break;
            }
        };

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            // Tolerate UTF-8 JSON arriving in binary frames.
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_owned()),
                Err(_) => {
                    debug!(connection = %connection_id, len = data.len(), "ignoring non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                debug!(connection = %connection_id, "client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                conn.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };
        conn.mark_alive();
        dispatch::handle_text(&ctx, &conn, &text).await;
    }

    // Disconnect: cascade first, then leave the groups so late broadcasts
    // in the cascade can still reach other recipients.
    info!(connection = %connection_id, dropped = conn.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "role" => conn.role.as_str()).increment(1);
    writer.abort();
    controller::handle_disconnect(&ctx, &conn).await;
    ctx.groups.remove(&connection_id).await;
}
