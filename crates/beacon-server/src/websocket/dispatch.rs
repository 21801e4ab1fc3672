//! Inbound frame handling — parses text as a `ClientEvent` and routes it
//! through the controller. Failures go back to the sender only.

use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use beacon_core::errors::BrokerError;
use beacon_core::protocol::ClientEvent;

use super::connection::ClientConnection;
use crate::context::BrokerContext;
use crate::controller;
use crate::metrics::CLIENT_ERRORS_TOTAL;

/// Handle one inbound text frame.
pub async fn handle_text(ctx: &BrokerContext, conn: &Arc<ClientConnection>, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(connection = %conn.id, error = %e, "unparseable frame");
            report(
                conn,
                &BrokerError::InvalidRequest { message: format!("unrecognized event: {e}") },
            );
            return;
        }
    };

    let kind = event.kind();
    if let Err(err) = controller::dispatch(ctx, conn, event).await {
        debug!(
            connection = %conn.id,
            client_id = %conn.client_id,
            event = kind,
            code = err.code(),
            "event rejected"
        );
        report(conn, &err);
    }
}

fn report(conn: &ClientConnection, err: &BrokerError) {
    counter!(CLIENT_ERRORS_TOTAL, "code" => err.code()).increment(1);
    let _ = conn.send_event(&err.to_event());
}
