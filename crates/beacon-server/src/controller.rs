//! Connection controller — validates, arbitrates, forwards, and cleans up.
//!
//! Every inbound event lands here after parsing. Handlers return
//! `Result<(), BrokerError>`; the dispatcher reports an `Err` to the sender
//! only, never to peers. Cleanup paths are best-effort: each step is an
//! independent single-key operation, so one miss cannot block the rest.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use beacon_core::errors::BrokerError;
use beacon_core::ids::ClientId;
use beacon_core::protocol::{
    ClientEvent, CrewKind, OfflineReason, OnlineProducer, Role, ServerEvent, SessionEndReason,
    SignalKind,
};
use beacon_core::time;

use crate::context::BrokerContext;
use crate::metrics::{
    CREW_EVENTS_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL, RATE_LIMITED_TOTAL, REGISTRATIONS_TOTAL,
    SESSIONS_ENDED_TOTAL, SESSIONS_STARTED_TOTAL, SIGNALS_FORWARDED_TOTAL,
};
use crate::websocket::connection::ClientConnection;

/// Route one parsed event to its handler.
pub async fn dispatch(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
    event: ClientEvent,
) -> Result<(), BrokerError> {
    // Registration is the only thing an unregistered connection may do.
    if !conn.is_registered()
        && !matches!(event, ClientEvent::RegisterProducer | ClientEvent::RegisterConsumer)
    {
        return Err(BrokerError::NotRegistered);
    }

    match event {
        ClientEvent::RegisterProducer => register_producer(ctx, conn).await,
        ClientEvent::RegisterConsumer => register_consumer(ctx, conn).await,
        ClientEvent::StartMonitoring { producer_id } => {
            start_monitoring(ctx, conn, &producer_id).await
        }
        ClientEvent::StopMonitoring { producer_id } => {
            stop_monitoring(ctx, conn, &producer_id)
        }
        ClientEvent::Offer { target_id, offer } => {
            forward_signal(ctx, conn, SignalKind::Offer, &target_id, offer).await
        }
        ClientEvent::Answer { target_id, answer } => {
            forward_signal(ctx, conn, SignalKind::Answer, &target_id, answer).await
        }
        ClientEvent::IceCandidate { target_id, candidate } => {
            forward_signal(ctx, conn, SignalKind::IceCandidate, &target_id, candidate).await
        }
        ClientEvent::HeartbeatPing => heartbeat(ctx, conn),
        ClientEvent::CrewSignOn { employee_id, name, timestamp, .. } => {
            crew_event(ctx, conn, CrewKind::SignOn, &employee_id, &name, timestamp).await
        }
        ClientEvent::CrewSignOff { employee_id, name, timestamp, .. } => {
            crew_event(ctx, conn, CrewKind::SignOff, &employee_id, &name, timestamp).await
        }
    }
}

fn require_role(conn: &ClientConnection, role: Role) -> Result<(), BrokerError> {
    if conn.role == role {
        Ok(())
    } else {
        Err(BrokerError::NotAllowed {
            message: format!("operation requires the {role} role"),
        })
    }
}

// ── Registration ────────────────────────────────────────────────────

#[instrument(skip_all, fields(client_id = %conn.client_id))]
async fn register_producer(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
) -> Result<(), BrokerError> {
    if conn.role != Role::Producer {
        return Err(BrokerError::InvalidRole {
            event: "register-producer".into(),
            role: conn.role.to_string(),
        });
    }

    let _ = ctx.presence.register_producer(&conn.client_id, &conn.id)?;
    conn.mark_registered();
    counter!(REGISTRATIONS_TOTAL, "role" => "producer").increment(1);
    info!(producer_id = %conn.client_id, "producer online");

    ctx.groups
        .broadcast_role(
            Role::Consumer,
            &ServerEvent::ProducerOnline {
                producer_id: conn.client_id.clone(),
                timestamp: time::now_rfc3339(),
            },
        )
        .await;

    let _ = conn.send_event(&ServerEvent::ProducerRegistered {
        producer_id: conn.client_id.clone(),
        timestamp: time::now_rfc3339(),
    });
    Ok(())
}

#[instrument(skip_all, fields(client_id = %conn.client_id))]
async fn register_consumer(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
) -> Result<(), BrokerError> {
    if conn.role != Role::Consumer {
        return Err(BrokerError::InvalidRole {
            event: "register-consumer".into(),
            role: conn.role.to_string(),
        });
    }

    let _ = ctx.presence.register_consumer(&conn.client_id, &conn.id)?;
    conn.mark_registered();
    counter!(REGISTRATIONS_TOTAL, "role" => "consumer").increment(1);

    let mut online_producers: Vec<OnlineProducer> = ctx
        .presence
        .list_online_producers()
        .into_iter()
        .map(|entry| OnlineProducer {
            producer_id: entry.client_id,
            connected_at: entry
                .registered_at
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        })
        .collect();
    online_producers.sort_by(|a, b| a.producer_id.as_str().cmp(b.producer_id.as_str()));

    info!(consumer_id = %conn.client_id, online = online_producers.len(), "consumer online");
    let _ = conn.send_event(&ServerEvent::ConsumerRegistered {
        consumer_id: conn.client_id.clone(),
        online_producers,
        timestamp: time::now_rfc3339(),
    });
    Ok(())
}

// ── Monitoring sessions ─────────────────────────────────────────────

#[instrument(skip_all, fields(consumer_id = %conn.client_id, producer_id))]
async fn start_monitoring(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
    producer_id: &str,
) -> Result<(), BrokerError> {
    require_role(conn, Role::Consumer)?;
    if producer_id.is_empty() {
        return Err(BrokerError::InvalidRequest {
            message: "producerId is required".into(),
        });
    }

    let producer = ClientId::from(producer_id);
    if !ctx.presence.is_producer_online(&producer) {
        return Err(BrokerError::ProducerOffline { producer_id: producer_id.to_owned() });
    }

    match ctx.sessions.create(&producer, &conn.client_id, &conn.id) {
        Ok(session) => {
            counter!(SESSIONS_STARTED_TOTAL).increment(1);
            info!(consumer_id = %conn.client_id, producer_id, "monitoring started");
            let _ = conn.send_event(&ServerEvent::MonitoringStarted {
                producer_id: producer.clone(),
                session_id: producer,
                started_at: Some(
                    session.started_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                ),
                timestamp: time::now_rfc3339(),
            });
            Ok(())
        }
        // Re-start by the same connection is an activity refresh plus
        // confirmation, not an error.
        Err(existing) if existing.existing_consumer_connection == conn.id => {
            let _ = ctx.sessions.refresh_activity(&producer);
            debug!(consumer_id = %conn.client_id, producer_id, "monitoring re-confirmed");
            let _ = conn.send_event(&ServerEvent::MonitoringStarted {
                producer_id: producer.clone(),
                session_id: producer,
                started_at: None,
                timestamp: time::now_rfc3339(),
            });
            Ok(())
        }
        Err(existing) => Err(existing.into()),
    }
}

#[instrument(skip_all, fields(consumer_id = %conn.client_id, producer_id))]
fn stop_monitoring(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
    producer_id: &str,
) -> Result<(), BrokerError> {
    require_role(conn, Role::Consumer)?;
    if producer_id.is_empty() {
        return Err(BrokerError::InvalidRequest {
            message: "producerId is required".into(),
        });
    }

    let producer = ClientId::from(producer_id);
    if !ctx.sessions.has_active(&producer) {
        return Err(BrokerError::SessionNotFound { producer_id: producer_id.to_owned() });
    }
    if !ctx.sessions.validate_ownership(&producer, &conn.id) {
        return Err(BrokerError::SessionNotAuthorized { producer_id: producer_id.to_owned() });
    }

    if ctx.sessions.end(&producer).is_none() {
        // Lost a race with a concurrent cleanup.
        return Err(BrokerError::SessionNotFound { producer_id: producer_id.to_owned() });
    }
    counter!(SESSIONS_ENDED_TOTAL, "reason" => "stopped").increment(1);
    info!(consumer_id = %conn.client_id, producer_id, "monitoring stopped");

    // No broadcast: the producer observes peer-connection closure directly.
    let _ = conn.send_event(&ServerEvent::MonitoringStopped {
        producer_id: producer,
        timestamp: time::now_rfc3339(),
    });
    Ok(())
}

// ── Signaling forwarding ────────────────────────────────────────────

#[instrument(skip_all, fields(from = %conn.client_id, kind = kind.as_str(), target_id))]
async fn forward_signal(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
    kind: SignalKind,
    target_id: &str,
    payload: Option<Value>,
) -> Result<(), BrokerError> {
    // 1. Shape.
    let Some(payload) = payload else {
        return Err(BrokerError::SignalingMissingData {
            message: format!("'{}' payload is required", kind.as_str()),
        });
    };
    if target_id.is_empty() {
        return Err(BrokerError::SignalingMissingData {
            message: "targetId is required".into(),
        });
    }

    // 2. Rate limit.
    let decision = ctx.rate.check(&conn.client_id, kind.as_str());
    if !decision.allowed {
        counter!(RATE_LIMITED_TOTAL, "kind" => kind.as_str()).increment(1);
        return Err(BrokerError::RateLimited {
            kind: kind.as_str().into(),
            current: decision.current,
            limit: decision.limit,
            reset_at_ms: decision.reset_at_ms,
        });
    }

    // 3. Target lookup: producer registry first, then consumer.
    let target = ClientId::from(target_id);
    let (target_entry, target_role) = match ctx.presence.lookup_producer(&target) {
        Some(entry) => (entry, Role::Producer),
        None => match ctx.presence.lookup_consumer(&target) {
            Some(entry) => (entry, Role::Consumer),
            None => {
                return Err(BrokerError::SignalingInvalidTarget {
                    target_id: target_id.to_owned(),
                })
            }
        },
    };

    // 4. Pairing: signaling only crosses the producer/consumer edge.
    if target_role != conn.role.opposite() {
        return Err(BrokerError::SignalingInvalidPairing { role: conn.role.to_string() });
    }

    // 5. Session derivation.
    let producer_id = match conn.role {
        Role::Producer => conn.client_id.clone(),
        Role::Consumer => target.clone(),
    };
    let Some(session) = ctx.sessions.get(&producer_id) else {
        return Err(BrokerError::SignalingNoSession {
            producer_id: producer_id.into_inner(),
        });
    };

    // 6. Ownership: the sender must be an endpoint of that session.
    let authorized = match conn.role {
        Role::Consumer => session.consumer_connection == conn.id,
        Role::Producer => session.producer_id == conn.client_id && session.consumer_id == target,
    };
    if !authorized {
        return Err(BrokerError::SignalingUnauthorizedSender {
            producer_id: producer_id.into_inner(),
        });
    }

    // 7. Activity watermark.
    let _ = ctx.sessions.refresh_activity(&producer_id);

    // 8. Deliver to the target's current connection, with the authenticated
    //    sender id. The handle may have vanished since step 3.
    let from_id = conn.client_id.clone();
    let event = match kind {
        SignalKind::Offer => ServerEvent::Offer { from_id, offer: payload },
        SignalKind::Answer => ServerEvent::Answer { from_id, answer: payload },
        SignalKind::IceCandidate => ServerEvent::IceCandidate { from_id, candidate: payload },
    };
    if !ctx.groups.send_to(&target_entry.connection, &event).await {
        return Err(BrokerError::SignalingInvalidTarget { target_id: target_id.to_owned() });
    }

    counter!(SIGNALS_FORWARDED_TOTAL, "kind" => kind.as_str()).increment(1);
    debug!(to = %target, "signal forwarded");
    Ok(())
}

// ── Heartbeat ───────────────────────────────────────────────────────

fn heartbeat(ctx: &BrokerContext, conn: &Arc<ClientConnection>) -> Result<(), BrokerError> {
    require_role(conn, Role::Producer)?;
    let _ = ctx.liveness.record_ping(&conn.client_id);
    ctx.presence.refresh_producer(&conn.client_id);
    let _ = conn.send_event(&ServerEvent::HeartbeatPong { timestamp: time::now_rfc3339() });
    Ok(())
}

// ── Crew events ─────────────────────────────────────────────────────

#[instrument(skip_all, fields(producer_id = %conn.client_id, kind = kind.as_str()))]
async fn crew_event(
    ctx: &BrokerContext,
    conn: &Arc<ClientConnection>,
    kind: CrewKind,
    employee_id: &str,
    name: &str,
    timestamp: Option<String>,
) -> Result<(), BrokerError> {
    if conn.role != Role::Producer {
        return Err(BrokerError::CrewUnauthorized);
    }
    if employee_id.is_empty() || name.is_empty() {
        return Err(BrokerError::CrewInvalidPayload {
            message: "employeeId and name are required".into(),
        });
    }

    let decision = ctx.rate.check(&conn.client_id, kind.as_str());
    if !decision.allowed {
        counter!(RATE_LIMITED_TOTAL, "kind" => kind.as_str()).increment(1);
        return Err(BrokerError::RateLimited {
            kind: kind.as_str().into(),
            current: decision.current,
            limit: decision.limit,
            reset_at_ms: decision.reset_at_ms,
        });
    }

    // Attribution is authoritative: whatever producerId the payload claimed,
    // the broadcast carries the authenticated sender.
    let timestamp = timestamp.unwrap_or_else(time::now_rfc3339);
    let broadcast = match kind {
        CrewKind::SignOn => ServerEvent::CrewSignOn {
            employee_id: employee_id.to_owned(),
            name: name.to_owned(),
            timestamp: timestamp.clone(),
            producer_id: conn.client_id.clone(),
            event_type: kind,
        },
        CrewKind::SignOff => ServerEvent::CrewSignOff {
            employee_id: employee_id.to_owned(),
            name: name.to_owned(),
            timestamp: timestamp.clone(),
            producer_id: conn.client_id.clone(),
            event_type: kind,
        },
    };
    ctx.groups.broadcast_role(Role::Consumer, &broadcast).await;
    counter!(CREW_EVENTS_TOTAL, "kind" => kind.as_str()).increment(1);
    info!(employee_id, "crew event broadcast");

    let ack = match kind {
        CrewKind::SignOn => ServerEvent::CrewSignOnAck {
            employee_id: employee_id.to_owned(),
            timestamp: time::now_rfc3339(),
        },
        CrewKind::SignOff => ServerEvent::CrewSignOffAck {
            employee_id: employee_id.to_owned(),
            timestamp: time::now_rfc3339(),
        },
    };
    let _ = conn.send_event(&ack);
    Ok(())
}

// ── Disconnect cascades ─────────────────────────────────────────────

/// Tear down everything a closed connection owned. Best-effort and
/// idempotent: every step is an independent single-key operation and a
/// failure in one never blocks the next.
#[instrument(skip_all, fields(client_id = %conn.client_id, role = %conn.role))]
pub async fn handle_disconnect(ctx: &BrokerContext, conn: &Arc<ClientConnection>) {
    match conn.role {
        Role::Producer => producer_disconnect(ctx, conn).await,
        Role::Consumer => consumer_disconnect(ctx, conn).await,
    }
}

async fn producer_disconnect(ctx: &BrokerContext, conn: &Arc<ClientConnection>) {
    // A reconnect may already have replaced this producer's entry
    // (last-writer-wins); cascade only while this connection still owns it.
    let owns_entry = ctx
        .presence
        .lookup_producer_by_connection(&conn.id)
        .is_some_and(|entry| entry.client_id == conn.client_id);
    if !owns_entry {
        debug!("producer entry already replaced, skipping cascade");
        return;
    }

    ctx.liveness.remove(&conn.client_id);
    ctx.presence.mark_producer_offline(&conn.client_id);
    let ended = ctx.sessions.end(&conn.client_id);

    ctx.groups
        .broadcast_role(
            Role::Consumer,
            &ServerEvent::ProducerOffline {
                producer_id: conn.client_id.clone(),
                reason: OfflineReason::Disconnect,
                timestamp: time::now_rfc3339(),
            },
        )
        .await;

    if let Some(session) = ended {
        counter!(SESSIONS_ENDED_TOTAL, "reason" => "producer-disconnect").increment(1);
        ctx.groups
            .broadcast_role(
                Role::Consumer,
                &ServerEvent::SessionEnded {
                    producer_id: session.producer_id,
                    consumer_id: session.consumer_id,
                    reason: SessionEndReason::ProducerDisconnect,
                    timestamp: time::now_rfc3339(),
                },
            )
            .await;
    }

    let _ = ctx.presence.remove_producer(&conn.client_id);
    ctx.rate.reset_all(&conn.client_id);
    info!(producer_id = %conn.client_id, "producer disconnected");
}

async fn consumer_disconnect(ctx: &BrokerContext, conn: &Arc<ClientConnection>) {
    // Sessions are keyed by this exact connection handle, so this is safe
    // even when the consumer has already re-registered elsewhere.
    let ended = ctx.sessions.end_by_consumer_connection(&conn.id);
    for session in &ended {
        counter!(SESSIONS_ENDED_TOTAL, "reason" => "consumer-disconnect").increment(1);
        ctx.groups
            .broadcast_role(
                Role::Consumer,
                &ServerEvent::SessionEnded {
                    producer_id: session.producer_id.clone(),
                    consumer_id: session.consumer_id.clone(),
                    reason: SessionEndReason::ConsumerDisconnect,
                    timestamp: time::now_rfc3339(),
                },
            )
            .await;
    }

    let owns_entry = ctx
        .presence
        .lookup_consumer_by_connection(&conn.id)
        .is_some_and(|entry| entry.client_id == conn.client_id);
    if owns_entry {
        let _ = ctx.presence.remove_consumer(&conn.client_id);
        ctx.rate.reset_all(&conn.client_id);
    }
    info!(consumer_id = %conn.client_id, sessions_ended = ended.len(), "consumer disconnected");
}

/// Expire producers whose heartbeat went silent. Called from the periodic
/// scan task; returns how many producers were flipped offline.
pub async fn expire_silent_producers(ctx: &BrokerContext, now_ms: i64) -> usize {
    let mut flipped = 0usize;
    for producer_id in ctx.liveness.scan_expired(now_ms, ctx.config.heartbeat_timeout_ms) {
        // Only producers still marked online get announced; the guard keeps a
        // lingering watermark from re-firing every scan.
        if !ctx.presence.is_producer_online(&producer_id) {
            continue;
        }
        flipped += 1;
        counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        warn!(producer_id = %producer_id, "producer heartbeat timed out");

        ctx.presence.mark_producer_offline(&producer_id);
        let ended = ctx.sessions.end(&producer_id);

        ctx.groups
            .broadcast_role(
                Role::Consumer,
                &ServerEvent::ProducerOffline {
                    producer_id: producer_id.clone(),
                    reason: OfflineReason::HeartbeatTimeout,
                    timestamp: time::now_rfc3339(),
                },
            )
            .await;

        if let Some(session) = ended {
            counter!(SESSIONS_ENDED_TOTAL, "reason" => "producer-timeout").increment(1);
            ctx.groups
                .broadcast_role(
                    Role::Consumer,
                    &ServerEvent::SessionEnded {
                        producer_id: session.producer_id,
                        consumer_id: session.consumer_id,
                        reason: SessionEndReason::ProducerTimeout,
                        timestamp: time::now_rfc3339(),
                    },
                )
                .await;
        }
    }
    flipped
}

/// End sessions idle past the configured inactivity threshold. Returns how
/// many sessions were ended.
pub async fn expire_idle_sessions(ctx: &BrokerContext, now_ms: i64) -> usize {
    let mut ended_count = 0usize;
    for idle in ctx.sessions.scan_timed_out(now_ms, ctx.config.session_timeout_ms) {
        let Some(session) = ctx.sessions.end(&idle.producer_id) else {
            continue; // ended by someone else between scan and now
        };
        ended_count += 1;
        counter!(SESSIONS_ENDED_TOTAL, "reason" => "session-timeout").increment(1);
        info!(producer_id = %session.producer_id, consumer_id = %session.consumer_id, "session timed out");

        ctx.groups
            .broadcast_role(
                Role::Consumer,
                &ServerEvent::SessionEnded {
                    producer_id: session.producer_id.clone(),
                    consumer_id: session.consumer_id.clone(),
                    reason: SessionEndReason::SessionTimeout,
                    timestamp: time::now_rfc3339(),
                },
            )
            .await;

        // Direct notice to the owning consumer, if its connection survives.
        let _ = ctx
            .groups
            .send_to(
                &session.consumer_connection,
                &ServerEvent::SessionTimeout {
                    producer_id: session.producer_id,
                    timestamp: time::now_rfc3339(),
                },
            )
            .await;
    }
    ended_count
}
