//! End-to-end tests driving real WebSocket clients against a bound server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use beacon_broker::rate_limit::RateCeilings;
use beacon_core::protocol::Role;
use beacon_server::config::ServerConfig;
use beacon_server::server::BeaconServer;

const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-test-secret";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server and return its base WS URL + the server handle.
async fn boot_server(mut config: ServerConfig) -> (String, Arc<BeaconServer>) {
    config.auth_secret = SECRET.into();
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
    let server = Arc::new(BeaconServer::new(config, metrics_handle));
    server.start_scans();
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

fn token_for(client_id: &str, role: Role) -> String {
    beacon_auth::mint(SECRET, client_id, role, 300).unwrap()
}

/// Connect and consume the `connection-established` greeting.
async fn connect_client(base_url: &str, client_id: &str, role: Role) -> WsStream {
    let url = format!("{base_url}?token={}", token_for(client_id, role));
    let (mut ws, _) = connect_async(url).await.expect("connect failed");
    let hello = recv_event(&mut ws).await;
    assert_eq!(hello["type"], "connection-established");
    assert_eq!(hello["clientId"], client_id);
    ws
}

async fn send_event(ws: &mut WsStream, event: Value) {
    ws.send(Message::Text(event.to_string().into())).await.unwrap();
}

/// Receive the next text frame as JSON.
async fn recv_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Receive events until one matches `event_type` (tolerates interleaved
/// broadcasts), failing on overall timeout.
async fn recv_until(ws: &mut WsStream, event_type: &str) -> Value {
    for _ in 0..32 {
        let event = recv_event(ws).await;
        if event["type"] == event_type {
            return event;
        }
    }
    panic!("never received '{event_type}'");
}

/// Assert no text frame arrives within `window`.
async fn expect_silence(ws: &mut WsStream, window: Duration) {
    let result = timeout(window, ws.next()).await;
    assert!(result.is_err(), "expected silence, got: {:?}", result.unwrap());
}

async fn register_producer(ws: &mut WsStream) {
    send_event(ws, json!({"type": "register-producer"})).await;
    let _ = recv_until(ws, "producer-registered").await;
}

async fn register_consumer(ws: &mut WsStream) -> Value {
    send_event(ws, json!({"type": "register-consumer"})).await;
    recv_until(ws, "consumer-registered").await
}

async fn start_monitoring(ws: &mut WsStream, producer_id: &str) {
    send_event(ws, json!({"type": "start-monitoring", "producerId": producer_id})).await;
    let started = recv_until(ws, "monitoring-started").await;
    assert_eq!(started["producerId"], producer_id);
}

// ── Authentication ──────────────────────────────────────────────────

#[tokio::test]
async fn connect_without_token_fails() {
    let (url, _server) = boot_server(ServerConfig::default()).await;
    let result = connect_async(url).await;
    assert!(result.is_err(), "unauthenticated connect must be rejected");
}

#[tokio::test]
async fn connect_with_invalid_token_fails() {
    let (url, _server) = boot_server(ServerConfig::default()).await;
    let result = connect_async(format!("{url}?token=bogus")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn connect_with_valid_token_gets_greeting() {
    let (url, _server) = boot_server(ServerConfig::default()).await;
    let _ws = connect_client(&url, "kiosk-1", Role::Producer).await;
}

// ── Scenario 1: happy path signaling ────────────────────────────────

#[tokio::test]
async fn happy_path_signaling() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let registered = register_consumer(&mut consumer).await;
    let online = registered["onlineProducers"].as_array().unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["producerId"], "P");

    start_monitoring(&mut consumer, "P").await;

    // C → P offer
    send_event(&mut consumer, json!({"type": "offer", "targetId": "P", "offer": "O"})).await;
    let offer = recv_until(&mut producer, "offer").await;
    assert_eq!(offer["fromId"], "C");
    assert_eq!(offer["offer"], "O");

    // P → C answer
    send_event(&mut producer, json!({"type": "answer", "targetId": "C", "answer": "A"})).await;
    let answer = recv_until(&mut consumer, "answer").await;
    assert_eq!(answer["fromId"], "P");
    assert_eq!(answer["answer"], "A");

    // ICE both directions
    send_event(
        &mut consumer,
        json!({"type": "ice-candidate", "targetId": "P", "candidate": {"sdpMid": "0"}}),
    )
    .await;
    let to_producer = recv_until(&mut producer, "ice-candidate").await;
    assert_eq!(to_producer["fromId"], "C");
    assert_eq!(to_producer["candidate"]["sdpMid"], "0");

    send_event(
        &mut producer,
        json!({"type": "ice-candidate", "targetId": "C", "candidate": {"sdpMid": "1"}}),
    )
    .await;
    let to_consumer = recv_until(&mut consumer, "ice-candidate").await;
    assert_eq!(to_consumer["fromId"], "P");
}

// ── Scenario 2: exclusivity ─────────────────────────────────────────

#[tokio::test]
async fn second_consumer_cannot_claim_monitored_producer() {
    let (url, server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;

    let mut c1 = connect_client(&url, "C1", Role::Consumer).await;
    let _ = register_consumer(&mut c1).await;
    start_monitoring(&mut c1, "P").await;

    let mut c2 = connect_client(&url, "C2", Role::Consumer).await;
    let _ = register_consumer(&mut c2).await;
    send_event(&mut c2, json!({"type": "start-monitoring", "producerId": "P"})).await;
    let err = recv_until(&mut c2, "error").await;
    assert_eq!(err["code"], "SESSION_ALREADY_EXISTS");
    assert_eq!(err["details"]["existingConsumerId"], "C1");

    // No session mutated.
    let session = server.context().sessions.get(&"P".into()).unwrap();
    assert_eq!(session.consumer_id.as_str(), "C1");
}

// ── Scenario 3: unauthorized signaling ──────────────────────────────

#[tokio::test]
async fn signaling_without_session_is_rejected() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    send_event(&mut consumer, json!({"type": "offer", "targetId": "P", "offer": "O"})).await;
    let err = recv_until(&mut consumer, "error").await;
    assert_eq!(err["code"], "SIGNALING_NO_SESSION");

    // The producer must receive nothing.
    expect_silence(&mut producer, Duration::from_millis(300)).await;
}

// ── Scenario 4: heartbeat timeout ───────────────────────────────────

#[tokio::test]
async fn silent_producer_goes_offline_with_session_teardown() {
    let (url, _server) = boot_server(ServerConfig {
        heartbeat_timeout_ms: 600,
        scan_interval_ms: 100,
        ..ServerConfig::default()
    })
    .await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    send_event(&mut producer, json!({"type": "heartbeat-ping"})).await;
    let _ = recv_until(&mut producer, "heartbeat-pong").await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;
    start_monitoring(&mut consumer, "P").await;

    // Producer goes silent; the scan flips it offline.
    let offline = recv_until(&mut consumer, "producer-offline").await;
    assert_eq!(offline["producerId"], "P");
    assert_eq!(offline["reason"], "heartbeat-timeout");

    let ended = recv_until(&mut consumer, "session-ended").await;
    assert_eq!(ended["reason"], "producer-timeout");
    assert_eq!(ended["consumerId"], "C");
}

// ── Scenario 5: rate limiting ───────────────────────────────────────

#[tokio::test]
async fn eleventh_crew_event_is_rate_limited() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    for i in 0..10 {
        send_event(
            &mut producer,
            json!({"type": "crew-sign-on", "employeeId": format!("E{i}"), "name": "Dana"}),
        )
        .await;
        let ack = recv_until(&mut producer, "crew-sign-on-ack").await;
        assert_eq!(ack["employeeId"], format!("E{i}"));
        let broadcast = recv_until(&mut consumer, "crew-sign-on").await;
        assert_eq!(broadcast["employeeId"], format!("E{i}"));
    }

    send_event(
        &mut producer,
        json!({"type": "crew-sign-on", "employeeId": "E10", "name": "Dana"}),
    )
    .await;
    let err = recv_until(&mut producer, "error").await;
    assert_eq!(err["code"], "RATE_LIMIT_EXCEEDED");
    assert!(err["details"]["resetAt"].is_i64());
    assert_eq!(err["details"]["limit"], 10);

    // No broadcast for the rejected event.
    expect_silence(&mut consumer, Duration::from_millis(300)).await;
}

// ── Scenario 6: crew attribution override ───────────────────────────

#[tokio::test]
async fn crew_broadcast_carries_authenticated_producer_id() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "PRODUCER_A", Role::Producer).await;
    register_producer(&mut producer).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    send_event(
        &mut producer,
        json!({
            "type": "crew-sign-on",
            "employeeId": "E1",
            "name": "N",
            "producerId": "PRODUCER_B"
        }),
    )
    .await;

    let broadcast = recv_until(&mut consumer, "crew-sign-on").await;
    assert_eq!(broadcast["producerId"], "PRODUCER_A");
    assert_eq!(broadcast["eventType"], "crew-sign-on");
}

// ── Idempotence & replay ────────────────────────────────────────────

#[tokio::test]
async fn start_monitoring_twice_yields_one_session() {
    let (url, server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    start_monitoring(&mut consumer, "P").await;
    start_monitoring(&mut consumer, "P").await;

    assert_eq!(server.context().sessions.active_count(), 1);
}

#[tokio::test]
async fn stop_monitoring_twice_yields_not_found() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;
    start_monitoring(&mut consumer, "P").await;

    send_event(&mut consumer, json!({"type": "stop-monitoring", "producerId": "P"})).await;
    let stopped = recv_until(&mut consumer, "monitoring-stopped").await;
    assert_eq!(stopped["producerId"], "P");

    send_event(&mut consumer, json!({"type": "stop-monitoring", "producerId": "P"})).await;
    let err = recv_until(&mut consumer, "error").await;
    assert_eq!(err["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn reregistration_after_disconnect_rebroadcasts_online() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let online = recv_until(&mut consumer, "producer-online").await;
    assert_eq!(online["producerId"], "P");

    drop(producer);
    let offline = recv_until(&mut consumer, "producer-offline").await;
    assert_eq!(offline["reason"], "disconnect");

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let online_again = recv_until(&mut consumer, "producer-online").await;
    assert_eq!(online_again["producerId"], "P");
}

// ── Disconnect cascades ─────────────────────────────────────────────

#[tokio::test]
async fn producer_disconnect_notifies_consumers_and_ends_session() {
    let (url, server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;
    start_monitoring(&mut consumer, "P").await;

    drop(producer);

    let offline = recv_until(&mut consumer, "producer-offline").await;
    assert_eq!(offline["reason"], "disconnect");
    let ended = recv_until(&mut consumer, "session-ended").await;
    assert_eq!(ended["reason"], "producer-disconnect");
    assert_eq!(ended["producerId"], "P");

    // Every registry forgets the producer; allow the server a moment to run
    // the cascade.
    timeout(TIMEOUT, async {
        loop {
            if server.context().presence.lookup_producer(&"P".into()).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("producer entry should be removed");
    assert_eq!(server.context().sessions.active_count(), 0);
    assert!(server.context().liveness.last_ping(&"P".into()).is_none());
}

#[tokio::test]
async fn consumer_disconnect_ends_all_its_sessions() {
    let (url, server) = boot_server(ServerConfig::default()).await;

    let mut p1 = connect_client(&url, "P1", Role::Producer).await;
    register_producer(&mut p1).await;
    let mut p2 = connect_client(&url, "P2", Role::Producer).await;
    register_producer(&mut p2).await;

    let mut c1 = connect_client(&url, "C1", Role::Consumer).await;
    let _ = register_consumer(&mut c1).await;
    start_monitoring(&mut c1, "P1").await;
    start_monitoring(&mut c1, "P2").await;

    let mut observer = connect_client(&url, "C2", Role::Consumer).await;
    let _ = register_consumer(&mut observer).await;

    drop(c1);

    let first = recv_until(&mut observer, "session-ended").await;
    assert_eq!(first["reason"], "consumer-disconnect");
    let second = recv_until(&mut observer, "session-ended").await;
    assert_eq!(second["reason"], "consumer-disconnect");

    let mut producers: Vec<String> = vec![
        first["producerId"].as_str().unwrap().into(),
        second["producerId"].as_str().unwrap().into(),
    ];
    producers.sort();
    assert_eq!(producers, vec!["P1", "P2"]);
    assert_eq!(server.context().sessions.active_count(), 0);
}

// ── Session inactivity timeout ──────────────────────────────────────

#[tokio::test]
async fn idle_session_times_out() {
    let (url, _server) = boot_server(ServerConfig {
        session_timeout_ms: 300,
        scan_interval_ms: 100,
        // Keep the producer alive well past the session timeout.
        heartbeat_timeout_ms: 60_000,
        ..ServerConfig::default()
    })
    .await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;
    start_monitoring(&mut consumer, "P").await;

    // No signaling traffic: the broadcast and the direct notice both arrive.
    let ended = recv_until(&mut consumer, "session-ended").await;
    assert_eq!(ended["reason"], "session-timeout");
    let notice = recv_until(&mut consumer, "session-timeout").await;
    assert_eq!(notice["producerId"], "P");
}

// ── Role enforcement over the wire ──────────────────────────────────

#[tokio::test]
async fn consumer_cannot_heartbeat_or_emit_crew_events() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;

    send_event(&mut consumer, json!({"type": "heartbeat-ping"})).await;
    let err = recv_until(&mut consumer, "error").await;
    assert_eq!(err["code"], "OPERATION_NOT_ALLOWED");

    send_event(
        &mut consumer,
        json!({"type": "crew-sign-on", "employeeId": "E1", "name": "N"}),
    )
    .await;
    let err = recv_until(&mut consumer, "error").await;
    assert_eq!(err["code"], "CREW_EVENT_UNAUTHORIZED");
}

#[tokio::test]
async fn producer_cannot_register_as_consumer() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    send_event(&mut producer, json!({"type": "register-consumer"})).await;
    let err = recv_until(&mut producer, "error").await;
    assert_eq!(err["code"], "AUTH_INVALID_ROLE");
}

#[tokio::test]
async fn messages_before_registration_are_rejected() {
    let (url, _server) = boot_server(ServerConfig::default()).await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    send_event(&mut producer, json!({"type": "heartbeat-ping"})).await;
    let err = recv_until(&mut producer, "error").await;
    assert_eq!(err["code"], "CLIENT_NOT_REGISTERED");
}

// ── Custom rate ceilings ────────────────────────────────────────────

#[tokio::test]
async fn configured_offer_ceiling_enforced() {
    let (url, _server) = boot_server(ServerConfig {
        rate_ceilings: RateCeilings { offer: 3, ..RateCeilings::default() },
        ..ServerConfig::default()
    })
    .await;

    let mut producer = connect_client(&url, "P", Role::Producer).await;
    register_producer(&mut producer).await;
    let mut consumer = connect_client(&url, "C", Role::Consumer).await;
    let _ = register_consumer(&mut consumer).await;
    start_monitoring(&mut consumer, "P").await;

    for i in 0..3 {
        send_event(&mut consumer, json!({"type": "offer", "targetId": "P", "offer": i})).await;
        let _ = recv_until(&mut producer, "offer").await;
    }
    send_event(&mut consumer, json!({"type": "offer", "targetId": "P", "offer": 3})).await;
    let err = recv_until(&mut consumer, "error").await;
    assert_eq!(err["code"], "RATE_LIMIT_EXCEEDED");
    expect_silence(&mut producer, Duration::from_millis(300)).await;
}
