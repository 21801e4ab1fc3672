//! Wire protocol — the event vocabulary exchanged over the WebSocket.
//!
//! Every frame is a JSON object tagged by `type` (kebab-case event name, e.g.
//! `start-monitoring`); payload fields are camelCase. Signaling payloads
//! (`offer` / `answer` / `candidate`) are opaque blobs: the broker checks
//! presence, never shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ClientId;

/// Client role, fixed at handshake authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Kiosk side: owns a camera, emits crew events, heartbeats.
    Producer,
    /// Monitor side: claims exclusive sessions on producers.
    Consumer,
}

impl Role {
    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    /// The peer role.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Producer => Self::Consumer,
            Self::Consumer => Self::Producer,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three WebRTC signaling message kinds the broker forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wire event name; also the rate-limiter counter key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
        }
    }
}

/// Crew event direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrewKind {
    #[serde(rename = "crew-sign-on")]
    SignOn,
    #[serde(rename = "crew-sign-off")]
    SignOff,
}

impl CrewKind {
    /// Wire event name; also the rate-limiter counter key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignOn => "crew-sign-on",
            Self::SignOff => "crew-sign-off",
        }
    }
}

/// Why a producer was announced offline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineReason {
    Disconnect,
    HeartbeatTimeout,
}

/// Why a monitoring session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionEndReason {
    ProducerDisconnect,
    ConsumerDisconnect,
    ProducerTimeout,
    SessionTimeout,
}

/// Inbound events (client → broker).
///
/// Identity fields the broker validates itself (`targetId`, `producerId`,
/// crew fields) are `default`-tolerant strings so a missing field surfaces
/// as the documented domain error, not as a JSON parse failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    RegisterProducer,
    RegisterConsumer,
    StartMonitoring {
        #[serde(default)]
        producer_id: String,
    },
    StopMonitoring {
        #[serde(default)]
        producer_id: String,
    },
    Offer {
        #[serde(default)]
        target_id: String,
        offer: Option<Value>,
    },
    Answer {
        #[serde(default)]
        target_id: String,
        answer: Option<Value>,
    },
    IceCandidate {
        #[serde(default)]
        target_id: String,
        candidate: Option<Value>,
    },
    HeartbeatPing,
    CrewSignOn {
        #[serde(default)]
        employee_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        producer_id: String,
        timestamp: Option<String>,
    },
    CrewSignOff {
        #[serde(default)]
        employee_id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        producer_id: String,
        timestamp: Option<String>,
    },
}

impl ClientEvent {
    /// Wire event name (the `type` tag).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterProducer => "register-producer",
            Self::RegisterConsumer => "register-consumer",
            Self::StartMonitoring { .. } => "start-monitoring",
            Self::StopMonitoring { .. } => "stop-monitoring",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::HeartbeatPing => "heartbeat-ping",
            Self::CrewSignOn { .. } => "crew-sign-on",
            Self::CrewSignOff { .. } => "crew-sign-off",
        }
    }
}

/// One entry of the online-producer snapshot sent to a registering consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineProducer {
    pub producer_id: ClientId,
    /// When the producer registered, RFC 3339.
    pub connected_at: String,
}

/// Outbound events (broker → client).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ConnectionEstablished {
        client_id: ClientId,
        role: Role,
        timestamp: String,
    },
    ProducerRegistered {
        producer_id: ClientId,
        timestamp: String,
    },
    ConsumerRegistered {
        consumer_id: ClientId,
        online_producers: Vec<OnlineProducer>,
        timestamp: String,
    },
    ProducerOnline {
        producer_id: ClientId,
        timestamp: String,
    },
    ProducerOffline {
        producer_id: ClientId,
        reason: OfflineReason,
        timestamp: String,
    },
    MonitoringStarted {
        producer_id: ClientId,
        session_id: ClientId,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<String>,
        timestamp: String,
    },
    MonitoringStopped {
        producer_id: ClientId,
        timestamp: String,
    },
    SessionEnded {
        producer_id: ClientId,
        consumer_id: ClientId,
        reason: SessionEndReason,
        timestamp: String,
    },
    SessionTimeout {
        producer_id: ClientId,
        timestamp: String,
    },
    Offer {
        from_id: ClientId,
        offer: Value,
    },
    Answer {
        from_id: ClientId,
        answer: Value,
    },
    IceCandidate {
        from_id: ClientId,
        candidate: Value,
    },
    CrewSignOn {
        employee_id: String,
        name: String,
        timestamp: String,
        producer_id: ClientId,
        event_type: CrewKind,
    },
    CrewSignOff {
        employee_id: String,
        name: String,
        timestamp: String,
        producer_id: ClientId,
        event_type: CrewKind,
    },
    CrewSignOnAck {
        employee_id: String,
        timestamp: String,
    },
    CrewSignOffAck {
        employee_id: String,
        timestamp: String,
    },
    HeartbeatPong {
        timestamp: String,
    },
    Error {
        code: String,
        message: String,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl ServerEvent {
    /// Wire event name (the `type` tag).
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection-established",
            Self::ProducerRegistered { .. } => "producer-registered",
            Self::ConsumerRegistered { .. } => "consumer-registered",
            Self::ProducerOnline { .. } => "producer-online",
            Self::ProducerOffline { .. } => "producer-offline",
            Self::MonitoringStarted { .. } => "monitoring-started",
            Self::MonitoringStopped { .. } => "monitoring-stopped",
            Self::SessionEnded { .. } => "session-ended",
            Self::SessionTimeout { .. } => "session-timeout",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CrewSignOn { .. } => "crew-sign-on",
            Self::CrewSignOff { .. } => "crew-sign-off",
            Self::CrewSignOnAck { .. } => "crew-sign-on-ack",
            Self::CrewSignOffAck { .. } => "crew-sign-off-ack",
            Self::HeartbeatPong { .. } => "heartbeat-pong",
            Self::Error { .. } => "error",
        }
    }
}
