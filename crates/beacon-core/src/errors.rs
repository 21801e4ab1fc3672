//! Broker error codes and the `BrokerError` type.
//!
//! Every operational failure reported to a client becomes an `error` event
//! `{code, message, timestamp, details?}`. Failures are reported to the
//! originating sender only and never propagate to peer connections.

use serde_json::{json, Value};

use crate::ids::{ClientId, ConnectionId};
use crate::protocol::ServerEvent;
use crate::time;

// ── Error code constants ────────────────────────────────────────────

/// Handshake token rejected.
pub const AUTH_INVALID_TOKEN: &str = "AUTH_INVALID_TOKEN";
/// Message sent under the wrong authenticated role.
pub const AUTH_INVALID_ROLE: &str = "AUTH_INVALID_ROLE";
/// Malformed or incomplete request.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
/// Operation not permitted for this role or state.
pub const OPERATION_NOT_ALLOWED: &str = "OPERATION_NOT_ALLOWED";
/// Connection has not completed registration.
pub const CLIENT_NOT_REGISTERED: &str = "CLIENT_NOT_REGISTERED";
/// Target producer is not online.
pub const SESSION_PRODUCER_OFFLINE: &str = "SESSION_PRODUCER_OFFLINE";
/// Another consumer already holds the session.
pub const SESSION_ALREADY_EXISTS: &str = "SESSION_ALREADY_EXISTS";
/// No active session for the producer.
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
/// Session exists but is owned by a different connection.
pub const SESSION_NOT_AUTHORIZED: &str = "SESSION_NOT_AUTHORIZED";
/// Signaling frame missing target or payload.
pub const SIGNALING_MISSING_DATA: &str = "SIGNALING_MISSING_DATA";
/// Signaling target unknown or gone.
pub const SIGNALING_INVALID_TARGET: &str = "SIGNALING_INVALID_TARGET";
/// Sender and target are not a producer/consumer pair.
pub const SIGNALING_INVALID_PAIRING: &str = "SIGNALING_INVALID_PAIRING";
/// No active session covers the sender/target pair.
pub const SIGNALING_NO_SESSION: &str = "SIGNALING_NO_SESSION";
/// Sender is not an endpoint of the session.
pub const SIGNALING_UNAUTHORIZED_SENDER: &str = "SIGNALING_UNAUTHORIZED_SENDER";
/// Crew event from a non-producer.
pub const CREW_EVENT_UNAUTHORIZED: &str = "CREW_EVENT_UNAUTHORIZED";
/// Crew event payload incomplete.
pub const CREW_EVENT_INVALID_PAYLOAD: &str = "CREW_EVENT_INVALID_PAYLOAD";
/// Per-client event ceiling exceeded.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Operational failure reported back to the sending client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid auth token")]
    InvalidToken,

    #[error("event '{event}' is not valid for role '{role}'")]
    InvalidRole { event: String, role: String },

    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    NotAllowed { message: String },

    #[error("connection is not registered")]
    NotRegistered,

    #[error("producer '{producer_id}' is not online")]
    ProducerOffline { producer_id: String },

    #[error("producer '{producer_id}' is already being monitored")]
    SessionExists {
        producer_id: String,
        existing_consumer_id: ClientId,
    },

    #[error("no active session for producer '{producer_id}'")]
    SessionNotFound { producer_id: String },

    #[error("session for producer '{producer_id}' belongs to another connection")]
    SessionNotAuthorized { producer_id: String },

    #[error("{message}")]
    SignalingMissingData { message: String },

    #[error("signaling target '{target_id}' not found")]
    SignalingInvalidTarget { target_id: String },

    #[error("cannot signal between two {role}s")]
    SignalingInvalidPairing { role: String },

    #[error("no active session authorizes signaling to producer '{producer_id}'")]
    SignalingNoSession { producer_id: String },

    #[error("sender is not an endpoint of the session for producer '{producer_id}'")]
    SignalingUnauthorizedSender { producer_id: String },

    #[error("crew events require the producer role")]
    CrewUnauthorized,

    #[error("{message}")]
    CrewInvalidPayload { message: String },

    #[error("rate limit exceeded for '{kind}' ({current}/{limit} in window)")]
    RateLimited {
        kind: String,
        current: u32,
        limit: u32,
        reset_at_ms: i64,
    },

    #[error("{message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Machine-readable error code for this variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken => AUTH_INVALID_TOKEN,
            Self::InvalidRole { .. } => AUTH_INVALID_ROLE,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::NotAllowed { .. } => OPERATION_NOT_ALLOWED,
            Self::NotRegistered => CLIENT_NOT_REGISTERED,
            Self::ProducerOffline { .. } => SESSION_PRODUCER_OFFLINE,
            Self::SessionExists { .. } => SESSION_ALREADY_EXISTS,
            Self::SessionNotFound { .. } => SESSION_NOT_FOUND,
            Self::SessionNotAuthorized { .. } => SESSION_NOT_AUTHORIZED,
            Self::SignalingMissingData { .. } => SIGNALING_MISSING_DATA,
            Self::SignalingInvalidTarget { .. } => SIGNALING_INVALID_TARGET,
            Self::SignalingInvalidPairing { .. } => SIGNALING_INVALID_PAIRING,
            Self::SignalingNoSession { .. } => SIGNALING_NO_SESSION,
            Self::SignalingUnauthorizedSender { .. } => SIGNALING_UNAUTHORIZED_SENDER,
            Self::CrewUnauthorized => CREW_EVENT_UNAUTHORIZED,
            Self::CrewInvalidPayload { .. } => CREW_EVENT_INVALID_PAYLOAD,
            Self::RateLimited { .. } => RATE_LIMIT_EXCEEDED,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Structured details attached to the wire error, if any.
    #[must_use]
    pub fn details(&self) -> Option<Value> {
        match self {
            Self::SessionExists { existing_consumer_id, .. } => {
                Some(json!({ "existingConsumerId": existing_consumer_id }))
            }
            Self::SignalingInvalidTarget { target_id } => {
                Some(json!({ "targetId": target_id }))
            }
            Self::RateLimited { kind, current, limit, reset_at_ms } => Some(json!({
                "eventType": kind,
                "current": current,
                "limit": limit,
                "resetAt": reset_at_ms,
            })),
            _ => None,
        }
    }

    /// Build the wire `error` event for this failure.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code().to_owned(),
            message: self.to_string(),
            timestamp: time::now_rfc3339(),
            details: self.details(),
        }
    }
}

/// Registry-level failure for invalid registration arguments.
///
/// Distinct from `BrokerError` so `beacon-broker` does not depend on wire
/// concerns; the controller maps it to `INVALID_REQUEST`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client id must not be empty")]
    EmptyClientId,
    #[error("connection handle must not be empty")]
    EmptyConnection,
}

impl From<RegistryError> for BrokerError {
    fn from(err: RegistryError) -> Self {
        Self::InvalidRequest { message: err.to_string() }
    }
}

/// Session-create failure: the producer already has an active session.
#[derive(Debug, thiserror::Error)]
#[error("producer '{producer_id}' already has an active session owned by '{existing_consumer_id}'")]
pub struct SessionExists {
    pub producer_id: ClientId,
    pub existing_consumer_id: ClientId,
    pub existing_consumer_connection: ConnectionId,
}

impl From<SessionExists> for BrokerError {
    fn from(err: SessionExists) -> Self {
        Self::SessionExists {
            producer_id: err.producer_id.into_inner(),
            existing_consumer_id: err.existing_consumer_id,
        }
    }
}
