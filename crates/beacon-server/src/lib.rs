//! # beacon-server
//!
//! Axum HTTP + `WebSocket` server and the broker's connection controller.
//!
//! - HTTP endpoints: `/health`, `/metrics` (Prometheus), `/ws` upgrade
//! - Handshake auth: HS256 token verified before upgrade; identity and role
//!   are pinned to the connection for its whole lifetime
//! - `WebSocket` gateway: per-connection read loop, bounded outbound channel,
//!   role-group fan-out
//! - Connection controller: registration, exclusive monitoring sessions,
//!   signaling forwarding, crew events, heartbeats, disconnect cascades
//! - Periodic scans: heartbeat expiry and session inactivity
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod controller;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod timers;
pub mod websocket;
