//! Server configuration. Everything is read once at startup; env vars use
//! the `BEACON_` prefix.

use serde::Deserialize;

use beacon_broker::liveness;
use beacon_broker::rate_limit::RateCeilings;

/// Configuration for the beacon server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Allowed CORS origin for the HTTP surface; `None` = permissive.
    pub cors_origin: Option<String>,
    /// Shared HS256 secret for handshake tokens.
    pub auth_secret: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Producer silence beyond this marks it offline.
    pub heartbeat_timeout_ms: i64,
    /// Session inactivity beyond this ends the session.
    pub session_timeout_ms: i64,
    /// Period of the heartbeat/session scans.
    pub scan_interval_ms: u64,
    /// Per-kind rate ceilings (events per 60 s).
    pub rate_ceilings: RateCeilings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origin: None,
            auth_secret: "beacon-dev-secret".into(),
            max_connections: 256,
            max_message_size: 1024 * 1024, // 1 MB
            heartbeat_timeout_ms: liveness::DEFAULT_TIMEOUT_MS,
            session_timeout_ms: 5 * 60 * 1000,
            scan_interval_ms: liveness::DEFAULT_SCAN_INTERVAL_MS,
            rate_ceilings: RateCeilings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `BEACON_*` environment variables, falling back
    /// to defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(host) = std::env::var("BEACON_HOST") {
            cfg.host = host;
        }
        if let Some(port) = env_parse("BEACON_PORT") {
            cfg.port = port;
        }
        if let Ok(origin) = std::env::var("BEACON_CORS_ORIGIN") {
            if !origin.is_empty() {
                cfg.cors_origin = Some(origin);
            }
        }
        if let Ok(secret) = std::env::var("BEACON_AUTH_SECRET") {
            cfg.auth_secret = secret;
        }
        if let Some(v) = env_parse("BEACON_MAX_CONNECTIONS") {
            cfg.max_connections = v;
        }
        if let Some(v) = env_parse("BEACON_MAX_MESSAGE_SIZE") {
            cfg.max_message_size = v;
        }
        if let Some(v) = env_parse("BEACON_HEARTBEAT_TIMEOUT_MS") {
            cfg.heartbeat_timeout_ms = v;
        }
        if let Some(v) = env_parse("BEACON_SESSION_TIMEOUT_MS") {
            cfg.session_timeout_ms = v;
        }
        if let Some(v) = env_parse("BEACON_SCAN_INTERVAL_MS") {
            cfg.scan_interval_ms = v;
        }
        cfg.rate_ceilings = RateCeilings {
            offer: env_parse("BEACON_RATE_OFFER").unwrap_or(cfg.rate_ceilings.offer),
            answer: env_parse("BEACON_RATE_ANSWER").unwrap_or(cfg.rate_ceilings.answer),
            ice_candidate: env_parse("BEACON_RATE_ICE_CANDIDATE")
                .unwrap_or(cfg.rate_ceilings.ice_candidate),
            crew_sign_on: env_parse("BEACON_RATE_CREW_SIGN_ON")
                .unwrap_or(cfg.rate_ceilings.crew_sign_on),
            crew_sign_off: env_parse("BEACON_RATE_CREW_SIGN_OFF")
                .unwrap_or(cfg.rate_ceilings.crew_sign_off),
            fallback: env_parse("BEACON_RATE_DEFAULT").unwrap_or(cfg.rate_ceilings.fallback),
        };
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}
