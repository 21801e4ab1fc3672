//! Sliding-window rate limiter, per (client, event kind).
//!
//! Each counter is the list of accept timestamps within the last 60 s,
//! pruned lazily on every check. The clock is passed in (`check_at`) so the
//! window logic is testable without sleeping; `check` supplies the real
//! clock.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

use beacon_core::ids::ClientId;
use beacon_core::time;

/// Window length for every counter.
pub const WINDOW_MS: i64 = 60_000;

/// Per-kind ceilings (events per window).
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RateCeilings {
    pub offer: u32,
    pub answer: u32,
    pub ice_candidate: u32,
    pub crew_sign_on: u32,
    pub crew_sign_off: u32,
    /// Applied to any event kind not listed above.
    pub fallback: u32,
}

impl Default for RateCeilings {
    fn default() -> Self {
        Self {
            offer: 30,
            answer: 30,
            ice_candidate: 60,
            crew_sign_on: 10,
            crew_sign_off: 10,
            fallback: 60,
        }
    }
}

impl RateCeilings {
    /// Ceiling for a wire event kind.
    #[must_use]
    pub fn for_kind(&self, kind: &str) -> u32 {
        match kind {
            "offer" => self.offer,
            "answer" => self.answer,
            "ice-candidate" => self.ice_candidate,
            "crew-sign-on" => self.crew_sign_on,
            "crew-sign-off" => self.crew_sign_off,
            _ => self.fallback,
        }
    }
}

/// Outcome of a rate check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Events counted in the window, including this one when allowed.
    pub current: u32,
    pub limit: u32,
    /// When the window frees up: oldest retained timestamp + 60 s, or
    /// `now + 60 s` for an empty window.
    pub reset_at_ms: i64,
}

/// Sliding-window counters for all clients.
pub struct RateLimiter {
    ceilings: RateCeilings,
    windows: Mutex<HashMap<(ClientId, String), Vec<i64>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(ceilings: RateCeilings) -> Self {
        Self {
            ceilings,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one event at the current time.
    pub fn check(&self, client_id: &ClientId, kind: &str) -> RateDecision {
        self.check_at(client_id, kind, time::now_ms())
    }

    /// Check and record one event at `now_ms`.
    pub fn check_at(&self, client_id: &ClientId, kind: &str, now_ms: i64) -> RateDecision {
        let limit = self.ceilings.for_kind(kind);
        let mut windows = self.windows.lock();
        let stamps = windows
            .entry((client_id.clone(), kind.to_owned()))
            .or_default();

        stamps.retain(|&t| now_ms - t < WINDOW_MS);
        let current = stamps.len() as u32;

        if current >= limit {
            let reset_at_ms = stamps.first().copied().unwrap_or(now_ms) + WINDOW_MS;
            debug!(client_id = %client_id, kind, current, limit, "rate limit exceeded");
            return RateDecision { allowed: false, current, limit, reset_at_ms };
        }

        stamps.push(now_ms);
        let reset_at_ms = stamps.first().copied().unwrap_or(now_ms) + WINDOW_MS;
        RateDecision {
            allowed: true,
            current: current + 1,
            limit,
            reset_at_ms,
        }
    }

    /// Drop every counter belonging to this client. Invoked on disconnect.
    pub fn reset_all(&self, client_id: &ClientId) {
        self.windows.lock().retain(|(owner, _), _| owner != client_id);
    }

    /// Number of live counters (for tests and introspection).
    #[must_use]
    pub fn counter_count(&self) -> usize {
        self.windows.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateCeilings::default())
    }
}
