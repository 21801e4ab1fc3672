//! Producer heartbeat tracking.
//!
//! Producers ping unsolicited every ~30 s; a producer silent for longer than
//! the timeout (default 90 s) is considered gone. The tracker only stores
//! watermarks and answers scans — the cascade (mark offline, end session,
//! notify consumers) belongs to the periodic scan task, which also consults
//! presence so an already-offline producer is not announced twice.

use dashmap::DashMap;
use tracing::debug;

use beacon_core::ids::ClientId;
use beacon_core::time;

/// Expected gap between pings.
pub const EXPECTED_INTERVAL_MS: i64 = 30_000;
/// Silence longer than this marks a producer offline.
pub const DEFAULT_TIMEOUT_MS: i64 = 90_000;
/// How often the expiry scan runs.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 30_000;

/// Per-producer last-ping watermarks.
#[derive(Default)]
pub struct HeartbeatTracker {
    last_ping_ms: DashMap<ClientId, i64>,
}

impl HeartbeatTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a ping now; returns the stored timestamp.
    pub fn record_ping(&self, producer_id: &ClientId) -> i64 {
        self.record_ping_at(producer_id, time::now_ms())
    }

    /// Record a ping at `now_ms`.
    pub fn record_ping_at(&self, producer_id: &ClientId, now_ms: i64) -> i64 {
        let _ = self.last_ping_ms.insert(producer_id.clone(), now_ms);
        debug!(producer_id = %producer_id, "heartbeat recorded");
        now_ms
    }

    /// Last recorded ping, if any.
    #[must_use]
    pub fn last_ping(&self, producer_id: &ClientId) -> Option<i64> {
        self.last_ping_ms.get(producer_id).map(|t| *t)
    }

    /// Drop the watermark (producer disconnect).
    pub fn remove(&self, producer_id: &ClientId) {
        let _ = self.last_ping_ms.remove(producer_id);
    }

    /// Producers whose last ping is older than `timeout_ms` at `now_ms`.
    /// Pure read; entries stay until `remove`.
    #[must_use]
    pub fn scan_expired(&self, now_ms: i64, timeout_ms: i64) -> Vec<ClientId> {
        self.last_ping_ms
            .iter()
            .filter(|e| now_ms - *e.value() > timeout_ms)
            .map(|e| e.key().clone())
            .collect()
    }

    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.last_ping_ms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    #[test]
    fn record_and_read_back() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        assert!(tracker.last_ping(&id).is_none());

        let ts = tracker.record_ping_at(&id, T0);
        assert_eq!(ts, T0);
        assert_eq!(tracker.last_ping(&id), Some(T0));
    }

    #[test]
    fn newer_ping_replaces_older() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        let _ = tracker.record_ping_at(&id, T0);
        let _ = tracker.record_ping_at(&id, T0 + 30_000);
        assert_eq!(tracker.last_ping(&id), Some(T0 + 30_000));
        assert_eq!(tracker.tracked_count(), 1);
    }

    #[test]
    fn scan_finds_only_expired() {
        let tracker = HeartbeatTracker::new();
        let _ = tracker.record_ping_at(&ClientId::from("fresh"), T0 + 80_000);
        let _ = tracker.record_ping_at(&ClientId::from("stale"), T0);

        let expired = tracker.scan_expired(T0 + 95_000, DEFAULT_TIMEOUT_MS);
        assert_eq!(expired, vec![ClientId::from("stale")]);
    }

    #[test]
    fn scan_boundary_is_strict() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        let _ = tracker.record_ping_at(&id, T0);
        // Exactly timeout old: not yet expired.
        assert!(tracker.scan_expired(T0 + DEFAULT_TIMEOUT_MS, DEFAULT_TIMEOUT_MS).is_empty());
        assert_eq!(
            tracker.scan_expired(T0 + DEFAULT_TIMEOUT_MS + 1, DEFAULT_TIMEOUT_MS).len(),
            1
        );
    }

    #[test]
    fn scan_is_pure_read() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        let _ = tracker.record_ping_at(&id, T0);
        let _ = tracker.scan_expired(T0 + 200_000, DEFAULT_TIMEOUT_MS);
        assert_eq!(tracker.tracked_count(), 1, "scan must not evict");
    }

    #[test]
    fn remove_clears_entry() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        let _ = tracker.record_ping_at(&id, T0);
        tracker.remove(&id);
        assert!(tracker.last_ping(&id).is_none());
        assert_eq!(tracker.tracked_count(), 0);
    }

    #[test]
    fn ping_after_expiry_revives() {
        let tracker = HeartbeatTracker::new();
        let id = ClientId::from("kiosk-1");
        let _ = tracker.record_ping_at(&id, T0);
        assert_eq!(tracker.scan_expired(T0 + 100_000, DEFAULT_TIMEOUT_MS).len(), 1);

        let _ = tracker.record_ping_at(&id, T0 + 100_000);
        assert!(tracker.scan_expired(T0 + 100_001, DEFAULT_TIMEOUT_MS).is_empty());
    }
}
