//! Session registry — the exclusivity primitive.
//!
//! An active session is a consumer's exclusive claim on one producer, keyed
//! by the producer id. Exclusivity holds under any interleaving because
//! creation goes through a single-key `entry` operation on the producer-keyed
//! map. A consumer may own several sessions, one per distinct producer; they
//! are found by scanning for its connection handle, which keeps the relation
//! identifier-keyed rather than a live handle graph.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use beacon_core::errors::SessionExists;
use beacon_core::ids::{ClientId, ConnectionId};
use beacon_core::time;

/// Session state. `Ended` only ever appears on copies handed back from
/// `end*`; the registry itself never stores an ended session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Ended,
}

/// One monitoring session.
#[derive(Clone, Debug)]
pub struct MonitorSession {
    pub producer_id: ClientId,
    pub consumer_id: ClientId,
    pub consumer_connection: ConnectionId,
    pub started_at: DateTime<Utc>,
    /// Last signaling activity, epoch ms. Monotonically non-decreasing.
    pub last_activity_ms: i64,
    pub status: SessionStatus,
}

/// Producer-keyed map of active sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ClientId, MonitorSession>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session for `producer_id`.
    ///
    /// Fails when an active session already keys this producer; the error
    /// carries the current owner so the caller can report it.
    pub fn create(
        &self,
        producer_id: &ClientId,
        consumer_id: &ClientId,
        consumer_connection: &ConnectionId,
    ) -> Result<MonitorSession, SessionExists> {
        match self.sessions.entry(producer_id.clone()) {
            Entry::Occupied(existing) => Err(SessionExists {
                producer_id: producer_id.clone(),
                existing_consumer_id: existing.get().consumer_id.clone(),
                existing_consumer_connection: existing.get().consumer_connection.clone(),
            }),
            Entry::Vacant(slot) => {
                let session = MonitorSession {
                    producer_id: producer_id.clone(),
                    consumer_id: consumer_id.clone(),
                    consumer_connection: consumer_connection.clone(),
                    started_at: Utc::now(),
                    last_activity_ms: time::now_ms(),
                    status: SessionStatus::Active,
                };
                slot.insert(session.clone());
                debug!(producer_id = %producer_id, consumer_id = %consumer_id, "session created");
                Ok(session)
            }
        }
    }

    /// Atomically remove and return the session for `producer_id`.
    /// Idempotent: `None` when no session exists.
    pub fn end(&self, producer_id: &ClientId) -> Option<MonitorSession> {
        self.sessions.remove(producer_id).map(|(_, mut session)| {
            session.status = SessionStatus::Ended;
            debug!(producer_id = %producer_id, consumer_id = %session.consumer_id, "session ended");
            session
        })
    }

    /// End every session owned by this consumer connection (a consumer can
    /// hold one session per distinct producer). Used on consumer disconnect.
    pub fn end_by_consumer_connection(&self, connection: &ConnectionId) -> Vec<MonitorSession> {
        let owned: Vec<ClientId> = self
            .sessions
            .iter()
            .filter(|s| s.consumer_connection == *connection)
            .map(|s| s.producer_id.clone())
            .collect();

        owned.iter().filter_map(|producer_id| self.end(producer_id)).collect()
    }

    #[must_use]
    pub fn get(&self, producer_id: &ClientId) -> Option<MonitorSession> {
        self.sessions.get(producer_id).map(|s| s.clone())
    }

    #[must_use]
    pub fn has_active(&self, producer_id: &ClientId) -> bool {
        self.sessions.contains_key(producer_id)
    }

    /// True iff the active session for `producer_id` was created by exactly
    /// this consumer connection.
    #[must_use]
    pub fn validate_ownership(&self, producer_id: &ClientId, connection: &ConnectionId) -> bool {
        self.sessions
            .get(producer_id)
            .is_some_and(|s| s.consumer_connection == *connection)
    }

    /// Refresh the activity watermark. Returns false when no session exists.
    pub fn refresh_activity(&self, producer_id: &ClientId) -> bool {
        match self.sessions.get_mut(producer_id) {
            Some(mut session) => {
                session.last_activity_ms = session.last_activity_ms.max(time::now_ms());
                true
            }
            None => false,
        }
    }

    /// All active sessions idle for longer than `threshold_ms` at `now_ms`.
    /// Pure read; the caller decides whether to end them.
    #[must_use]
    pub fn scan_timed_out(&self, now_ms: i64, threshold_ms: i64) -> Vec<MonitorSession> {
        self.sessions
            .iter()
            .filter(|s| now_ms - s.last_activity_ms > threshold_ms)
            .map(|s| s.clone())
            .collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }
}
