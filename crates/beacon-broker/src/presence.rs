//! Presence registry — who is online, in which role, on which connection.
//!
//! Producers and consumers live in disjoint namespaces with identical
//! contracts: at most one entry per client id, at most one entry per
//! connection handle, last-writer-wins when the same client id reconnects.
//! Reads return owned copies; the registry keeps the authoritative records.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use beacon_core::errors::RegistryError;
use beacon_core::ids::{ClientId, ConnectionId};

/// Online/offline marker. An entry goes offline before removal so in-flight
/// lookups see a consistent status rather than a vanished record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// One registered client in either role table.
#[derive(Clone, Debug, PartialEq)]
pub struct PresenceEntry {
    pub client_id: ClientId,
    pub connection: ConnectionId,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: PresenceStatus,
}

impl PresenceEntry {
    fn new(client_id: ClientId, connection: ConnectionId) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            connection,
            registered_at: now,
            last_seen_at: now,
            status: PresenceStatus::Online,
        }
    }
}

/// One role's table: identity index plus connection-handle index.
#[derive(Default)]
struct RoleTable {
    entries: DashMap<ClientId, PresenceEntry>,
    by_connection: DashMap<ConnectionId, ClientId>,
}

impl RoleTable {
    fn register(
        &self,
        client_id: &ClientId,
        connection: &ConnectionId,
    ) -> Result<PresenceEntry, RegistryError> {
        if client_id.is_empty() {
            return Err(RegistryError::EmptyClientId);
        }
        if connection.is_empty() {
            return Err(RegistryError::EmptyConnection);
        }

        let entry = PresenceEntry::new(client_id.clone(), connection.clone());
        // Last-writer-wins: a reconnecting client replaces its old entry, and
        // the stale connection index must not keep resolving to it.
        if let Some(previous) = self.entries.insert(client_id.clone(), entry.clone()) {
            if previous.connection != *connection {
                let _ = self.by_connection.remove(&previous.connection);
            }
        }
        let _ = self.by_connection.insert(connection.clone(), client_id.clone());
        Ok(entry)
    }

    fn remove(&self, client_id: &ClientId) -> bool {
        match self.entries.remove(client_id) {
            Some((_, entry)) => {
                let _ = self.by_connection.remove(&entry.connection);
                true
            }
            None => false,
        }
    }

    fn lookup(&self, client_id: &ClientId) -> Option<PresenceEntry> {
        self.entries.get(client_id).map(|e| e.clone())
    }

    fn lookup_by_connection(&self, connection: &ConnectionId) -> Option<PresenceEntry> {
        let client_id = self.by_connection.get(connection)?.clone();
        self.lookup(&client_id)
    }

    fn list_online(&self) -> Vec<PresenceEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == PresenceStatus::Online)
            .map(|e| e.clone())
            .collect()
    }

    fn mark_offline(&self, client_id: &ClientId) {
        if let Some(mut entry) = self.entries.get_mut(client_id) {
            entry.status = PresenceStatus::Offline;
        }
    }

    fn refresh(&self, client_id: &ClientId) {
        if let Some(mut entry) = self.entries.get_mut(client_id) {
            entry.last_seen_at = Utc::now();
            entry.status = PresenceStatus::Online;
        }
    }

    fn is_online(&self, client_id: &ClientId) -> bool {
        self.entries
            .get(client_id)
            .is_some_and(|e| e.status == PresenceStatus::Online)
    }
}

/// The broker's authoritative view of connected producers and consumers.
#[derive(Default)]
pub struct PresenceRegistry {
    producers: RoleTable,
    consumers: RoleTable,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Producers ───────────────────────────────────────────────────

    pub fn register_producer(
        &self,
        client_id: &ClientId,
        connection: &ConnectionId,
    ) -> Result<PresenceEntry, RegistryError> {
        let entry = self.producers.register(client_id, connection)?;
        debug!(producer_id = %client_id, connection = %connection, "producer registered");
        Ok(entry)
    }

    pub fn remove_producer(&self, client_id: &ClientId) -> bool {
        self.producers.remove(client_id)
    }

    #[must_use]
    pub fn lookup_producer(&self, client_id: &ClientId) -> Option<PresenceEntry> {
        self.producers.lookup(client_id)
    }

    #[must_use]
    pub fn lookup_producer_by_connection(&self, connection: &ConnectionId) -> Option<PresenceEntry> {
        self.producers.lookup_by_connection(connection)
    }

    #[must_use]
    pub fn list_online_producers(&self) -> Vec<PresenceEntry> {
        self.producers.list_online()
    }

    pub fn mark_producer_offline(&self, client_id: &ClientId) {
        self.producers.mark_offline(client_id);
    }

    pub fn refresh_producer(&self, client_id: &ClientId) {
        self.producers.refresh(client_id);
    }

    #[must_use]
    pub fn is_producer_online(&self, client_id: &ClientId) -> bool {
        self.producers.is_online(client_id)
    }

    #[must_use]
    pub fn online_producer_count(&self) -> usize {
        self.producers.list_online().len()
    }

    // ── Consumers ───────────────────────────────────────────────────

    pub fn register_consumer(
        &self,
        client_id: &ClientId,
        connection: &ConnectionId,
    ) -> Result<PresenceEntry, RegistryError> {
        let entry = self.consumers.register(client_id, connection)?;
        debug!(consumer_id = %client_id, connection = %connection, "consumer registered");
        Ok(entry)
    }

    pub fn remove_consumer(&self, client_id: &ClientId) -> bool {
        self.consumers.remove(client_id)
    }

    #[must_use]
    pub fn lookup_consumer(&self, client_id: &ClientId) -> Option<PresenceEntry> {
        self.consumers.lookup(client_id)
    }

    #[must_use]
    pub fn lookup_consumer_by_connection(&self, connection: &ConnectionId) -> Option<PresenceEntry> {
        self.consumers.lookup_by_connection(connection)
    }

    #[must_use]
    pub fn list_online_consumers(&self) -> Vec<PresenceEntry> {
        self.consumers.list_online()
    }

    pub fn mark_consumer_offline(&self, client_id: &ClientId) {
        self.consumers.mark_offline(client_id);
    }

    pub fn refresh_consumer(&self, client_id: &ClientId) {
        self.consumers.refresh(client_id);
    }

    #[must_use]
    pub fn is_consumer_online(&self, client_id: &ClientId) -> bool {
        self.consumers.is_online(client_id)
    }
}
