//! Shared broker state handed to the controller and the scan tasks.

use beacon_broker::liveness::HeartbeatTracker;
use beacon_broker::presence::PresenceRegistry;
use beacon_broker::rate_limit::RateLimiter;
use beacon_broker::sessions::SessionRegistry;

use crate::config::ServerConfig;
use crate::websocket::groups::RoleGroups;

/// Everything a message handler needs: the four registries, the fan-out
/// groups, and the startup configuration. Only the controller and the scan
/// tasks mutate the registries.
pub struct BrokerContext {
    pub presence: PresenceRegistry,
    pub sessions: SessionRegistry,
    pub rate: RateLimiter,
    pub liveness: HeartbeatTracker,
    pub groups: RoleGroups,
    pub config: ServerConfig,
}

impl BrokerContext {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            sessions: SessionRegistry::new(),
            rate: RateLimiter::new(config.rate_ceilings),
            liveness: HeartbeatTracker::new(),
            groups: RoleGroups::new(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_empty() {
        let ctx = BrokerContext::new(ServerConfig::default());
        assert_eq!(ctx.presence.online_producer_count(), 0);
        assert_eq!(ctx.sessions.active_count(), 0);
        assert_eq!(ctx.liveness.tracked_count(), 0);
        assert_eq!(ctx.rate.counter_count(), 0);
    }

    #[test]
    fn rate_ceilings_come_from_config() {
        let config = ServerConfig {
            rate_ceilings: beacon_broker::rate_limit::RateCeilings {
                offer: 1,
                ..Default::default()
            },
            ..ServerConfig::default()
        };
        let ctx = BrokerContext::new(config);
        let id = beacon_core::ids::ClientId::from("kiosk-1");
        assert!(ctx.rate.check_at(&id, "offer", 0).allowed);
        assert!(!ctx.rate.check_at(&id, "offer", 1).allowed);
    }
}
