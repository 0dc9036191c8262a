//! Server configuration.

use crate::auth::AuthConfig;
use fleetgate_core::StoreConfig;
use fleetgate_governance::GovernanceConfig;
use fleetgate_protocol::{SyncPolicy, DEFAULT_MAX_DECODED_LEN};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Rules per rule-download page.
    pub rule_page_size: usize,
    /// Largest request body accepted on the wire.
    pub max_body_bytes: usize,
    /// Largest body after decompression.
    pub max_decoded_bytes: usize,
    /// How often expired sessions are swept.
    pub session_sweep_interval: Duration,
    /// Token verification for the governance API.
    pub auth: AuthConfig,
    /// Policy handed to agents at preflight.
    pub policy: SyncPolicy,
    /// Vote threshold.
    pub governance: GovernanceConfig,
    /// Where the store lives.
    pub store: StoreConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            rule_page_size: 100,
            max_body_bytes: 16 * 1024 * 1024,
            max_decoded_bytes: DEFAULT_MAX_DECODED_LEN,
            session_sweep_interval: Duration::from_secs(60 * 60),
            auth: AuthConfig::default(),
            policy: SyncPolicy::default(),
            governance: GovernanceConfig::default(),
            store: StoreConfig::default(),
        }
    }

    /// Sets the rule-download page size. Zero is treated as one.
    pub fn with_rule_page_size(mut self, size: usize) -> Self {
        self.rule_page_size = size.max(1);
        self
    }

    /// Sets the wire body limit.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Sets the decompressed body limit.
    pub fn with_max_decoded_bytes(mut self, limit: usize) -> Self {
        self.max_decoded_bytes = limit;
        self
    }

    /// Sets the session sweep interval.
    pub fn with_session_sweep_interval(mut self, interval: Duration) -> Self {
        self.session_sweep_interval = interval;
        self
    }

    /// Sets token verification.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the preflight policy.
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets governance parameters.
    pub fn with_governance(mut self, governance: GovernanceConfig) -> Self {
        self.governance = governance;
        self
    }

    /// Sets the store location.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
