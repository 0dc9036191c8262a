//! Serve command implementation.

use super::CommandResult;
use fleetgate_core::StoreConfig;
use fleetgate_governance::GovernanceConfig;
use fleetgate_protocol::{ClientMode, SyncPolicy};
use fleetgate_sync_server::{AuthConfig, ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::path::Path;

/// Options for `serve`.
#[derive(Debug)]
pub struct ServeOptions {
    /// Listen address.
    pub bind: SocketAddr,
    /// Vote threshold.
    pub threshold: u32,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Hex Ed25519 public key.
    pub public_key: Option<String>,
    /// Expected issuer.
    pub issuer: String,
    /// Require live sessions.
    pub require_session: bool,
    /// Mode handed to agents.
    pub client_mode: ClientMode,
    /// Upload batch size handed to agents.
    pub batch_size: u32,
    /// Rule download page size.
    pub page_size: usize,
}

/// Parses a 64-character hex Ed25519 public key.
pub fn parse_public_key(hex_key: &str) -> CommandResult<[u8; 32]> {
    let bytes = hex::decode(hex_key.trim())?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("public key must be 32 bytes, got {}", b.len()))?;
    Ok(key)
}

/// Builds the server configuration from command-line options.
pub fn config(db: Option<&Path>, options: ServeOptions) -> CommandResult<ServerConfig> {
    let mut auth = AuthConfig::default()
        .with_issuer(options.issuer)
        .with_required_session(options.require_session);
    auth.shared_secret = options.secret.map(String::into_bytes);
    if let Some(key) = options.public_key.as_deref() {
        auth = auth.with_public_key(parse_public_key(key)?);
    }

    let store = match db {
        Some(path) => StoreConfig::file(path),
        None => {
            tracing::warn!("no --db given; using an in-memory store that is lost on exit");
            StoreConfig::new()
        }
    };

    Ok(ServerConfig::new(options.bind)
        .with_rule_page_size(options.page_size)
        .with_auth(auth)
        .with_policy(SyncPolicy {
            client_mode: options.client_mode,
            batch_size: options.batch_size,
            ..SyncPolicy::default()
        })
        .with_governance(GovernanceConfig::new().with_vote_threshold(options.threshold))
        .with_store(store))
}

/// Runs the server until Ctrl-C.
pub fn run(db: Option<&Path>, options: ServeOptions) -> CommandResult {
    let config = config(db, options)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = SyncServer::open(config)?;
        let listener = tokio::net::TcpListener::bind(server.config().bind_addr).await?;
        server
            .serve(listener, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("shutdown requested");
            })
            .await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ServeOptions {
        ServeOptions {
            bind: "127.0.0.1:0".parse().unwrap(),
            threshold: 4,
            secret: Some("s3cret".into()),
            public_key: None,
            issuer: "fleetgate".into(),
            require_session: true,
            client_mode: ClientMode::Monitor,
            batch_size: 50,
            page_size: 25,
        }
    }

    #[test]
    fn options_map_to_config() {
        let config = config(Some(Path::new("/tmp/fleet.db")), options()).unwrap();
        assert_eq!(config.governance.vote_threshold, 4);
        assert_eq!(config.rule_page_size, 25);
        assert_eq!(config.policy.client_mode, ClientMode::Monitor);
        assert_eq!(config.policy.batch_size, 50);
        assert!(config.policy.enable_bundles);
        assert_eq!(config.auth.shared_secret.as_deref(), Some(&b"s3cret"[..]));
        assert!(config.auth.require_session);
        assert!(!config.store.is_in_memory());
    }

    #[test]
    fn public_key_must_be_32_bytes() {
        assert!(parse_public_key(&"ab".repeat(32)).is_ok());
        assert!(parse_public_key("abcd").is_err());
        assert!(parse_public_key("not hex").is_err());
    }
}
