//! Token command implementation.

use super::{open_store, CommandResult};
use chrono::Utc;
use fleetgate_sync_server::{AuthConfig, Role, Subject, TokenAuthority};
use std::path::Path;
use std::time::Duration;

/// Options for `token`.
#[derive(Debug)]
pub struct TokenOptions {
    /// User id.
    pub user_id: i64,
    /// Display name.
    pub username: String,
    /// Grant the admin role.
    pub admin: bool,
    /// Email claim.
    pub email: Option<String>,
    /// HS256 secret.
    pub secret: String,
    /// Issuer claim.
    pub issuer: String,
    /// Lifetime in hours.
    pub hours: u64,
}

/// Mints a token, records its session and prints it.
pub fn run(path: &Path, options: TokenOptions) -> CommandResult<String> {
    if options.secret.is_empty() {
        return Err("a shared secret is required to mint tokens".into());
    }
    let config = AuthConfig::new(options.secret.into_bytes())
        .with_issuer(options.issuer)
        .with_token_lifetime(Duration::from_secs(options.hours * 60 * 60));
    let authority = TokenAuthority::new(config, open_store(path)?)?;

    let subject = Subject {
        user_id: options.user_id,
        username: options.username,
        role: if options.admin { Role::Admin } else { Role::User },
        email: options.email,
    };
    let token = authority.issue(&subject, Utc::now())?;
    println!("{token}");
    Ok(token)
}
