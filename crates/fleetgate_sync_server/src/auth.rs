//! Bearer-token authentication for the governance API.
//!
//! Tokens are compact JWTs (`header.claims.signature`, base64url without
//! padding). The `alg` header selects a [`TokenVerifier`]:
//!
//! - `HS256`: HMAC-SHA256 over a shared secret
//! - `EdDSA`: Ed25519 over a configured public key
//!
//! Tokens are minted with the shared secret only. Each minted token gets a
//! session row keyed by its SHA-256, which verification can be told to
//! require so that revoking the row revokes the token.

use crate::error::{ServerError, ServerResult};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use fleetgate_core::Database;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const HS256: &str = "HS256";
const EDDSA: &str = "EdDSA";

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret for HS256 tokens.
    pub shared_secret: Option<Vec<u8>>,
    /// Ed25519 public key for EdDSA tokens.
    pub public_key: Option<[u8; 32]>,
    /// Expected `iss` claim.
    pub issuer: String,
    /// Lifetime of minted tokens.
    pub token_lifetime: Duration,
    /// Demand a live session row for every token.
    pub require_session: bool,
}

impl AuthConfig {
    /// Creates a configuration that verifies and mints HS256 tokens.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            shared_secret: Some(secret),
            ..Self::default()
        }
    }

    /// Also accepts EdDSA tokens signed by this key.
    pub fn with_public_key(mut self, key: [u8; 32]) -> Self {
        self.public_key = Some(key);
        self
    }

    /// Sets the expected issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Sets the lifetime of minted tokens.
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Requires a live session row for every token.
    pub fn with_required_session(mut self, required: bool) -> Self {
        self.require_session = required;
        self
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: None,
            public_key: None,
            issuer: "fleetgate".to_string(),
            token_lifetime: Duration::from_secs(24 * 60 * 60),
            require_session: false,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key.map(hex_prefix))
            .field("issuer", &self.issuer)
            .field("token_lifetime", &self.token_lifetime)
            .field("require_session", &self.require_session)
            .finish()
    }
}

fn hex_prefix(key: [u8; 32]) -> String {
    key[..4].iter().map(|b| format!("{b:02x}")).collect::<String>() + ".."
}

/// What a user may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// May finalize proposals and author rules.
    Admin,
    /// May propose and vote.
    User,
}

/// Verified token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: i64,
    /// Display name.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Email, when the identity provider supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Issued at (epoch seconds).
    pub iat: i64,
    /// Not before (epoch seconds).
    pub nbf: i64,
    /// Expires at (epoch seconds).
    pub exp: i64,
    /// Issuer.
    pub iss: String,
}

impl Claims {
    /// Returns true for administrators.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// The user a token is minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// User id.
    pub user_id: i64,
    /// Display name.
    pub username: String,
    /// Role.
    pub role: Role,
    /// Optional email.
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// A signature check for one token algorithm.
#[derive(Clone)]
pub enum TokenVerifier {
    /// HS256 over a shared secret.
    SharedSecret(Vec<u8>),
    /// EdDSA over an Ed25519 public key.
    PublicKey(VerifyingKey),
}

impl TokenVerifier {
    /// The `alg` header value this verifier handles.
    pub fn algorithm(&self) -> &'static str {
        match self {
            TokenVerifier::SharedSecret(_) => HS256,
            TokenVerifier::PublicKey(_) => EDDSA,
        }
    }

    /// Checks `signature` over `signing_input`.
    pub fn verify(&self, signing_input: &[u8], signature: &[u8]) -> ServerResult<()> {
        match self {
            TokenVerifier::SharedSecret(secret) => {
                let mut mac = hmac_for(secret)?;
                mac.update(signing_input);
                mac.verify_slice(signature)
                    .map_err(|_| auth_failed("bad token signature"))
            }
            TokenVerifier::PublicKey(key) => {
                let signature = Signature::from_slice(signature)
                    .map_err(|_| auth_failed("bad token signature"))?;
                key.verify(signing_input, &signature)
                    .map_err(|_| auth_failed("bad token signature"))
            }
        }
    }
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenVerifier::SharedSecret(_) => f.write_str("SharedSecret(<redacted>)"),
            TokenVerifier::PublicKey(key) => f.debug_tuple("PublicKey").field(key).finish(),
        }
    }
}

fn hmac_for(secret: &[u8]) -> ServerResult<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))
}

fn auth_failed(reason: &str) -> ServerError {
    ServerError::AuthenticationFailed(reason.to_string())
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> ServerResult<T> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| auth_failed("malformed token"))?;
    serde_json::from_slice(&raw).map_err(|_| auth_failed("malformed token"))
}

fn encode_segment<T: Serialize>(value: &T) -> ServerResult<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| ServerError::Internal(format!("token encode: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Verifies and mints bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    verifiers: Vec<TokenVerifier>,
    config: AuthConfig,
    db: Database,
}

impl TokenAuthority {
    /// Builds the verifiers `config` enables.
    ///
    /// Fails if the configured public key is not a valid Ed25519 point.
    pub fn new(config: AuthConfig, db: Database) -> ServerResult<Self> {
        let mut verifiers = Vec::new();
        if let Some(secret) = &config.shared_secret {
            verifiers.push(TokenVerifier::SharedSecret(secret.clone()));
        }
        if let Some(key) = &config.public_key {
            let key = VerifyingKey::from_bytes(key)
                .map_err(|e| ServerError::InvalidRequest(format!("bad Ed25519 public key: {e}")))?;
            verifiers.push(TokenVerifier::PublicKey(key));
        }
        if verifiers.is_empty() {
            tracing::warn!("no token verifier configured; the governance API will reject every request");
        }
        Ok(Self {
            verifiers,
            config,
            db,
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Verifies `token` as of `now` and returns its claims.
    ///
    /// Blocks on the store when sessions are required.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> ServerResult<Claims> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(auth_failed("malformed token"));
        };

        let token_header: TokenHeader = decode_segment(header)?;
        let verifier = self
            .verifiers
            .iter()
            .find(|v| v.algorithm() == token_header.alg)
            .ok_or_else(|| {
                ServerError::AuthenticationFailed(format!(
                    "unsupported token algorithm {:?}",
                    token_header.alg
                ))
            })?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| auth_failed("malformed token"))?;
        let signing_input = &token[..header.len() + 1 + payload.len()];
        verifier.verify(signing_input.as_bytes(), &signature)?;

        let claims: Claims = decode_segment(payload)?;
        let now_secs = now.timestamp();
        if claims.exp <= now_secs {
            return Err(auth_failed("token expired"));
        }
        if claims.nbf > now_secs {
            return Err(auth_failed("token not yet valid"));
        }
        if claims.iss != self.config.issuer {
            return Err(auth_failed("wrong token issuer"));
        }
        if self.config.require_session && !self.db.session_active(token, now)? {
            return Err(auth_failed("session revoked or expired"));
        }
        Ok(claims)
    }

    /// Mints an HS256 token for `subject` and records its session.
    pub fn issue(&self, subject: &Subject, now: DateTime<Utc>) -> ServerResult<String> {
        let secret = self
            .config
            .shared_secret
            .as_deref()
            .ok_or_else(|| ServerError::InvalidRequest("no shared secret configured".into()))?;
        let lifetime = chrono::Duration::from_std(self.config.token_lifetime)
            .map_err(|e| ServerError::InvalidRequest(format!("token lifetime: {e}")))?;
        let expires_at = now + lifetime;

        let claims = Claims {
            sub: subject.user_id,
            username: subject.username.clone(),
            role: subject.role,
            email: subject.email.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.config.issuer.clone(),
        };
        let header = TokenHeader {
            alg: HS256.to_string(),
            typ: Some("JWT".to_string()),
        };

        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
        let mut mac = hmac_for(secret)?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        let token = format!("{signing_input}.{signature}");

        self.db.record_session(subject.user_id, &token, expires_at)?;
        tracing::info!(user_id = subject.user_id, role = ?subject.role, %expires_at, "issued token");
        Ok(token)
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}
