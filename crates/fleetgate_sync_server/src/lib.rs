//! # Fleetgate Sync Server
//!
//! HTTP sync gateway for endpoint-security agents, plus the crowd
//! governance API that turns votes into rules.
//!
//! This crate provides:
//! - The four agent sync phases: preflight, event upload, rule download
//!   and postflight
//! - Body decompression for gzip, zlib-wrapped deflate and raw deflate,
//!   declared or not
//! - The governance API: proposals, votes, administrative approval,
//!   rules, machine inventory and execution events
//! - Bearer-token verification (HS256 or Ed25519) with optional session
//!   revocation, logout, and a background sweep of expired sessions
//!
//! # Sync phases
//!
//! ```text
//! POST /preflight/{device_id}     telemetry in, sync policy out
//! POST /eventupload/{device_id}   executions in, always acknowledged
//! POST /ruledownload/{device_id}  {cursor?} in, next page of rules out
//! POST /postflight/{device_id}    stamps the end of the cycle
//! ```
//!
//! Malformed agent data never fails a phase. A body whose declared
//! `Content-Encoding` cannot be reversed is the one exception and gets 400.
//!
//! # Running
//!
//! ```rust,ignore
//! use fleetgate_sync_server::{AuthConfig, ServerConfig, SyncServer};
//!
//! let config = ServerConfig::default().with_auth(AuthConfig::new(secret));
//! let server = SyncServer::open(config)?;
//! let listener = tokio::net::TcpListener::bind(server.config().bind_addr).await?;
//! server.serve(listener, shutdown_signal()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod api;
mod auth;
mod config;
mod decompress;
mod error;
mod handler;
mod server;

pub use auth::{bearer_token, AuthConfig, Claims, Role, Subject, TokenAuthority, TokenVerifier};
pub use config::ServerConfig;
pub use decompress::{decompress_body, BodyDecoding};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, SyncHandler};
pub use server::SyncServer;
