//! # Fleetgate Core
//!
//! The relational store behind the fleetgate sync gateway.
//!
//! This crate provides:
//! - `Database`, a shared SQLite handle with schema bootstrap and
//!   immediate write transactions
//! - Non-destructive device state merges
//! - Rule, execution event, proposal and session stores
//!
//! The free functions in each store module take a `&Connection` so that
//! callers can compose them inside one [`Database::write`] transaction.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod database;
mod error;
mod schema;
mod types;

pub mod device;
pub mod events;
pub mod proposals;
pub mod rules;
pub mod sessions;

pub use config::StoreConfig;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use events::IngestReport;
pub use types::{
    Device, DeviceUpdate, EventFilter, EventPage, ExecutionEvent, NewProposal, NewRule, Proposal,
    ProposalStatus, Rule, RuleFilter, Vote,
};

/// Re-exported so dependents can name transaction types without a direct
/// `rusqlite` dependency.
pub use rusqlite;
