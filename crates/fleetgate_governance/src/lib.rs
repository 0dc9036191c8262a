//! # Fleetgate Governance
//!
//! Crowd governance: votes in, exactly one rule out.
//!
//! This crate provides:
//! - `VoteLedger`: idempotent per-(voter, proposal) ballots with counters
//!   recomputed from the ballots on every write
//! - `Finalizer`: the `PENDING -> APPROVED` transition, from a vote
//!   threshold or an administrative override
//! - `GovernanceStore`: the storage seam, with SQLite and in-memory
//!   implementations
//!
//! ## Key Invariants
//!
//! - A proposal's counters always equal its live ballots
//! - A proposal leaves `PENDING` at most once
//! - Exactly one rule is created per transition, in the same transaction
//! - Losing a finalize race is a successful no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod finalizer;
mod ledger;
mod sqlite;
mod store;

pub use config::{GovernanceConfig, DEFAULT_VOTE_THRESHOLD};
pub use error::{FinalizeError, FinalizeResult, VoteError, VoteResult};
pub use finalizer::Finalizer;
pub use ledger::{VoteLedger, VoteReceipt};
pub use sqlite::SqliteGovernanceStore;
pub use store::{FinalizeOutcome, GovernanceStore, MemoryGovernanceStore, VoteTally};

use fleetgate_protocol::Policy;
use std::sync::Arc;

/// The ledger and finalizer over one store.
pub struct Governance<S: GovernanceStore> {
    ledger: VoteLedger<S>,
    finalizer: Finalizer<S>,
    config: GovernanceConfig,
}

impl<S: GovernanceStore> Governance<S> {
    /// Builds the ledger and finalizer over `store`.
    pub fn new(store: S, config: GovernanceConfig) -> Self {
        let store = Arc::new(store);
        let finalizer = Finalizer::new(Arc::clone(&store), config);
        Self {
            ledger: VoteLedger::new(store, finalizer.clone()),
            finalizer,
            config,
        }
    }

    /// See [`VoteLedger::submit_vote`].
    pub fn submit_vote(
        &self,
        voter_id: i64,
        proposal_id: i64,
        vote_type: &str,
    ) -> VoteResult<VoteReceipt> {
        self.ledger.submit_vote(voter_id, proposal_id, vote_type)
    }

    /// Administrative override; see [`Finalizer::finalize`].
    pub fn finalize(&self, proposal_id: i64, policy: Policy) -> FinalizeResult<FinalizeOutcome> {
        self.finalizer.finalize(proposal_id, policy)
    }

    /// The configuration in effect.
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }
}
