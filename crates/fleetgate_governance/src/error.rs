//! Error types for governance operations.

use fleetgate_core::{CoreError, ProposalStatus};
use thiserror::Error;

/// Result type for vote submission.
pub type VoteResult<T> = Result<T, VoteError>;

/// Result type for finalization.
pub type FinalizeResult<T> = Result<T, FinalizeError>;

/// Reasons a vote is rejected.
///
/// Preconditions are checked in declaration order, so a vote on a missing
/// proposal is `NotFound` whatever its ballot says.
#[derive(Error, Debug)]
pub enum VoteError {
    /// No such proposal.
    #[error("proposal {proposal_id} not found")]
    NotFound {
        /// The proposal voted on.
        proposal_id: i64,
    },

    /// The proposal is no longer accepting votes.
    #[error("proposal {proposal_id} is {status}, not PENDING")]
    InvalidState {
        /// The proposal voted on.
        proposal_id: i64,
        /// Its current status.
        status: ProposalStatus,
    },

    /// The ballot is not a recognized vote type.
    #[error("invalid vote type {value:?}")]
    InvalidVote {
        /// What was submitted.
        value: String,
    },

    /// The store failed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

impl VoteError {
    /// Returns true if the caller sent a request that cannot succeed.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, VoteError::Store(_))
    }
}

/// Reasons finalization fails.
///
/// Finalizing an already decided proposal is not an error; see
/// [`FinalizeOutcome::AlreadyFinalized`](crate::FinalizeOutcome).
#[derive(Error, Debug)]
pub enum FinalizeError {
    /// No such proposal.
    #[error("proposal {proposal_id} not found")]
    NotFound {
        /// The proposal to finalize.
        proposal_id: i64,
    },

    /// The store failed; nothing was committed.
    #[error("store error: {0}")]
    Store(#[from] CoreError),
}

impl FinalizeError {
    /// Returns true if the caller sent a request that cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(self, FinalizeError::NotFound { .. })
    }
}
