//! Vote submission.

use fleetgate_core::ProposalStatus;
use fleetgate_protocol::VoteType;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{VoteError, VoteResult};
use crate::finalizer::Finalizer;
use crate::store::{FinalizeOutcome, GovernanceStore, VoteTally};

/// Result of an accepted vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    /// Counters after this vote.
    pub tally: VoteTally,
    /// Set when this vote pushed the proposal over the threshold.
    pub finalized: Option<FinalizeOutcome>,
}

/// Durable, idempotent per-(voter, proposal) ballots.
pub struct VoteLedger<S: GovernanceStore> {
    store: Arc<S>,
    finalizer: Finalizer<S>,
}

impl<S: GovernanceStore> VoteLedger<S> {
    /// Creates a ledger that hands threshold checks to `finalizer`.
    pub fn new(store: Arc<S>, finalizer: Finalizer<S>) -> Self {
        Self { store, finalizer }
    }

    /// Records a vote, then finalizes the proposal if it crossed the
    /// threshold.
    ///
    /// The vote is durable once this returns `Ok`. A failed finalize after
    /// it is logged and leaves the vote in place; the next vote or an
    /// administrator can still decide the proposal.
    pub fn submit_vote(
        &self,
        voter_id: i64,
        proposal_id: i64,
        vote_type: &str,
    ) -> VoteResult<VoteReceipt> {
        let status = self.store.proposal_status(proposal_id)?;
        if status != ProposalStatus::Pending {
            return Err(VoteError::InvalidState {
                proposal_id,
                status,
            });
        }
        let vote_type: VoteType = vote_type.parse().map_err(|_| VoteError::InvalidVote {
            value: vote_type.to_string(),
        })?;

        let tally = self.store.record_vote(voter_id, proposal_id, vote_type)?;
        tracing::info!(
            proposal_id,
            voter_id,
            %vote_type,
            allow = tally.allow,
            block = tally.block,
            "vote recorded"
        );

        let finalized = match self.finalizer.check_threshold(proposal_id, &tally) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(proposal_id, error = %e, "threshold finalize failed; vote kept");
                None
            }
        };
        Ok(VoteReceipt { tally, finalized })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovernanceConfig;
    use crate::store::MemoryGovernanceStore;
    use fleetgate_protocol::Policy;

    fn ledger(threshold: u32) -> (Arc<MemoryGovernanceStore>, VoteLedger<MemoryGovernanceStore>) {
        let store = Arc::new(MemoryGovernanceStore::new());
        let finalizer = Finalizer::new(
            Arc::clone(&store),
            GovernanceConfig::new().with_vote_threshold(threshold),
        );
        (Arc::clone(&store), VoteLedger::new(store, finalizer))
    }

    #[test]
    fn precondition_order() {
        let (store, ledger) = ledger(3);
        assert!(matches!(
            ledger.submit_vote(1, 7, "MAYBE"),
            Err(VoteError::NotFound { proposal_id: 7 })
        ));

        store.add_proposal(7);
        assert!(matches!(
            ledger.submit_vote(1, 7, "MAYBE"),
            Err(VoteError::InvalidVote { .. })
        ));

        store.finalize(7, Policy::Allow).unwrap();
        assert!(matches!(
            ledger.submit_vote(1, 7, "MAYBE"),
            Err(VoteError::InvalidState { .. })
        ));
    }

    #[test]
    fn revote_replaces_ballot() {
        let (store, ledger) = ledger(3);
        store.add_proposal(1);
        ledger.submit_vote(10, 1, "ALLOW").unwrap();
        let receipt = ledger.submit_vote(10, 1, "blocklist").unwrap();
        assert_eq!(receipt.tally, VoteTally { allow: 0, block: 1 });
        assert_eq!(receipt.finalized, None);
    }

    #[test]
    fn threshold_vote_finalizes() {
        let (store, ledger) = ledger(2);
        store.add_proposal(1);
        assert_eq!(ledger.submit_vote(1, 1, "ALLOW").unwrap().finalized, None);
        let receipt = ledger.submit_vote(2, 1, "ALLOW").unwrap();
        assert!(matches!(receipt.finalized, Some(FinalizeOutcome::Finalized { .. })));
        assert_eq!(store.rules(), vec![(1, Policy::Allow)]);
    }
}
