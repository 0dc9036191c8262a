//! The storage seam under the ledger and finalizer.

use fleetgate_core::ProposalStatus;
use fleetgate_protocol::{Policy, VoteType};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::{FinalizeError, FinalizeResult, VoteError, VoteResult};

/// Live vote counts for a proposal, recomputed from the ballots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VoteTally {
    /// Allow ballots.
    pub allow: i64,
    /// Block ballots.
    pub block: i64,
}

/// What a finalize call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// This call moved the proposal out of `PENDING` and created the rule.
    Finalized {
        /// The rule that was created.
        rule_id: i64,
    },
    /// Another call got there first; nothing changed.
    AlreadyFinalized {
        /// The status the proposal already had.
        status: ProposalStatus,
    },
}

impl FinalizeOutcome {
    /// The rule id if this call created one.
    pub fn rule_id(&self) -> Option<i64> {
        match self {
            FinalizeOutcome::Finalized { rule_id } => Some(*rule_id),
            FinalizeOutcome::AlreadyFinalized { .. } => None,
        }
    }
}

/// Storage operations governance needs.
///
/// Each method must be atomic with respect to concurrent calls on the same
/// proposal, across processes if the store is shared.
pub trait GovernanceStore: Send + Sync {
    /// Current status of a proposal.
    fn proposal_status(&self, proposal_id: i64) -> VoteResult<ProposalStatus>;

    /// Upserts the voter's ballot and recomputes both counters from the
    /// live ballots, provided the proposal is still `PENDING`.
    fn record_vote(
        &self,
        voter_id: i64,
        proposal_id: i64,
        vote_type: VoteType,
    ) -> VoteResult<VoteTally>;

    /// Moves a `PENDING` proposal to `APPROVED` and creates its rule, both
    /// or neither. A proposal that is no longer pending is left alone.
    fn finalize(&self, proposal_id: i64, policy: Policy) -> FinalizeResult<FinalizeOutcome>;
}

#[derive(Debug)]
struct MemoryProposal {
    status: ProposalStatus,
    ballots: HashMap<i64, VoteType>,
}

#[derive(Debug, Default)]
struct MemoryState {
    proposals: HashMap<i64, MemoryProposal>,
    rules: Vec<(i64, Policy)>,
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryGovernanceStore {
    state: Mutex<MemoryState>,
}

impl MemoryGovernanceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pending proposal.
    pub fn add_proposal(&self, proposal_id: i64) {
        self.state.lock().proposals.insert(
            proposal_id,
            MemoryProposal {
                status: ProposalStatus::Pending,
                ballots: HashMap::new(),
            },
        );
    }

    /// Rules created so far, as `(proposal_id, policy)`.
    pub fn rules(&self) -> Vec<(i64, Policy)> {
        self.state.lock().rules.clone()
    }
}

impl GovernanceStore for MemoryGovernanceStore {
    fn proposal_status(&self, proposal_id: i64) -> VoteResult<ProposalStatus> {
        self.state
            .lock()
            .proposals
            .get(&proposal_id)
            .map(|p| p.status)
            .ok_or(VoteError::NotFound { proposal_id })
    }

    fn record_vote(
        &self,
        voter_id: i64,
        proposal_id: i64,
        vote_type: VoteType,
    ) -> VoteResult<VoteTally> {
        let mut state = self.state.lock();
        let proposal = state
            .proposals
            .get_mut(&proposal_id)
            .ok_or(VoteError::NotFound { proposal_id })?;
        if proposal.status != ProposalStatus::Pending {
            return Err(VoteError::InvalidState {
                proposal_id,
                status: proposal.status,
            });
        }
        proposal.ballots.insert(voter_id, vote_type);
        let allow = proposal
            .ballots
            .values()
            .filter(|v| **v == VoteType::Allow)
            .count();
        let count = |n: usize| i64::try_from(n).unwrap_or(i64::MAX);
        Ok(VoteTally {
            allow: count(allow),
            block: count(proposal.ballots.len() - allow),
        })
    }

    fn finalize(&self, proposal_id: i64, policy: Policy) -> FinalizeResult<FinalizeOutcome> {
        let mut state = self.state.lock();
        let proposal = state
            .proposals
            .get_mut(&proposal_id)
            .ok_or(FinalizeError::NotFound { proposal_id })?;
        if proposal.status != ProposalStatus::Pending {
            return Ok(FinalizeOutcome::AlreadyFinalized {
                status: proposal.status,
            });
        }
        proposal.status = ProposalStatus::Approved;
        state.rules.push((proposal_id, policy));
        let rule_id = i64::try_from(state.rules.len()).unwrap_or(i64::MAX);
        Ok(FinalizeOutcome::Finalized { rule_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_upserts() {
        let store = MemoryGovernanceStore::new();
        store.add_proposal(1);
        store.record_vote(10, 1, VoteType::Allow).unwrap();
        let tally = store.record_vote(10, 1, VoteType::Block).unwrap();
        assert_eq!(tally, VoteTally { allow: 0, block: 1 });
    }

    #[test]
    fn memory_store_finalizes_once() {
        let store = MemoryGovernanceStore::new();
        store.add_proposal(1);
        assert_eq!(
            store.finalize(1, Policy::Allow).unwrap(),
            FinalizeOutcome::Finalized { rule_id: 1 }
        );
        assert_eq!(
            store.finalize(1, Policy::Block).unwrap(),
            FinalizeOutcome::AlreadyFinalized {
                status: ProposalStatus::Approved
            }
        );
        assert_eq!(store.rules(), vec![(1, Policy::Allow)]);
        assert!(matches!(
            store.record_vote(1, 1, VoteType::Allow),
            Err(VoteError::InvalidState { .. })
        ));
    }

    #[test]
    fn outcome_rule_id() {
        assert_eq!(FinalizeOutcome::Finalized { rule_id: 4 }.rule_id(), Some(4));
        let lost = FinalizeOutcome::AlreadyFinalized {
            status: ProposalStatus::Approved,
        };
        assert_eq!(lost.rule_id(), None);
    }
}
