//! Proposal finalization.

use fleetgate_protocol::Policy;
use std::sync::Arc;

use crate::config::GovernanceConfig;
use crate::error::FinalizeResult;
use crate::store::{FinalizeOutcome, GovernanceStore, VoteTally};

/// Decides proposals, from a vote threshold or an administrator.
///
/// Both paths go through [`GovernanceStore::finalize`], so concurrent
/// callers racing on one proposal produce exactly one rule; the losers see
/// [`FinalizeOutcome::AlreadyFinalized`].
pub struct Finalizer<S: GovernanceStore> {
    store: Arc<S>,
    config: GovernanceConfig,
}

impl<S: GovernanceStore> Clone for Finalizer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config,
        }
    }
}

impl<S: GovernanceStore> Finalizer<S> {
    /// Creates a finalizer over a shared store.
    pub fn new(store: Arc<S>, config: GovernanceConfig) -> Self {
        Self { store, config }
    }

    /// Finalizes a proposal with the given policy.
    pub fn finalize(&self, proposal_id: i64, policy: Policy) -> FinalizeResult<FinalizeOutcome> {
        let outcome = self.store.finalize(proposal_id, policy)?;
        match outcome {
            FinalizeOutcome::Finalized { rule_id } => {
                tracing::info!(proposal_id, rule_id, %policy, "proposal finalized");
            }
            FinalizeOutcome::AlreadyFinalized { status } => {
                tracing::debug!(proposal_id, %status, "proposal already finalized");
            }
        }
        Ok(outcome)
    }

    /// The policy a tally has decided, if any. Allow is checked first.
    pub fn decided_policy(&self, tally: &VoteTally) -> Option<Policy> {
        let threshold = self.config.threshold();
        if tally.allow >= threshold {
            Some(Policy::Allow)
        } else if tally.block >= threshold {
            Some(Policy::Block)
        } else {
            None
        }
    }

    /// Finalizes the proposal if the tally has reached the threshold.
    pub fn check_threshold(
        &self,
        proposal_id: i64,
        tally: &VoteTally,
    ) -> FinalizeResult<Option<FinalizeOutcome>> {
        match self.decided_policy(tally) {
            Some(policy) => self.finalize(proposal_id, policy).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGovernanceStore;

    fn finalizer(threshold: u32) -> (Arc<MemoryGovernanceStore>, Finalizer<MemoryGovernanceStore>) {
        let store = Arc::new(MemoryGovernanceStore::new());
        let config = GovernanceConfig::new().with_vote_threshold(threshold);
        (Arc::clone(&store), Finalizer::new(store, config))
    }

    #[test]
    fn threshold_decisions() {
        let (_, f) = finalizer(3);
        assert_eq!(f.decided_policy(&VoteTally { allow: 2, block: 2 }), None);
        assert_eq!(f.decided_policy(&VoteTally { allow: 3, block: 0 }), Some(Policy::Allow));
        assert_eq!(f.decided_policy(&VoteTally { allow: 0, block: 4 }), Some(Policy::Block));
        assert_eq!(f.decided_policy(&VoteTally { allow: 3, block: 3 }), Some(Policy::Allow));
    }

    #[test]
    fn below_threshold_does_nothing() {
        let (store, f) = finalizer(3);
        store.add_proposal(1);
        assert_eq!(f.check_threshold(1, &VoteTally { allow: 2, block: 0 }).unwrap(), None);
        assert!(store.rules().is_empty());
    }

    #[test]
    fn override_bypasses_counters() {
        let (store, f) = finalizer(100);
        store.add_proposal(1);
        let outcome = f.finalize(1, Policy::Block).unwrap();
        assert!(outcome.rule_id().is_some());
        assert_eq!(store.rules(), vec![(1, Policy::Block)]);
    }
}
