//! Approve command implementation.

use super::{open_store, CommandResult};
use fleetgate_governance::{FinalizeOutcome, Governance, GovernanceConfig, SqliteGovernanceStore};
use fleetgate_protocol::Policy;
use std::path::Path;

/// Finalizes a proposal with `policy`, bypassing the vote counters.
pub fn run(path: &Path, proposal_id: i64, policy: Policy) -> CommandResult<FinalizeOutcome> {
    let db = open_store(path)?;
    let governance = Governance::new(SqliteGovernanceStore::new(db), GovernanceConfig::default());
    let outcome = governance.finalize(proposal_id, policy)?;
    match outcome {
        FinalizeOutcome::Finalized { rule_id } => {
            println!("Approved proposal {proposal_id} as {policy}; created rule {rule_id}")
        }
        FinalizeOutcome::AlreadyFinalized { status } => {
            println!("Proposal {proposal_id} was already {status}; nothing changed")
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::{NewProposal, ProposalStatus};
    use fleetgate_protocol::RuleType;

    #[test]
    fn approves_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        let id = open_store(&path)
            .unwrap()
            .create_proposal(&NewProposal {
                identifier: "EQHXZ8M8AV".into(),
                rule_type: RuleType::TeamId,
                proposed_policy: Policy::Allow,
                custom_message: None,
                created_by: 1,
            })
            .unwrap();

        assert!(run(&path, id, Policy::Block).unwrap().rule_id().is_some());
        assert_eq!(
            run(&path, id, Policy::Allow).unwrap(),
            FinalizeOutcome::AlreadyFinalized {
                status: ProposalStatus::Approved
            }
        );
        assert!(run(&path, id + 1, Policy::Allow).is_err());
    }
}
