//! Propose command implementation.

use super::{open_store, CommandResult};
use fleetgate_core::NewProposal;
use fleetgate_protocol::{Policy, RuleType};
use std::path::Path;

/// Creates a pending proposal and prints its id.
pub fn run(
    path: &Path,
    identifier: String,
    rule_type: RuleType,
    policy: Policy,
    message: Option<String>,
    created_by: i64,
) -> CommandResult {
    let identifier = identifier.trim().to_string();
    if identifier.is_empty() {
        return Err("identifier must not be empty".into());
    }

    let db = open_store(path)?;
    let id = db.create_proposal(&NewProposal {
        identifier,
        rule_type,
        proposed_policy: policy,
        custom_message: message,
        created_by,
    })?;
    println!("Created proposal {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::ProposalStatus;

    #[test]
    fn creates_pending_proposal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.db");
        run(&path, " abc123 ".into(), RuleType::Binary, Policy::Block, None, 4).unwrap();

        let proposal = open_store(&path).unwrap().get_proposal(1).unwrap();
        assert_eq!(proposal.identifier, "abc123");
        assert_eq!(proposal.proposed_policy, Policy::Block);
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert!(run(&path, "  ".into(), RuleType::Binary, Policy::Allow, None, 4).is_err());
    }
}
