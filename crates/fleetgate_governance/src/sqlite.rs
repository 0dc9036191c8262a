//! `GovernanceStore` over the fleetgate SQLite store.

use chrono::Utc;
use fleetgate_core::rusqlite::params;
use fleetgate_core::{proposals, rules, Database, NewRule, ProposalStatus};
use fleetgate_protocol::{Policy, VoteType};

use crate::error::{FinalizeError, FinalizeResult, VoteError, VoteResult};
use crate::store::{FinalizeOutcome, GovernanceStore, VoteTally};

const UPSERT_VOTE_SQL: &str = "
INSERT INTO votes (voter_id, proposal_id, vote_type, created_at) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(voter_id, proposal_id) DO UPDATE SET
    vote_type  = excluded.vote_type,
    created_at = excluded.created_at";

const RECOUNT_SQL: &str = "
UPDATE proposals SET
    allow_votes = (SELECT COUNT(*) FROM votes WHERE proposal_id = ?1 AND vote_type = 'ALLOWLIST'),
    block_votes = (SELECT COUNT(*) FROM votes WHERE proposal_id = ?1 AND vote_type = 'BLOCKLIST')
WHERE id = ?1";

/// Conditional transition. Zero rows changed means another caller
/// already decided the proposal.
const APPROVE_SQL: &str = "
UPDATE proposals SET status = 'APPROVED', finalized_at = ?2
WHERE id = ?1 AND status = 'PENDING'";

enum Gate<T> {
    Missing,
    Closed(ProposalStatus),
    Open(T),
}

/// Governance store backed by a [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteGovernanceStore {
    db: Database,
}

impl SqliteGovernanceStore {
    /// Wraps a database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl GovernanceStore for SqliteGovernanceStore {
    fn proposal_status(&self, proposal_id: i64) -> VoteResult<ProposalStatus> {
        self.db
            .read(|conn| proposals::find(conn, proposal_id))?
            .map(|p| p.status)
            .ok_or(VoteError::NotFound { proposal_id })
    }

    fn record_vote(
        &self,
        voter_id: i64,
        proposal_id: i64,
        vote_type: VoteType,
    ) -> VoteResult<VoteTally> {
        let gate = self.db.write(|tx| {
            let Some(proposal) = proposals::find(tx, proposal_id)? else {
                return Ok(Gate::Missing);
            };
            if proposal.status != ProposalStatus::Pending {
                return Ok(Gate::Closed(proposal.status));
            }
            tx.execute(
                UPSERT_VOTE_SQL,
                params![voter_id, proposal_id, vote_type.as_str(), Utc::now()],
            )?;
            tx.execute(RECOUNT_SQL, [proposal_id])?;
            let tally = tx.query_row(
                "SELECT allow_votes, block_votes FROM proposals WHERE id = ?1",
                [proposal_id],
                |row| {
                    Ok(VoteTally {
                        allow: row.get(0)?,
                        block: row.get(1)?,
                    })
                },
            )?;
            Ok(Gate::Open(tally))
        })?;

        match gate {
            Gate::Missing => Err(VoteError::NotFound { proposal_id }),
            Gate::Closed(status) => Err(VoteError::InvalidState {
                proposal_id,
                status,
            }),
            Gate::Open(tally) => Ok(tally),
        }
    }

    fn finalize(&self, proposal_id: i64, policy: Policy) -> FinalizeResult<FinalizeOutcome> {
        let gate = self.db.write(|tx| {
            let Some(proposal) = proposals::find(tx, proposal_id)? else {
                return Ok(Gate::Missing);
            };
            let now = Utc::now();
            if tx.execute(APPROVE_SQL, params![proposal_id, now])? == 0 {
                return Ok(Gate::Closed(proposal.status));
            }
            let rule_id = rules::insert(tx, &NewRule::from_proposal(&proposal, policy), now)?;
            Ok(Gate::Open(rule_id))
        })?;

        match gate {
            Gate::Missing => Err(FinalizeError::NotFound { proposal_id }),
            Gate::Closed(status) => Ok(FinalizeOutcome::AlreadyFinalized { status }),
            Gate::Open(rule_id) => Ok(FinalizeOutcome::Finalized { rule_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::{NewProposal, RuleFilter};
    use fleetgate_protocol::RuleType;

    fn setup() -> (SqliteGovernanceStore, i64) {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .create_proposal(&NewProposal {
                identifier: "a".repeat(64),
                rule_type: RuleType::Binary,
                proposed_policy: Policy::Allow,
                custom_message: Some("build tool".into()),
                created_by: 3,
            })
            .unwrap();
        (SqliteGovernanceStore::new(db), id)
    }

    #[test]
    fn vote_upsert_keeps_one_row() {
        let (store, id) = setup();
        store.record_vote(1, id, VoteType::Allow).unwrap();
        let tally = store.record_vote(1, id, VoteType::Block).unwrap();
        assert_eq!(tally, VoteTally { allow: 0, block: 1 });

        let votes = store.database().votes_for(id).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::Block);
    }

    #[test]
    fn counters_match_ballots() {
        let (store, id) = setup();
        for voter in 1..=4 {
            let side = if voter % 2 == 0 { VoteType::Block } else { VoteType::Allow };
            store.record_vote(voter, id, side).unwrap();
        }
        let proposal = store.database().get_proposal(id).unwrap();
        assert_eq!((proposal.allow_votes, proposal.block_votes), (2, 2));
    }

    #[test]
    fn finalize_creates_rule_with_provenance() {
        let (store, id) = setup();
        let outcome = store.finalize(id, Policy::Block).unwrap();
        let rule_id = outcome.rule_id().unwrap();

        let db = store.database();
        let rule = db.get_rule(rule_id).unwrap();
        assert_eq!(rule.policy, Policy::Block);
        assert_eq!(rule.proposal_id, Some(id));
        assert_eq!(rule.created_by, Some(3));
        assert_eq!(rule.custom_msg.as_deref(), Some("build tool"));

        let proposal = db.get_proposal(id).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert!(proposal.finalized_at.is_some());
    }

    #[test]
    fn second_finalize_is_a_no_op() {
        let (store, id) = setup();
        store.finalize(id, Policy::Allow).unwrap();
        assert_eq!(
            store.finalize(id, Policy::Block).unwrap(),
            FinalizeOutcome::AlreadyFinalized {
                status: ProposalStatus::Approved
            }
        );
        assert_eq!(store.database().list_rules(RuleFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn missing_proposal() {
        let (store, _) = setup();
        assert!(matches!(
            store.finalize(999, Policy::Allow),
            Err(FinalizeError::NotFound { proposal_id: 999 })
        ));
        assert!(matches!(
            store.record_vote(1, 999, VoteType::Allow),
            Err(VoteError::NotFound { proposal_id: 999 })
        ));
    }

    #[test]
    fn closed_proposal_rejects_votes() {
        let (store, id) = setup();
        store.finalize(id, Policy::Allow).unwrap();
        assert!(matches!(
            store.record_vote(1, id, VoteType::Allow),
            Err(VoteError::InvalidState { .. })
        ));
        assert!(store.database().votes_for(id).unwrap().is_empty());
    }
}
