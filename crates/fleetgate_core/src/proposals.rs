//! Proposal store.
//!
//! Only creation, lookup and deletion live here. Voting and finalization
//! change proposals under stricter rules and go through the governance
//! crate.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::types::{NewProposal, Proposal, ProposalStatus, Vote};

/// Inserts a pending proposal and returns its id.
pub fn insert(conn: &Connection, proposal: &NewProposal, now: DateTime<Utc>) -> CoreResult<i64> {
    if proposal.identifier.trim().is_empty() {
        return Err(CoreError::invalid_input("proposal identifier is empty"));
    }
    conn.execute(
        "INSERT INTO proposals
            (identifier, rule_type, proposed_policy, custom_message, created_by, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6)",
        params![
            proposal.identifier.trim(),
            proposal.rule_type.as_str(),
            proposal.proposed_policy.as_str(),
            proposal.custom_message,
            proposal.created_by,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Loads a proposal, or `None` if it does not exist.
pub fn find(conn: &Connection, id: i64) -> CoreResult<Option<Proposal>> {
    Ok(conn
        .query_row("SELECT * FROM proposals WHERE id = ?1", [id], Proposal::from_row)
        .optional()?)
}

/// Loads a proposal.
pub fn load(conn: &Connection, id: i64) -> CoreResult<Proposal> {
    find(conn, id)?.ok_or_else(|| CoreError::not_found("proposal", id))
}

/// The voter's live ballot on a proposal, if any.
pub fn vote_of(conn: &Connection, voter_id: i64, proposal_id: i64) -> CoreResult<Option<Vote>> {
    Ok(conn
        .query_row(
            "SELECT * FROM votes WHERE voter_id = ?1 AND proposal_id = ?2",
            params![voter_id, proposal_id],
            Vote::from_row,
        )
        .optional()?)
}

impl Database {
    /// Creates a pending proposal.
    pub fn create_proposal(&self, proposal: &NewProposal) -> CoreResult<i64> {
        let id = self.write(|tx| insert(tx, proposal, Utc::now()))?;
        tracing::info!(
            proposal_id = id,
            identifier = %proposal.identifier,
            rule_type = %proposal.rule_type,
            created_by = proposal.created_by,
            "created proposal"
        );
        Ok(id)
    }

    /// Loads a proposal by id.
    pub fn get_proposal(&self, id: i64) -> CoreResult<Proposal> {
        self.read(|conn| load(conn, id))
    }

    /// Lists proposals, newest first, optionally by status.
    pub fn list_proposals(&self, status: Option<ProposalStatus>) -> CoreResult<Vec<Proposal>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM proposals WHERE ?1 IS NULL OR status = ?1 ORDER BY id DESC",
            )?;
            let proposals = stmt
                .query_map([status.map(ProposalStatus::as_str)], Proposal::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(proposals)
        })
    }

    /// Deletes a proposal and its votes. A rule it produced survives with
    /// its provenance cleared.
    pub fn delete_proposal(&self, id: i64) -> CoreResult<()> {
        let deleted =
            self.write(|tx| Ok(tx.execute("DELETE FROM proposals WHERE id = ?1", [id])?))?;
        if deleted == 0 {
            return Err(CoreError::not_found("proposal", id));
        }
        tracing::info!(proposal_id = id, "deleted proposal");
        Ok(())
    }

    /// The voter's live ballot on a proposal, if any.
    pub fn vote_of(&self, voter_id: i64, proposal_id: i64) -> CoreResult<Option<Vote>> {
        self.read(|conn| vote_of(conn, voter_id, proposal_id))
    }

    /// All live ballots on a proposal, oldest first.
    pub fn votes_for(&self, proposal_id: i64) -> CoreResult<Vec<Vote>> {
        self.read(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM votes WHERE proposal_id = ?1 ORDER BY id ASC")?;
            let votes = stmt
                .query_map([proposal_id], Vote::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(votes)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::{Policy, RuleType};

    fn new_proposal(identifier: &str) -> NewProposal {
        NewProposal {
            identifier: identifier.to_string(),
            rule_type: RuleType::SigningId,
            proposed_policy: Policy::Allow,
            custom_message: Some("needed for builds".into()),
            created_by: 7,
        }
    }

    #[test]
    fn create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_proposal(&new_proposal("EQHXZ8M8AV:com.vendor.tool")).unwrap();
        let proposal = db.get_proposal(id).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert_eq!(proposal.allow_votes, 0);
        assert_eq!(proposal.block_votes, 0);
        assert_eq!(proposal.created_by, 7);
        assert!(proposal.finalized_at.is_none());
    }

    #[test]
    fn list_by_status() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_proposal(&new_proposal("a")).unwrap();
        let b = db.create_proposal(&new_proposal("b")).unwrap();
        db.write(|tx| {
            tx.execute("UPDATE proposals SET status = 'APPROVED' WHERE id = ?1", [a])?;
            Ok(())
        })
        .unwrap();

        let pending = db.list_proposals(Some(ProposalStatus::Pending)).unwrap();
        assert_eq!(pending.iter().map(|p| p.id).collect::<Vec<_>>(), vec![b]);
        assert_eq!(db.list_proposals(None).unwrap().len(), 2);
    }

    #[test]
    fn delete_cascades_votes() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_proposal(&new_proposal("a")).unwrap();
        db.write(|tx| {
            tx.execute(
                "INSERT INTO votes (voter_id, proposal_id, vote_type, created_at)
                 VALUES (1, ?1, 'ALLOWLIST', '2024-01-01T00:00:00Z')",
                [id],
            )?;
            Ok(())
        })
        .unwrap();
        assert!(db.vote_of(1, id).unwrap().is_some());

        db.delete_proposal(id).unwrap();
        assert!(db.vote_of(1, id).unwrap().is_none());
        assert!(db.get_proposal(id).unwrap_err().is_not_found());
        assert!(db.delete_proposal(id).unwrap_err().is_not_found());
    }
}
