//! Rule store.
//!
//! Rule ids come from an `AUTOINCREMENT` key and are never reused, which
//! is what makes them usable as a download watermark.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::types::{NewRule, Rule, RuleFilter};

/// Inserts a rule and returns its id.
pub fn insert(conn: &Connection, rule: &NewRule, now: DateTime<Utc>) -> CoreResult<i64> {
    if rule.identifier.trim().is_empty() {
        return Err(CoreError::invalid_input("rule identifier is empty"));
    }
    conn.execute(
        "INSERT INTO rules
            (identifier, policy, rule_type, custom_msg, comment, created_by, proposal_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            rule.identifier.trim(),
            rule.policy.as_str(),
            rule.rule_type.as_str(),
            rule.custom_msg,
            rule.comment,
            rule.created_by,
            rule.proposal_id,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Loads one rule.
pub fn load(conn: &Connection, id: i64) -> CoreResult<Rule> {
    conn.query_row("SELECT * FROM rules WHERE id = ?1", [id], Rule::from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("rule", id))
}

/// Rules with id strictly greater than `cursor`, ascending, at most `limit`.
pub fn after(conn: &Connection, cursor: i64, limit: usize) -> CoreResult<Vec<Rule>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt =
        conn.prepare_cached("SELECT * FROM rules WHERE id > ?1 ORDER BY id ASC LIMIT ?2")?;
    let rules = stmt
        .query_map(params![cursor, limit], Rule::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

impl Database {
    /// Creates an admin-authored rule.
    pub fn create_rule(&self, rule: &NewRule) -> CoreResult<i64> {
        let id = self.write(|tx| insert(tx, rule, Utc::now()))?;
        tracing::info!(
            rule_id = id,
            identifier = %rule.identifier,
            policy = %rule.policy,
            rule_type = %rule.rule_type,
            "created rule"
        );
        Ok(id)
    }

    /// Loads a rule by id.
    pub fn get_rule(&self, id: i64) -> CoreResult<Rule> {
        self.read(|conn| load(conn, id))
    }

    /// One download page: rules after `cursor`, ascending, at most `limit`.
    pub fn rules_after(&self, cursor: i64, limit: usize) -> CoreResult<Vec<Rule>> {
        self.read(|conn| after(conn, cursor, limit))
    }

    /// Lists rules matching `filter`, newest first.
    pub fn list_rules(&self, filter: RuleFilter) -> CoreResult<Vec<Rule>> {
        let mut sql = String::from("SELECT * FROM rules WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(policy) = filter.policy {
            sql.push_str(" AND policy = ?");
            args.push(Value::Text(policy.as_str().to_string()));
        }
        if let Some(rule_type) = filter.rule_type {
            sql.push_str(" AND rule_type = ?");
            args.push(Value::Text(rule_type.as_str().to_string()));
        }
        sql.push_str(" ORDER BY id DESC");

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rules = stmt
                .query_map(params_from_iter(args.iter()), Rule::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rules)
        })
    }

    /// Deletes a rule.
    pub fn delete_rule(&self, id: i64) -> CoreResult<()> {
        let deleted = self.write(|tx| Ok(tx.execute("DELETE FROM rules WHERE id = ?1", [id])?))?;
        if deleted == 0 {
            return Err(CoreError::not_found("rule", id));
        }
        tracing::info!(rule_id = id, "deleted rule");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_protocol::{Policy, RuleType};

    fn seed(db: &Database, n: usize) -> Vec<i64> {
        (0..n)
            .map(|i| {
                let policy = if i % 2 == 0 { Policy::Allow } else { Policy::Block };
                db.create_rule(&NewRule::manual(format!("{i:064x}"), policy, RuleType::Binary))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn create_and_get() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .create_rule(
                &NewRule::manual("EQHXZ8M8AV", Policy::Allow, RuleType::TeamId)
                    .with_comment("vendor")
                    .with_custom_msg("approved vendor"),
            )
            .unwrap();
        let rule = db.get_rule(id).unwrap();
        assert_eq!(rule.identifier, "EQHXZ8M8AV");
        assert_eq!(rule.rule_type, RuleType::TeamId);
        assert_eq!(rule.comment.as_deref(), Some("vendor"));
        assert_eq!(rule.proposal_id, None);
        assert_eq!(rule.to_wire().custom_msg.as_deref(), Some("approved vendor"));
    }

    #[test]
    fn pages_are_ascending_and_bounded() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed(&db, 7);
        let page = db.rules_after(0, 3).unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), ids[..3]);
        let page = db.rules_after(ids[5], 3).unwrap();
        assert_eq!(page.len(), 1);
        assert!(db.rules_after(ids[6], 3).unwrap().is_empty());
    }

    #[test]
    fn ids_not_reused_after_delete() {
        let db = Database::open_in_memory().unwrap();
        let ids = seed(&db, 2);
        db.delete_rule(ids[1]).unwrap();
        let next = seed(&db, 1)[0];
        assert!(next > ids[1]);
        assert!(db.delete_rule(ids[1]).unwrap_err().is_not_found());
    }

    #[test]
    fn filtered_listing() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, 5);
        let allow = db
            .list_rules(RuleFilter {
                policy: Some(Policy::Allow),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(allow.len(), 3);
        assert!(allow.windows(2).all(|w| w[0].id > w[1].id));
        let certs = db
            .list_rules(RuleFilter {
                rule_type: Some(RuleType::Certificate),
                ..Default::default()
            })
            .unwrap();
        assert!(certs.is_empty());
    }

    #[test]
    fn blank_identifier_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db
            .create_rule(&NewRule::manual(" ", Policy::Block, RuleType::Binary))
            .is_err());
    }
}
