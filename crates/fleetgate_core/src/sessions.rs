//! Session records for issued tokens.
//!
//! Only a SHA-256 of each token is stored, so a leaked database does not
//! leak usable credentials.

use chrono::{DateTime, Utc};
use rusqlite::params;
use sha2::{Digest, Sha256};

use crate::database::Database;
use crate::error::CoreResult;

/// Hex SHA-256 of a bearer token, the key sessions are stored under.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl Database {
    /// Records a session for an issued token.
    pub fn record_session(
        &self,
        user_id: i64,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let hash = token_hash(token);
        self.write(|tx| {
            tx.execute(
                "INSERT INTO sessions (user_id, token_hash, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(token_hash) DO UPDATE SET expires_at = excluded.expires_at",
                params![user_id, hash, expires_at, Utc::now()],
            )?;
            Ok(())
        })
    }

    /// Returns true if the token has an unexpired session.
    pub fn session_active(&self, token: &str, now: DateTime<Utc>) -> CoreResult<bool> {
        let hash = token_hash(token);
        self.read(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE token_hash = ?1 AND expires_at > ?2",
                params![hash, now],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Revokes a token. Returns false if it had no session.
    pub fn revoke_session(&self, token: &str) -> CoreResult<bool> {
        let hash = token_hash(token);
        let deleted = self.write(|tx| {
            Ok(tx.execute("DELETE FROM sessions WHERE token_hash = ?1", [hash])?)
        })?;
        Ok(deleted > 0)
    }

    /// Deletes sessions that expired at or before `now`.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        self.write(|tx| {
            Ok(tx.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?)
        })
    }
}
