//! Test fixtures and database helpers.
//!
//! Provides temporary stores, seeded scenarios and agent request bodies
//! in every framing agents are known to send.

use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use fleetgate_core::{Database, NewProposal, NewRule, StoreConfig};
use fleetgate_protocol::{Policy, RuleType};
use std::io::Write;
use std::path::PathBuf;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            _temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(StoreConfig::file(temp_dir.path().join("fleet.db")))
            .expect("Failed to open file database");
        Self {
            db,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.db.config().path.clone()
    }

    /// Opens another, independent connection to the same file.
    ///
    /// Panics for in-memory databases, which cannot be shared.
    pub fn connect(&self) -> Database {
        let path = self.path().expect("in-memory databases have no second connection");
        Database::open(StoreConfig::file(path)).expect("Failed to reopen file database")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use fleetgate_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         db.touch_last_sync("device-1").unwrap();
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&TestDatabase) -> R,
{
    let test_db = TestDatabase::file();
    f(&test_db)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A 64-character hex identifier derived from `n`.
    pub fn sha256_of(n: u64) -> String {
        format!("{n:064x}")
    }

    /// Creates `count` admin rules and returns their ids in creation order.
    pub fn seed_rules(db: &Database, count: usize) -> Vec<i64> {
        (0..count)
            .map(|i| {
                let policy = if i % 3 == 0 { Policy::Block } else { Policy::Allow };
                db.create_rule(&NewRule::manual(
                    sha256_of(i as u64),
                    policy,
                    RuleType::Binary,
                ))
                .expect("Failed to seed rule")
            })
            .collect()
    }

    /// Creates a pending binary proposal and returns its id.
    pub fn pending_proposal(db: &Database, identifier: &str, created_by: i64) -> i64 {
        db.create_proposal(&NewProposal {
            identifier: identifier.to_string(),
            rule_type: RuleType::Binary,
            proposed_policy: Policy::Allow,
            custom_message: Some("requested by test".into()),
            created_by,
        })
        .expect("Failed to create proposal")
    }
}

/// Agent request bodies in each framing.
pub mod bodies {
    use super::*;

    /// Gzip-framed body.
    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).expect("gzip write");
        enc.finish().expect("gzip finish")
    }

    /// Zlib-wrapped deflate body.
    pub fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).expect("zlib write");
        enc.finish().expect("zlib finish")
    }

    /// Headerless deflate body.
    pub fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).expect("deflate write");
        enc.finish().expect("deflate finish")
    }

    /// A preflight body with the given fields.
    pub fn preflight_json(fields: &[(&str, serde_json::Value)]) -> Vec<u8> {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        serde_json::to_vec(&map).expect("json encode")
    }

    /// An event upload body with one blocked execution per hash.
    pub fn event_upload_json(hashes: &[&str], first_time: f64) -> Vec<u8> {
        let events: Vec<serde_json::Value> = hashes
            .iter()
            .enumerate()
            .map(|(i, hash)| {
                serde_json::json!({
                    "file_sha256": hash,
                    "file_path": format!("/usr/local/bin/tool{i}"),
                    "file_name": format!("tool{i}"),
                    "executing_user": "alice",
                    "execution_time": first_time + i as f64,
                    "decision": "BLOCK_UNKNOWN",
                })
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({ "events": events })).expect("json encode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_database_shares_data() {
        with_file_db(|test_db| {
            let other = test_db.connect();
            test_db.touch_last_sync("d1").unwrap();
            assert!(other.get_device("d1").is_ok());
        });
    }

    #[test]
    fn seeded_rules_ascend() {
        with_temp_db(|db| {
            let ids = scenarios::seed_rules(db, 4);
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
        });
    }

    #[test]
    fn compressed_bodies_decode() {
        let json = bodies::preflight_json(&[("serial_num", "X1".into())]);
        let cases = [
            (bodies::gzip(&json), None),
            (bodies::raw_deflate(&json), None),
            (bodies::zlib(&json), Some("deflate")),
            (bodies::raw_deflate(&json), Some("deflate")),
        ];
        for (body, encoding) in cases {
            let decoded =
                fleetgate_protocol::decode(body.into(), encoding, "application/json").unwrap();
            assert_eq!(&decoded.body[..], &json[..]);
        }
    }
}
