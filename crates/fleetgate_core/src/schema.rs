//! Schema bootstrap.
//!
//! Every statement is idempotent, so opening an existing database is the
//! same operation as creating a new one.

use rusqlite::Connection;

use crate::error::CoreResult;

/// Statements run on every open, in order.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS devices (
    id                  TEXT PRIMARY KEY NOT NULL,
    serial_num          TEXT,
    hostname            TEXT,
    os_version          TEXT,
    os_build            TEXT,
    santa_version       TEXT,
    primary_user        TEXT,
    model_identifier    TEXT,
    client_mode         TEXT CHECK (client_mode IN ('MONITOR', 'LOCKDOWN')),
    enrolled_at         TEXT NOT NULL,
    last_sync           TEXT,
    last_preflight_sync TEXT
);

CREATE TABLE IF NOT EXISTS proposals (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier      TEXT NOT NULL,
    rule_type       TEXT NOT NULL
        CHECK (rule_type IN ('BINARY', 'CERTIFICATE', 'SIGNINGID', 'TEAMID', 'CDHASH')),
    proposed_policy TEXT NOT NULL CHECK (proposed_policy IN ('ALLOWLIST', 'BLOCKLIST')),
    custom_message  TEXT,
    created_by      INTEGER NOT NULL,
    status          TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (status IN ('PENDING', 'APPROVED', 'REJECTED')),
    allow_votes     INTEGER NOT NULL DEFAULT 0,
    block_votes     INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    finalized_at    TEXT
);

CREATE TABLE IF NOT EXISTS votes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    voter_id    INTEGER NOT NULL,
    proposal_id INTEGER NOT NULL REFERENCES proposals(id) ON DELETE CASCADE,
    vote_type   TEXT NOT NULL CHECK (vote_type IN ('ALLOWLIST', 'BLOCKLIST')),
    created_at  TEXT NOT NULL,
    UNIQUE (voter_id, proposal_id)
);

CREATE TABLE IF NOT EXISTS rules (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier  TEXT NOT NULL,
    policy      TEXT NOT NULL CHECK (policy IN ('ALLOWLIST', 'BLOCKLIST')),
    rule_type   TEXT NOT NULL
        CHECK (rule_type IN ('BINARY', 'CERTIFICATE', 'SIGNINGID', 'TEAMID', 'CDHASH')),
    custom_msg  TEXT,
    comment     TEXT,
    created_by  INTEGER,
    proposal_id INTEGER REFERENCES proposals(id) ON DELETE SET NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id           TEXT NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    file_hash           TEXT NOT NULL,
    file_path           TEXT,
    file_name           TEXT,
    execution_time      TEXT NOT NULL,
    decision            TEXT,
    executing_user      TEXT,
    cert_sha256         TEXT,
    cert_cn             TEXT,
    team_id             TEXT,
    signing_id          TEXT,
    cdhash              TEXT,
    bundle_id           TEXT,
    bundle_name         TEXT,
    bundle_path         TEXT,
    quarantine_data_url TEXT,
    UNIQUE (device_id, file_hash, execution_time)
);

CREATE TABLE IF NOT EXISTS sessions (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id    INTEGER NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status);
CREATE INDEX IF NOT EXISTS idx_votes_proposal ON votes(proposal_id);
CREATE INDEX IF NOT EXISTS idx_rules_identifier ON rules(identifier);
CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_proposal
    ON rules(proposal_id) WHERE proposal_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_events_device ON events(device_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);
";

/// Creates any missing tables and indexes.
pub(crate) fn bootstrap(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
