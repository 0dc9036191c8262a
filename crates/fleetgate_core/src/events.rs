//! Execution event ingestion.

use chrono::{DateTime, Utc};
use fleetgate_protocol::AgentEvent;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::database::Database;
use crate::error::CoreResult;
use crate::types::{EventFilter, EventPage, ExecutionEvent};

/// Outcome of ingesting one upload batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Events in the batch.
    pub attempted: usize,
    /// Newly stored rows.
    pub stored: usize,
    /// Events already stored by an earlier upload.
    pub duplicates: usize,
    /// Events without a file hash.
    pub skipped: usize,
    /// Events the store rejected.
    pub failed: usize,
}

/// Converts an agent timestamp (epoch seconds, fractional) to UTC.
pub fn epoch_to_utc(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    let whole = seconds.trunc();
    let nanos = ((seconds - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

fn insert_one(
    conn: &Connection,
    device_id: &str,
    file_hash: &str,
    event: &AgentEvent,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    let execution_time = event.execution_time.and_then(epoch_to_utc).unwrap_or(now);
    conn.prepare_cached(
        "INSERT OR IGNORE INTO events (
            device_id, file_hash, file_path, file_name, execution_time, decision,
            executing_user, cert_sha256, cert_cn, team_id, signing_id, cdhash,
            bundle_id, bundle_name, bundle_path, quarantine_data_url
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
    )?
    .execute(params![
        device_id,
        file_hash,
        event.file_path,
        event.file_name,
        execution_time,
        event.decision,
        event.executing_user,
        event.certificate_sha256,
        event.certificate_cn,
        event.team_id,
        event.signing_id,
        event.cdhash,
        event.bundle_id,
        event.bundle_name,
        event.bundle_path,
        event.quarantine_data_url,
    ])
}

/// Stores a batch of events for a device.
///
/// Failures are per event: a rejected row is logged and counted, and the
/// rest of the batch still goes in.
pub fn ingest(
    conn: &Connection,
    device_id: &str,
    events: &[AgentEvent],
    now: DateTime<Utc>,
) -> CoreResult<IngestReport> {
    crate::device::ensure(conn, device_id, now)?;

    let mut report = IngestReport {
        attempted: events.len(),
        ..Default::default()
    };
    for (index, event) in events.iter().enumerate() {
        let hash = event.file_sha256.as_deref().map(str::trim).unwrap_or_default();
        if hash.is_empty() {
            tracing::debug!(device_id, index, "skipping event without file hash");
            report.skipped += 1;
            continue;
        }
        match insert_one(conn, device_id, hash, event, now) {
            Ok(0) => report.duplicates += 1,
            Ok(_) => report.stored += 1,
            Err(e) => {
                tracing::warn!(device_id, index, file_hash = hash, error = %e, "failed to store event");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

impl Database {
    /// Stores an uploaded batch (see [`ingest`]).
    pub fn record_events(
        &self,
        device_id: &str,
        events: &[AgentEvent],
    ) -> CoreResult<IngestReport> {
        self.write(|tx| ingest(tx, device_id, events, Utc::now()))
    }

    /// One page of events matching `filter`, newest first.
    ///
    /// `page` is 1-based; zero is treated as the first page. A zero `limit`
    /// returns an empty page that still carries the total.
    pub fn list_events(
        &self,
        filter: &EventFilter,
        page: u32,
        limit: u32,
    ) -> CoreResult<EventPage> {
        let page = page.max(1);
        let mut clause = String::from(" WHERE 1 = 1");
        let mut args: Vec<Value> = Vec::new();
        if let Some(device_id) = filter.device_id.as_deref().filter(|d| !d.is_empty()) {
            clause.push_str(" AND device_id = ?");
            args.push(Value::Text(device_id.to_string()));
        }
        if let Some(decision) = filter.decision.as_deref().filter(|d| !d.is_empty()) {
            clause.push_str(" AND decision = ?");
            args.push(Value::Text(decision.to_string()));
        }

        let offset = i64::from(page - 1) * i64::from(limit);
        let select = format!(
            "SELECT * FROM events{clause}
             ORDER BY execution_time DESC, id DESC LIMIT {limit} OFFSET {offset}"
        );
        let count = format!("SELECT COUNT(*) FROM events{clause}");

        self.read(|conn| {
            let total: i64 =
                conn.query_row(&count, params_from_iter(args.iter()), |row| row.get(0))?;
            let mut stmt = conn.prepare(&select)?;
            let events = stmt
                .query_map(params_from_iter(args.iter()), ExecutionEvent::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(EventPage {
                events,
                total: u64::try_from(total).unwrap_or_default(),
                page,
                limit,
            })
        })
    }
}
