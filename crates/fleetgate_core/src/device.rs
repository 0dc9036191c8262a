//! Device state upserts.
//!
//! Agents report partial, cycle-dependent telemetry. A merge only ever
//! fills in or replaces values the device actually sent; a missing or
//! blank field leaves the stored value alone. Mode is overwritten whenever
//! a recognizable one arrives.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::types::{Device, DeviceUpdate};

const MERGE_SQL: &str = "
INSERT INTO devices (
    id, serial_num, hostname, os_version, os_build, santa_version,
    primary_user, model_identifier, client_mode, enrolled_at, last_preflight_sync
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
ON CONFLICT(id) DO UPDATE SET
    serial_num          = COALESCE(excluded.serial_num, devices.serial_num),
    hostname            = COALESCE(excluded.hostname, devices.hostname),
    os_version          = COALESCE(excluded.os_version, devices.os_version),
    os_build            = COALESCE(excluded.os_build, devices.os_build),
    santa_version       = COALESCE(excluded.santa_version, devices.santa_version),
    primary_user        = COALESCE(excluded.primary_user, devices.primary_user),
    model_identifier    = COALESCE(excluded.model_identifier, devices.model_identifier),
    client_mode         = COALESCE(excluded.client_mode, devices.client_mode),
    last_preflight_sync = excluded.last_preflight_sync";

const STAMP_PREFLIGHT_SQL: &str = "
INSERT INTO devices (id, enrolled_at, last_preflight_sync) VALUES (?1, ?2, ?2)
ON CONFLICT(id) DO UPDATE SET last_preflight_sync = excluded.last_preflight_sync";

const STAMP_SYNC_SQL: &str = "
INSERT INTO devices (id, enrolled_at, last_sync) VALUES (?1, ?2, ?2)
ON CONFLICT(id) DO UPDATE SET last_sync = excluded.last_sync";

fn check_id(id: &str) -> CoreResult<()> {
    if id.trim().is_empty() {
        return Err(CoreError::invalid_input("device id is empty"));
    }
    Ok(())
}

/// Merges a preflight report into the device row and stamps
/// `last_preflight_sync`.
pub fn merge(
    conn: &Connection,
    id: &str,
    update: &DeviceUpdate,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    check_id(id)?;
    let update = update.clone().normalized();
    if update.is_empty() {
        conn.execute(STAMP_PREFLIGHT_SQL, params![id, now])?;
        return Ok(());
    }
    conn.execute(
        MERGE_SQL,
        params![
            id,
            update.serial_num,
            update.hostname,
            update.os_version,
            update.os_build,
            update.santa_version,
            update.primary_user,
            update.model_identifier,
            update.client_mode.map(|m| m.as_str()),
            now,
        ],
    )?;
    Ok(())
}

/// Stamps `last_sync`, creating the device on first contact.
pub fn touch_last_sync(conn: &Connection, id: &str, now: DateTime<Utc>) -> CoreResult<()> {
    check_id(id)?;
    conn.execute(STAMP_SYNC_SQL, params![id, now])?;
    Ok(())
}

/// Creates the device row if missing, without touching timestamps.
pub fn ensure(conn: &Connection, id: &str, now: DateTime<Utc>) -> CoreResult<()> {
    check_id(id)?;
    conn.execute(
        "INSERT INTO devices (id, enrolled_at) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING",
        params![id, now],
    )?;
    Ok(())
}

/// Loads one device.
pub fn load(conn: &Connection, id: &str) -> CoreResult<Device> {
    conn.query_row("SELECT * FROM devices WHERE id = ?1", [id], Device::from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("device", id))
}

impl Database {
    /// Merges preflight telemetry for a device (see [`merge`]).
    pub fn merge_device(&self, id: &str, update: &DeviceUpdate) -> CoreResult<()> {
        self.write(|tx| merge(tx, id, update, Utc::now()))
    }

    /// Stamps the device's `last_sync`.
    pub fn touch_last_sync(&self, id: &str) -> CoreResult<()> {
        self.write(|tx| touch_last_sync(tx, id, Utc::now()))
    }

    /// Creates the device row if missing.
    pub fn ensure_device(&self, id: &str) -> CoreResult<()> {
        self.write(|tx| ensure(tx, id, Utc::now()))
    }

    /// Loads a device by id.
    pub fn get_device(&self, id: &str) -> CoreResult<Device> {
        self.read(|conn| load(conn, id))
    }

    /// Lists all devices, most recently synced first.
    pub fn list_devices(&self) -> CoreResult<Vec<Device>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM devices
                 ORDER BY COALESCE(last_sync, last_preflight_sync, enrolled_at) DESC, id",
            )?;
            let devices = stmt
                .query_map([], Device::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(devices)
        })
    }
}
