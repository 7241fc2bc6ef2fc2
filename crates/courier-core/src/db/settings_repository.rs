//! Settings repository implementation

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::chat_repository::conversion_error;
use crate::models::{SettingKey, SettingRow};
use crate::util::{from_millis, to_millis};

const SETTING_COLUMNS: &str =
    "user_id, key, value, local_version, synced_version, server_version, modified_at, sync_status";

/// Rows of the `settings` table, one per (user, key)
pub struct SqliteSettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSettingsRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, user_id: &str, key: SettingKey) -> rusqlite::Result<Option<SettingRow>> {
        self.conn
            .query_row(
                &format!("SELECT {SETTING_COLUMNS} FROM settings WHERE user_id = ?1 AND key = ?2"),
                params![user_id, key.as_str()],
                row_to_setting,
            )
            .optional()
    }

    pub fn list(&self, user_id: &str) -> rusqlite::Result<Vec<SettingRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SETTING_COLUMNS} FROM settings WHERE user_id = ?1 ORDER BY key"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_setting)?.collect();
        rows
    }

    /// Rows whose local version is ahead of the last acknowledged one
    pub fn list_unsynced(&self, user_id: &str) -> rusqlite::Result<Vec<SettingRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {SETTING_COLUMNS} FROM settings
             WHERE user_id = ?1 AND local_version > synced_version
             ORDER BY key"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_setting)?.collect();
        rows
    }

    pub fn upsert(&self, row: &SettingRow) -> rusqlite::Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO settings (user_id, key, value, local_version, synced_version,
                                       server_version, modified_at, sync_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, key) DO UPDATE SET
                    value = excluded.value,
                    local_version = excluded.local_version,
                    synced_version = excluded.synced_version,
                    server_version = excluded.server_version,
                    modified_at = excluded.modified_at,
                    sync_status = excluded.sync_status",
            )?
            .execute(params![
                row.user_id,
                row.key.as_str(),
                row.value,
                row.local_version,
                row.synced_version,
                row.server_version,
                to_millis(row.modified_at),
                row.sync_status.as_str(),
            ])?;
        Ok(())
    }

    /// Write `row` only if the stored local version still equals `expected`.
    ///
    /// `expected == None` means the row must not exist yet. Returns whether
    /// the write happened.
    pub fn compare_and_set(
        &self,
        row: &SettingRow,
        expected: Option<i64>,
    ) -> rusqlite::Result<bool> {
        let affected = match expected {
            None => self.conn.execute(
                "INSERT OR IGNORE INTO settings (user_id, key, value, local_version, synced_version,
                                                 server_version, modified_at, sync_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.user_id,
                    row.key.as_str(),
                    row.value,
                    row.local_version,
                    row.synced_version,
                    row.server_version,
                    to_millis(row.modified_at),
                    row.sync_status.as_str(),
                ],
            )?,
            Some(expected) => self.conn.execute(
                "UPDATE settings SET
                    value = ?3, local_version = ?4, synced_version = ?5, server_version = ?6,
                    modified_at = ?7, sync_status = ?8
                 WHERE user_id = ?1 AND key = ?2 AND local_version = ?9",
                params![
                    row.user_id,
                    row.key.as_str(),
                    row.value,
                    row.local_version,
                    row.synced_version,
                    row.server_version,
                    to_millis(row.modified_at),
                    row.sync_status.as_str(),
                    expected,
                ],
            )?,
        };
        Ok(affected == 1)
    }
}

fn row_to_setting(row: &Row<'_>) -> rusqlite::Result<SettingRow> {
    let key: String = row.get(1)?;
    let modified_at: i64 = row.get(6)?;
    let status: String = row.get(7)?;

    Ok(SettingRow {
        user_id: row.get(0)?,
        key: key.parse().map_err(|error| conversion_error(1, error))?,
        value: row.get(2)?,
        local_version: row.get(3)?,
        synced_version: row.get(4)?,
        server_version: row.get(5)?,
        modified_at: from_millis(modified_at),
        sync_status: status.parse().map_err(|error| conversion_error(7, error))?,
    })
}
