//! Database migrations

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    debug_assert_eq!(get_version(conn)?, CURRENT_VERSION);
    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();

    Ok(version.unwrap_or(0))
}

fn apply(conn: &mut Connection, version: i32, schema: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(schema)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        params![version],
    )?;
    tx.commit()?;

    tracing::info!(version, "Migrated database");
    Ok(())
}

/// Migration to version 1: chat replica
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        1,
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS chats (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            picture_url TEXT,
            rules TEXT NOT NULL DEFAULT '[]',
            unread_messages_count INTEGER NOT NULL DEFAULT 0,
            last_read_message_id TEXT,
            last_activity_at INTEGER,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chats_activity ON chats(last_activity_at DESC);

        CREATE TABLE IF NOT EXISTS participants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            picture_url TEXT,
            joined_at INTEGER NOT NULL,
            online_at INTEGER,
            is_admin INTEGER NOT NULL DEFAULT 0,
            is_moderator INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            participant_id TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
            PRIMARY KEY (chat_id, participant_id)
        );
        CREATE INDEX IF NOT EXISTS idx_chat_participants_participant
            ON chat_participants(participant_id);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            parent_id TEXT,
            sender_id TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            sent_at INTEGER,
            delivered_at INTEGER,
            edited_at INTEGER,
            delivery_status TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat_created ON messages(chat_id, created_at);
        ",
    )
}

/// Migration to version 2: settings sync state and the delta cursor
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        2,
        "
        CREATE TABLE IF NOT EXISTS settings (
            user_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            local_version INTEGER NOT NULL,
            synced_version INTEGER NOT NULL,
            server_version INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            sync_status TEXT NOT NULL,
            PRIMARY KEY (user_id, key),
            CHECK (local_version >= synced_version)
        );
        CREATE INDEX IF NOT EXISTS idx_settings_status ON settings(user_id, sync_status);

        CREATE TABLE IF NOT EXISTS sync_metadata (
            key TEXT PRIMARY KEY,
            last_sync_timestamp INTEGER,
            updated_at INTEGER NOT NULL
        );
        ",
    )
}
