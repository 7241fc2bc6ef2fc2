//! Chat replica repository

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::{
    Chat, ChatId, ChatMetadata, DeliveryStatus, Message, MessageId, Participant, Rule,
};
use crate::util::{from_millis, to_millis};

const CURSOR_KEY: &str = "chat_deltas";

const MESSAGE_COLUMNS: &str = "id, chat_id, parent_id, sender_id, text, created_at, sent_at, \
     delivered_at, edited_at, delivery_status";

/// Row-level access to chats, participants, messages and the delta cursor.
///
/// Works on a plain connection or inside a transaction; callers decide the
/// transaction boundary.
pub struct SqliteChatRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteChatRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn chat_exists(&self, chat_id: ChatId) -> rusqlite::Result<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
            params![chat_id.as_str()],
            |row| row.get(0),
        )
    }

    /// Insert or replace a chat's metadata, keeping its messages.
    pub fn upsert_chat(
        &self,
        chat_id: ChatId,
        metadata: &ChatMetadata,
        updated_at: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let rules = serde_json::to_string(&metadata.rules)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;

        // ON CONFLICT keeps the row identity so messages are not cascaded away
        self.conn.execute(
            "INSERT INTO chats (id, name, picture_url, rules, unread_messages_count,
                                last_read_message_id, last_activity_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                picture_url = excluded.picture_url,
                rules = excluded.rules,
                unread_messages_count = excluded.unread_messages_count,
                last_read_message_id = excluded.last_read_message_id,
                last_activity_at = excluded.last_activity_at,
                updated_at = excluded.updated_at",
            params![
                chat_id.as_str(),
                metadata.name,
                metadata.picture_url,
                rules,
                metadata.unread_messages_count,
                metadata.last_read_message_id.map(|id| id.as_str()),
                metadata.last_activity_at.map(to_millis),
                to_millis(updated_at),
            ],
        )?;

        self.replace_participants(chat_id, &metadata.participants)
    }

    /// Upsert participants globally and replace the chat's association set.
    fn replace_participants(
        &self,
        chat_id: ChatId,
        participants: &[Participant],
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "DELETE FROM chat_participants WHERE chat_id = ?1",
            params![chat_id.as_str()],
        )?;

        let mut upsert = self.conn.prepare_cached(
            "INSERT INTO participants (id, name, picture_url, joined_at, online_at, is_admin, is_moderator)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                picture_url = excluded.picture_url,
                joined_at = excluded.joined_at,
                online_at = excluded.online_at,
                is_admin = excluded.is_admin,
                is_moderator = excluded.is_moderator",
        )?;
        let mut link = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO chat_participants (chat_id, participant_id) VALUES (?1, ?2)",
        )?;

        for participant in participants {
            upsert.execute(params![
                participant.id.as_str(),
                participant.name,
                participant.picture_url,
                to_millis(participant.joined_at),
                participant.online_at.map(to_millis),
                participant.is_admin,
                participant.is_moderator,
            ])?;
            link.execute(params![chat_id.as_str(), participant.id.as_str()])?;
        }
        Ok(())
    }

    /// Remove a chat and everything hanging off it. Returns whether a row existed.
    pub fn delete_chat(&self, chat_id: ChatId) -> rusqlite::Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM chats WHERE id = ?1", params![chat_id.as_str()])?;
        Ok(affected > 0)
    }

    /// Drop the whole chat replica ahead of a full resynchronization.
    pub fn clear_all(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM chat_participants;
             DELETE FROM chats;
             DELETE FROM participants;",
        )
    }

    pub fn upsert_message(&self, message: &Message) -> rusqlite::Result<()> {
        let status = message
            .delivery_status
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;

        self.conn
            .prepare_cached(
                "INSERT INTO messages (id, chat_id, parent_id, sender_id, text, created_at,
                                       sent_at, delivered_at, edited_at, delivery_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    chat_id = excluded.chat_id,
                    parent_id = excluded.parent_id,
                    sender_id = excluded.sender_id,
                    text = excluded.text,
                    created_at = excluded.created_at,
                    sent_at = excluded.sent_at,
                    delivered_at = excluded.delivered_at,
                    edited_at = excluded.edited_at,
                    delivery_status = excluded.delivery_status",
            )?
            .execute(params![
                message.id.as_str(),
                message.chat_id.as_str(),
                message.parent_id.map(|id| id.as_str()),
                message.sender.as_str(),
                message.text,
                to_millis(message.created_at),
                message.sent_at.map(to_millis),
                message.delivered_at.map(to_millis),
                message.edited_at.map(to_millis),
                status,
            ])?;
        Ok(())
    }

    /// Delete a message only if it belongs to `chat_id`.
    pub fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> rusqlite::Result<bool> {
        let affected = self.conn.execute(
            "DELETE FROM messages WHERE id = ?1 AND chat_id = ?2",
            params![message_id.as_str(), chat_id.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_chat(&self, chat_id: ChatId) -> rusqlite::Result<Option<Chat>> {
        let chat = self
            .conn
            .query_row(
                "SELECT id, name, picture_url, rules, unread_messages_count,
                        last_read_message_id, last_activity_at, updated_at
                 FROM chats WHERE id = ?1",
                params![chat_id.as_str()],
                row_to_chat,
            )
            .optional()?;

        match chat {
            Some(mut chat) => {
                chat.metadata.participants = self.participants_of(chat.id)?;
                Ok(Some(chat))
            }
            None => Ok(None),
        }
    }

    /// All chats, most recently active first
    pub fn list_chats(&self) -> rusqlite::Result<Vec<Chat>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, picture_url, rules, unread_messages_count,
                    last_read_message_id, last_activity_at, updated_at
             FROM chats
             ORDER BY COALESCE(last_activity_at, updated_at) DESC, name",
        )?;
        let chats = stmt
            .query_map([], row_to_chat)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        chats
            .into_iter()
            .map(|mut chat| {
                chat.metadata.participants = self.participants_of(chat.id)?;
                Ok(chat)
            })
            .collect()
    }

    fn participants_of(&self, chat_id: ChatId) -> rusqlite::Result<Vec<Participant>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT p.id, p.name, p.picture_url, p.joined_at, p.online_at, p.is_admin, p.is_moderator
             FROM participants p
             JOIN chat_participants cp ON cp.participant_id = p.id
             WHERE cp.chat_id = ?1
             ORDER BY p.joined_at, p.id",
        )?;
        let participants = stmt
            .query_map(params![chat_id.as_str()], row_to_participant)?
            .collect();
        participants
    }

    /// Messages of a chat in creation order
    pub fn list_messages(&self, chat_id: ChatId) -> rusqlite::Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at, id"
        ))?;
        let messages = stmt
            .query_map(params![chat_id.as_str()], row_to_message)?
            .collect();
        messages
    }

    pub fn get_message(&self, message_id: MessageId) -> rusqlite::Result<Option<Message>> {
        self.conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![message_id.as_str()],
                row_to_message,
            )
            .optional()
    }

    pub fn last_sync_timestamp(&self) -> rusqlite::Result<Option<DateTime<Utc>>> {
        let millis: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT last_sync_timestamp FROM sync_metadata WHERE key = ?1",
                params![CURSOR_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(millis.flatten().map(from_millis))
    }

    pub fn set_last_sync_timestamp(
        &self,
        cursor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO sync_metadata (key, last_sync_timestamp, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                last_sync_timestamp = excluded.last_sync_timestamp,
                updated_at = excluded.updated_at",
            params![CURSOR_KEY, to_millis(cursor), to_millis(now)],
        )?;
        Ok(())
    }
}

fn parse_column<T>(index: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse().map_err(|error| conversion_error(index, error))
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    index: usize,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|error| conversion_error(index, error))
}

pub(crate) fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn optional_id<T>(index: usize, raw: Option<String>) -> rusqlite::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|raw| parse_column(index, &raw)).transpose()
}

fn row_to_chat(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let rules: String = row.get(3)?;
    let last_activity_at: Option<i64> = row.get(6)?;
    let updated_at: i64 = row.get(7)?;

    Ok(Chat {
        id: parse_column(0, &id)?,
        metadata: ChatMetadata {
            name: row.get(1)?,
            participants: Vec::new(),
            picture_url: row.get(2)?,
            rules: parse_json_column::<Vec<Rule>>(3, &rules)?,
            unread_messages_count: row.get(4)?,
            last_read_message_id: optional_id(5, row.get(5)?)?,
            last_activity_at: last_activity_at.map(from_millis),
        },
        updated_at: from_millis(updated_at),
    })
}

fn row_to_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    let id: String = row.get(0)?;
    let joined_at: i64 = row.get(3)?;
    let online_at: Option<i64> = row.get(4)?;

    Ok(Participant {
        id: parse_column(0, &id)?,
        name: row.get(1)?,
        picture_url: row.get(2)?,
        joined_at: from_millis(joined_at),
        online_at: online_at.map(from_millis),
        is_admin: row.get(5)?,
        is_moderator: row.get(6)?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender: String = row.get(3)?;
    let created_at: i64 = row.get(5)?;
    let sent_at: Option<i64> = row.get(6)?;
    let delivered_at: Option<i64> = row.get(7)?;
    let edited_at: Option<i64> = row.get(8)?;
    let status: Option<String> = row.get(9)?;

    Ok(Message {
        id: parse_column(0, &id)?,
        parent_id: optional_id(2, row.get(2)?)?,
        sender: parse_column(3, &sender)?,
        chat_id: parse_column(1, &chat_id)?,
        text: row.get(4)?,
        created_at: from_millis(created_at),
        sent_at: sent_at.map(from_millis),
        delivered_at: delivered_at.map(from_millis),
        edited_at: edited_at.map(from_millis),
        delivery_status: status
            .map(|raw| parse_json_column::<DeliveryStatus>(9, &raw))
            .transpose()?,
    })
}
