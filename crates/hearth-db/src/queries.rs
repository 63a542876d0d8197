use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use hearth_types::{Attachment, MessageRecord, ReactionMap};

use crate::models::{MessageRow, NewMessage, ReactionRow};
use crate::{Database, DbError, Result};

// Display name falls back to the username; role comes from channel membership.
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.channel_id, m.author_id,
           COALESCE(u.display_name, u.username), cm.role,
           m.content, m.reply_to_id, m.attachments, m.edited, m.client_nonce,
           m.created_at, m.updated_at, m.deleted_at
    FROM messages m
    LEFT JOIN users u ON m.author_id = u.id
    LEFT JOIN channel_members cm ON cm.channel_id = m.channel_id AND cm.user_id = m.author_id";

impl Database {
    // -- Users & channels --

    pub fn create_user(&self, id: Uuid, username: &str, display_name: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, display_name) VALUES (?1, ?2, ?3)",
                params![id.to_string(), username, display_name],
            )?;
            Ok(())
        })
    }

    pub fn create_channel(&self, id: Uuid, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO channels (id, name) VALUES (?1, ?2)",
                params![id.to_string(), name],
            )?;
            Ok(())
        })
    }

    pub fn add_member(&self, channel_id: Uuid, user_id: Uuid, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO channel_members (channel_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![channel_id.to_string(), user_id.to_string(), role],
            )?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message and return it as stored, with author fields joined.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<MessageRecord> {
        let attachments = serde_json::to_string(msg.attachments).map_err(|e| DbError::Corrupt {
            column: "attachments",
            reason: e.to_string(),
        })?;

        self.with_tx(|tx| {
            if !query_channel_exists(tx, msg.channel_id)? {
                return Err(DbError::NotFound);
            }

            if let Some(reply_to) = msg.reply_to_id {
                let parent_channel: Option<String> = tx
                    .query_row(
                        "SELECT channel_id FROM messages WHERE id = ?1",
                        [reply_to.to_string()],
                        |row| row.get(0),
                    )
                    .optional()?;
                if parent_channel.as_deref() != Some(msg.channel_id.to_string().as_str()) {
                    return Err(DbError::NotFound);
                }
            }

            let created_at = format_ts(msg.created_at);
            tx.execute(
                "INSERT INTO messages
                    (id, channel_id, author_id, content, reply_to_id, attachments, client_nonce, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    msg.id.to_string(),
                    msg.channel_id.to_string(),
                    msg.author_id.to_string(),
                    msg.content,
                    msg.reply_to_id.map(|id| id.to_string()),
                    attachments,
                    msg.client_nonce.map(|id| id.to_string()),
                    created_at,
                ],
            )?;

            load_message(tx, msg.id)?.ok_or(DbError::NotFound)
        })
    }

    /// Fetch a single message, tombstoned or not.
    pub fn get_message(&self, id: Uuid) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| load_message(conn, id))
    }

    /// Replace the content of a live message and flag it edited.
    pub fn update_message_content(
        &self,
        id: Uuid,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<MessageRecord> {
        self.with_tx(|tx| {
            let record = load_message(tx, id)?.ok_or(DbError::NotFound)?;
            if record.is_deleted() {
                return Err(DbError::Tombstoned);
            }

            let updated_at = format_ts(at.max(record.created_at));
            tx.execute(
                "UPDATE messages SET content = ?1, edited = 1, updated_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![content, updated_at, id.to_string()],
            )?;

            load_message(tx, id)?.ok_or(DbError::NotFound)
        })
    }

    /// Set the tombstone on a message.
    /// Returns the record and whether this call was the one that deleted it.
    pub fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<(MessageRecord, bool)> {
        self.with_tx(|tx| {
            let record = load_message(tx, id)?.ok_or(DbError::NotFound)?;
            if record.is_deleted() {
                return Ok((record, false));
            }

            let deleted_at = format_ts(at.max(record.created_at));
            tx.execute(
                "UPDATE messages SET deleted_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND deleted_at IS NULL",
                params![deleted_at, id.to_string()],
            )?;

            let record = load_message(tx, id)?.ok_or(DbError::NotFound)?;
            Ok((record, true))
        })
    }

    /// Add or remove one user's reaction. The tombstone check and the write
    /// share a transaction, so a concurrent delete can never be undone here.
    /// A change moves `updated_at` forward to `at`.
    /// Returns the record and whether the reaction set changed.
    pub fn apply_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        add: bool,
        at: DateTime<Utc>,
    ) -> Result<(MessageRecord, bool)> {
        self.with_tx(|tx| {
            let record = load_message(tx, message_id)?.ok_or(DbError::NotFound)?;
            if record.is_deleted() {
                return Err(DbError::Tombstoned);
            }

            let changed = if add {
                tx.execute(
                    "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                    params![message_id.to_string(), user_id.to_string(), emoji],
                )?
            } else {
                tx.execute(
                    "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id.to_string(), user_id.to_string(), emoji],
                )?
            };

            if changed == 0 {
                debug!("Reaction {} by {} on {} unchanged", emoji, user_id, message_id);
                return Ok((record, false));
            }

            tx.execute(
                "UPDATE messages SET updated_at = ?1 WHERE id = ?2",
                params![format_ts(at.max(record.updated_at)), message_id.to_string()],
            )?;
            let record = load_message(tx, message_id)?.ok_or(DbError::NotFound)?;
            Ok((record, true))
        })
    }

    /// One page of live messages, oldest first. `before` is a message id
    /// cursor: only messages strictly older than it are returned.
    pub fn get_messages(
        &self,
        channel_id: Uuid,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            if !query_channel_exists(conn, channel_id)? {
                return Err(DbError::NotFound);
            }

            let cursor = match before {
                Some(before_id) => {
                    let row: Option<(String, String)> = conn
                        .query_row(
                            "SELECT created_at, id FROM messages WHERE id = ?1 AND channel_id = ?2",
                            params![before_id.to_string(), channel_id.to_string()],
                            |row| Ok((row.get(0)?, row.get(1)?)),
                        )
                        .optional()?;
                    Some(row.ok_or(DbError::NotFound)?)
                }
                None => None,
            };

            let rows = query_messages(conn, channel_id, limit, cursor)?;
            let mut records = rows_to_records(conn, rows)?;
            records.reverse();
            Ok(records)
        })
    }
}

fn query_channel_exists(conn: &Connection, channel_id: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM channels WHERE id = ?1",
            [channel_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn load_message(conn: &Connection, id: Uuid) -> Result<Option<MessageRecord>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], map_message_row)
        .optional()?;

    match row {
        Some(row) => Ok(rows_to_records(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

/// Newest-first page of live rows.
fn query_messages(
    conn: &Connection,
    channel_id: Uuid,
    limit: u32,
    cursor: Option<(String, String)>,
) -> Result<Vec<MessageRow>> {
    let (before_ts, before_id) = cursor.unzip();
    let sql = format!(
        "{MESSAGE_SELECT}
         WHERE m.channel_id = ?1
           AND m.deleted_at IS NULL
           AND (?2 IS NULL OR m.created_at < ?2 OR (m.created_at = ?2 AND m.id < ?3))
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT ?4"
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![channel_id.to_string(), before_ts, before_id, limit],
            map_message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        author_id: row.get(2)?,
        author_display: row.get(3)?,
        author_role: row.get(4)?,
        content: row.get(5)?,
        reply_to_id: row.get(6)?,
        attachments: row.get(7)?,
        edited: row.get(8)?,
        client_nonce: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        deleted_at: row.get(12)?,
    })
}

/// Batch-fetch reactions for a set of message IDs.
fn query_reactions(conn: &Connection, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
    if message_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions
         WHERE message_id IN ({})
         ORDER BY created_at, rowid",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok(ReactionRow {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                emoji: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn rows_to_records(conn: &Connection, rows: Vec<MessageRow>) -> Result<Vec<MessageRecord>> {
    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    // Group reactions by message_id -> (emoji, user_id)
    let mut grouped: HashMap<String, Vec<(String, Uuid)>> = HashMap::new();
    for r in query_reactions(conn, &ids)? {
        let user_id = parse_uuid("reactions.user_id", &r.user_id)?;
        grouped.entry(r.message_id).or_default().push((r.emoji, user_id));
    }

    rows.into_iter()
        .map(|row| {
            let reactions = grouped
                .remove(&row.id)
                .map(ReactionMap::from_pairs)
                .unwrap_or_default();
            row_to_record(row, reactions)
        })
        .collect()
}

fn row_to_record(row: MessageRow, reactions: ReactionMap) -> Result<MessageRecord> {
    let attachments: Vec<Attachment> =
        serde_json::from_str(&row.attachments).map_err(|e| DbError::Corrupt {
            column: "messages.attachments",
            reason: e.to_string(),
        })?;

    Ok(MessageRecord {
        id: Some(parse_uuid("messages.id", &row.id)?),
        temp_id: None,
        channel_id: parse_uuid("messages.channel_id", &row.channel_id)?,
        author_id: parse_uuid("messages.author_id", &row.author_id)?,
        content: row.content,
        reply_to_id: row
            .reply_to_id
            .as_deref()
            .map(|s| parse_uuid("messages.reply_to_id", s))
            .transpose()?,
        attachments,
        reactions,
        edited: row.edited,
        created_at: parse_ts("messages.created_at", &row.created_at)?,
        updated_at: parse_ts("messages.updated_at", &row.updated_at)?,
        deleted_at: row
            .deleted_at
            .as_deref()
            .map(|s| parse_ts("messages.deleted_at", s))
            .transpose()?,
        client_nonce: row
            .client_nonce
            .as_deref()
            .map(|s| parse_uuid("messages.client_nonce", s))
            .transpose()?,
        author_display: row.author_display,
        author_role: row.author_role,
    })
}

/// Fixed-width UTC so that lexical order matches time order.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt {
            column,
            reason: e.to_string(),
        })
}

fn parse_uuid(column: &'static str, value: &str) -> Result<Uuid> {
    value.parse().map_err(|e: uuid::Error| DbError::Corrupt {
        column,
        reason: e.to_string(),
    })
}
