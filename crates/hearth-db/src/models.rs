//! Database row types. These map directly to SQLite rows.
//! Distinct from hearth-types models to keep the DB layer independent;
//! conversion happens in `queries`.

use chrono::{DateTime, Utc};
use hearth_types::Attachment;
use uuid::Uuid;

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_display: Option<String>,
    pub author_role: Option<String>,
    pub content: String,
    pub reply_to_id: Option<String>,
    pub attachments: String,
    pub edited: bool,
    pub client_nonce: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

/// Parameters for inserting a confirmed message.
pub struct NewMessage<'a> {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: &'a str,
    pub reply_to_id: Option<Uuid>,
    pub attachments: &'a [Attachment],
    pub client_nonce: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
