use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reactions::ReactionMap;

/// Attachment descriptor. Uploads happen elsewhere; the sync engine only
/// carries these along with the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A chat message as seen by the sync engine.
///
/// A record is *pending* while `id` is `None` and `temp_id` is set, and
/// *confirmed* once the store has assigned an `id`. A set `deleted_at` marks a
/// tombstone: the record stays around but is hidden from reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<Uuid>,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: ReactionMap,
    #[serde(default)]
    pub edited: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Temp id of the send that produced this record, when the store echoes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<Uuid>,

    // Joined at read time; not authoritative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_role: Option<String>,
}

impl MessageRecord {
    /// Build a pending record for a message that has not reached the store yet.
    pub fn pending(
        temp_id: Uuid,
        channel_id: Uuid,
        author_id: Uuid,
        content: String,
        reply_to_id: Option<Uuid>,
        attachments: Vec<Attachment>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            temp_id: Some(temp_id),
            channel_id,
            author_id,
            content,
            reply_to_id,
            attachments,
            reactions: ReactionMap::new(),
            edited: false,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            client_nonce: None,
            author_display: None,
            author_role: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Apply a content edit. `updated_at` never moves before `created_at`.
    pub fn apply_edit(&mut self, content: String, at: DateTime<Utc>) {
        self.content = content;
        self.edited = true;
        self.updated_at = at.max(self.created_at);
    }

    /// Mark as deleted. Returns false if the record already was.
    pub fn tombstone(&mut self, at: DateTime<Utc>) -> bool {
        if self.deleted_at.is_some() {
            return false;
        }
        let at = at.max(self.created_at);
        self.deleted_at = Some(at);
        self.updated_at = at;
        true
    }
}
