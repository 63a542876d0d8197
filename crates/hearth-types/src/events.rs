use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// A mutation reported by the store's change feed. Always carries the
/// record as it stands after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub record: MessageRecord,
}

impl ChangeEvent {
    pub fn inserted(record: MessageRecord) -> Self {
        Self { kind: ChangeKind::Inserted, record }
    }

    pub fn updated(record: MessageRecord) -> Self {
        Self { kind: ChangeKind::Updated, record }
    }

    pub fn deleted(record: MessageRecord) -> Self {
        Self { kind: ChangeKind::Deleted, record }
    }
}

/// Someone currently typing in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}

/// Events fanned out by the push hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// A message was created, changed or tombstoned in the store
    MessageChange(ChangeEvent),

    /// A user started (or is still) typing
    TypingStart {
        channel_id: Uuid,
        user_id: Uuid,
        display_name: String,
    },

    /// A user explicitly stopped typing
    TypingStop { channel_id: Uuid, user_id: Uuid },
}

impl GatewayEvent {
    /// Every gateway event is scoped to a single channel.
    pub fn channel_id(&self) -> Uuid {
        match self {
            Self::MessageChange(change) => change.record.channel_id,
            Self::TypingStart { channel_id, .. } => *channel_id,
            Self::TypingStop { channel_id, .. } => *channel_id,
        }
    }
}
