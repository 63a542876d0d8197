//! Collaborator interfaces the synchronizer talks to: a request/response
//! [`DataStore`] and a push [`ChangeFeed`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use uuid::Uuid;

use hearth_types::{Attachment, ChangeEvent, MessageRecord};

/// Store-level failure. Only [`StoreError::Unavailable`] is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found")]
    NotFound,

    #[error("Record is tombstoned")]
    Tombstoned,

    #[error("Store failure: {0}")]
    Fatal(String),
}

/// A message on its way to the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub reply_to_id: Option<Uuid>,
    pub attachments: Vec<Attachment>,
    /// Temp id of the optimistic record; stores that can echo it back should.
    pub client_nonce: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(MessageRecord),
    /// The record was tombstoned before this request.
    AlreadyDeleted(MessageRecord),
}

impl DeleteOutcome {
    pub fn record(&self) -> &MessageRecord {
        match self {
            DeleteOutcome::Deleted(record) | DeleteOutcome::AlreadyDeleted(record) => record,
        }
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Persist a message and return the confirmed record, `id` assigned.
    async fn insert_message(&self, msg: NewMessage) -> Result<MessageRecord, StoreError>;

    /// Fetch one message of `channel_id`, tombstoned or not.
    async fn get_message(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageRecord>, StoreError>;

    /// Replace a live message's content. Fails with `Tombstoned` if deleted.
    async fn update_message(
        &self,
        message_id: Uuid,
        content: String,
    ) -> Result<MessageRecord, StoreError>;

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<DeleteOutcome, StoreError>;

    /// Apply one reaction change atomically with the tombstone check.
    async fn update_reactions(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        op: ReactionOp,
    ) -> Result<MessageRecord, StoreError>;

    /// Live messages older than `before_id` (or the newest, if `None`),
    /// returned oldest first.
    async fn query_messages(
        &self,
        channel_id: Uuid,
        limit: u32,
        before_id: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>, StoreError>;
}

pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Push notifications for a channel. Delivery is at-least-once and carries
/// no ordering guarantee relative to `DataStore` responses.
pub trait ChangeFeed: Send + Sync {
    /// Start receiving changes. Events published after this call returns are
    /// never missed, even if the stream is polled later.
    fn subscribe(&self, channel_id: Uuid) -> ChangeStream;
}
