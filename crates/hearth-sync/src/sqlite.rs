use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use hearth_db::{Database, DbError};
use hearth_gateway::Dispatcher;
use hearth_types::{ChangeEvent, GatewayEvent, MessageRecord};

use crate::store::{DataStore, DeleteOutcome, NewMessage, ReactionOp, StoreError};

/// [`DataStore`] backed by SQLite. Every committed write is published to the
/// [`Dispatcher`], which serves as the change feed for all sessions.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run a blocking DB call off the async runtime.
    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> hearth_db::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error in {}: {}", op, e);
                StoreError::Unavailable(e.to_string())
            })?
            .map_err(|e| map_db_error(op, e))
    }

    fn publish(&self, change: ChangeEvent) {
        let reached = self.dispatcher.broadcast(GatewayEvent::MessageChange(change));
        debug!("Published change to {} subscribers", reached);
    }
}

fn map_db_error(op: &'static str, err: DbError) -> StoreError {
    match err {
        DbError::NotFound => StoreError::NotFound,
        DbError::Tombstoned => StoreError::Tombstoned,
        e if e.is_transient() => {
            warn!("{} hit a transient DB error: {}", op, e);
            StoreError::Unavailable(e.to_string())
        }
        e => {
            error!("{} failed: {}", op, e);
            StoreError::Fatal(e.to_string())
        }
    }
}

#[async_trait]
impl DataStore for SqliteStore {
    async fn insert_message(&self, msg: NewMessage) -> Result<MessageRecord, StoreError> {
        let record = self
            .run("insert_message", move |db| {
                db.insert_message(&hearth_db::NewMessage {
                    id: Uuid::new_v4(),
                    channel_id: msg.channel_id,
                    author_id: msg.author_id,
                    content: &msg.content,
                    reply_to_id: msg.reply_to_id,
                    attachments: &msg.attachments,
                    client_nonce: Some(msg.client_nonce),
                    // The store clock is authoritative for confirmed records
                    created_at: Utc::now(),
                })
            })
            .await?;

        self.publish(ChangeEvent::inserted(record.clone()));
        Ok(record)
    }

    async fn get_message(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let record = self
            .run("get_message", move |db| db.get_message(message_id))
            .await?;
        Ok(record.filter(|r| r.channel_id == channel_id))
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        content: String,
    ) -> Result<MessageRecord, StoreError> {
        let record = self
            .run("update_message", move |db| {
                db.update_message_content(message_id, &content, Utc::now())
            })
            .await?;

        self.publish(ChangeEvent::updated(record.clone()));
        Ok(record)
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<DeleteOutcome, StoreError> {
        let (record, newly_deleted) = self
            .run("soft_delete_message", move |db| {
                db.soft_delete_message(message_id, Utc::now())
            })
            .await?;

        if !newly_deleted {
            return Ok(DeleteOutcome::AlreadyDeleted(record));
        }

        self.publish(ChangeEvent::deleted(record.clone()));
        Ok(DeleteOutcome::Deleted(record))
    }

    async fn update_reactions(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        op: ReactionOp,
    ) -> Result<MessageRecord, StoreError> {
        let add = op == ReactionOp::Add;
        let (record, changed) = self
            .run("update_reactions", move |db| {
                db.apply_reaction(message_id, user_id, &emoji, add, Utc::now())
            })
            .await?;

        if changed {
            self.publish(ChangeEvent::updated(record.clone()));
        }
        Ok(record)
    }

    async fn query_messages(
        &self,
        channel_id: Uuid,
        limit: u32,
        before_id: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.run("query_messages", move |db| {
            db.get_messages(channel_id, limit, before_id)
        })
        .await
    }
}
