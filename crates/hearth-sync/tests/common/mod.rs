#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};
use uuid::Uuid;

use hearth_db::Database;
use hearth_sync::{
    ChannelSynchronizer, DataStore, DeleteOutcome, Dispatcher, MessageChange, MessageRecord,
    NewMessage, ReactionOp, SendOptions, SqliteStore, StoreError, SyncConfig, SyncEvent,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_sync=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// [`SqliteStore`] with switches to hold inserts or reaction writes until
/// released, and to fail inserts outright.
pub struct GatedStore {
    inner: SqliteStore,
    gate_inserts: AtomicBool,
    inserts: Semaphore,
    gate_reactions: AtomicBool,
    reactions: Semaphore,
    fail_inserts: AtomicBool,
}

impl GatedStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            gate_inserts: AtomicBool::new(false),
            inserts: Semaphore::new(0),
            gate_reactions: AtomicBool::new(false),
            reactions: Semaphore::new(0),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn hold_inserts(&self) {
        self.gate_inserts.store(true, Ordering::SeqCst);
    }

    pub fn release_inserts(&self, n: usize) {
        self.inserts.add_permits(n);
    }

    pub fn hold_reactions(&self) {
        self.gate_reactions.store(true, Ordering::SeqCst);
    }

    pub fn release_reactions(&self, n: usize) {
        self.reactions.add_permits(n);
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    async fn pass(gated: &AtomicBool, gate: &Semaphore) {
        if gated.load(Ordering::SeqCst) {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

#[async_trait]
impl DataStore for GatedStore {
    async fn insert_message(&self, msg: NewMessage) -> Result<MessageRecord, StoreError> {
        Self::pass(&self.gate_inserts, &self.inserts).await;
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.insert_message(msg).await
    }

    async fn get_message(
        &self,
        channel_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageRecord>, StoreError> {
        self.inner.get_message(channel_id, message_id).await
    }

    async fn update_message(
        &self,
        message_id: Uuid,
        content: String,
    ) -> Result<MessageRecord, StoreError> {
        self.inner.update_message(message_id, content).await
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> Result<DeleteOutcome, StoreError> {
        self.inner.soft_delete_message(message_id).await
    }

    async fn update_reactions(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        op: ReactionOp,
    ) -> Result<MessageRecord, StoreError> {
        Self::pass(&self.gate_reactions, &self.reactions).await;
        self.inner
            .update_reactions(message_id, user_id, emoji, op)
            .await
    }

    async fn query_messages(
        &self,
        channel_id: Uuid,
        limit: u32,
        before_id: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.inner.query_messages(channel_id, limit, before_id).await
    }
}

/// One channel with two members, backed by an in-memory database.
pub struct Harness {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub store: Arc<GatedStore>,
    pub channel_id: Uuid,
    pub alice: Uuid,
    pub bob: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();

        let db = Arc::new(Database::open_in_memory().expect("in-memory db"));
        let channel_id = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        db.create_channel(channel_id, "lounge").unwrap();
        db.create_user(alice, "alice", Some("Alice")).unwrap();
        db.create_user(bob, "bob", None).unwrap();
        db.add_member(channel_id, alice, "owner").unwrap();
        db.add_member(channel_id, bob, "member").unwrap();

        let dispatcher = Dispatcher::new();
        let store = Arc::new(GatedStore::new(SqliteStore::new(
            db.clone(),
            dispatcher.clone(),
        )));

        Self {
            db,
            dispatcher,
            store,
            channel_id,
            alice,
            bob,
        }
    }

    pub fn open(&self) -> ChannelSynchronizer {
        self.open_with(SyncConfig::default())
    }

    pub fn open_with(&self, config: SyncConfig) -> ChannelSynchronizer {
        ChannelSynchronizer::open(
            self.channel_id,
            self.store.clone(),
            &self.dispatcher,
            config,
        )
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a sync event")
        .expect("event channel closed")
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Send and wait for the pending record to be replaced by its confirmation.
pub async fn send_confirmed(sync: &ChannelSynchronizer, author: Uuid, content: &str) -> MessageRecord {
    let mut rx = sync.events();
    let pending = sync
        .send(author, content, SendOptions::default())
        .expect("valid content");
    let temp_id = pending.temp_id.expect("pending record has a temp id");

    loop {
        if let SyncEvent::Message(MessageChange::Replaced { temp_id: t, record }) =
            next_event(&mut rx).await
        {
            if t == temp_id {
                return record;
            }
        }
    }
}
