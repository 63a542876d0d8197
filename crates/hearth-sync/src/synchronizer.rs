use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hearth_gateway::Subscription;
use hearth_types::{Attachment, ChangeEvent, ChangeKind, MessageRecord, ReactionMap};

use crate::cache::MessageCache;
use crate::config::SyncConfig;
use crate::content::{validate_content, validate_emoji};
use crate::error::SyncError;
use crate::listener::{ChannelListener, MessageChange, SyncEvent, deliver};
use crate::store::{ChangeFeed, DataStore, NewMessage, ReactionOp, StoreError};
use crate::tracker::PendingTracker;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub reply_to_id: Option<Uuid>,
    pub attachments: Vec<Attachment>,
}

/// Cache and tracker for one channel. Every method runs under the write lock
/// and returns the events it produced, in order.
struct ChannelState {
    cache: MessageCache,
    tracker: PendingTracker,
}

impl ChannelState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            cache: MessageCache::new(),
            tracker: PendingTracker::new(config.match_window, config.pending_ttl),
        }
    }

    fn add_pending(&mut self, record: MessageRecord) {
        self.tracker.register(&record);
        self.cache.push_pending(record);
    }

    /// Find the pending slot a confirmed record belongs to. An echoed nonce
    /// is an exact answer; without one, fall back to the content heuristic.
    fn match_pending(&mut self, record: &MessageRecord) -> Option<Uuid> {
        match record.client_nonce {
            Some(nonce) => {
                self.tracker.take(nonce);
                self.cache.get_pending(nonce).map(|_| nonce)
            }
            None => self.tracker.take_match(record).map(|entry| entry.temp_id),
        }
    }

    fn retract(&mut self, temp_id: Uuid) -> Option<SyncEvent> {
        self.tracker.take(temp_id);
        self.cache
            .remove_pending(temp_id)
            .map(|_| SyncEvent::Message(MessageChange::Retracted { temp_id }))
    }

    /// The store answered our own insert.
    fn confirm(&mut self, temp_id: Uuid, record: MessageRecord) -> Option<SyncEvent> {
        let id = record.id?;
        self.tracker.take(temp_id);

        if self.cache.is_placed(id) || self.cache.is_tombstoned(id) {
            // The feed delivered it first; if it could not be matched the
            // pending slot is now a duplicate.
            return self.retract(temp_id);
        }
        if record.is_deleted() {
            self.cache.tombstone(record);
            return self.retract(temp_id);
        }

        match self.cache.replace_pending(temp_id, record) {
            Some(record) => Some(SyncEvent::Message(MessageChange::Replaced { temp_id, record })),
            None => {
                debug!("Pending slot {} already gone", temp_id);
                None
            }
        }
    }

    fn fail(&mut self, temp_id: Uuid) -> bool {
        self.tracker.take(temp_id);
        self.cache.remove_pending(temp_id).is_some()
    }

    fn apply(&mut self, change: ChangeEvent) -> Vec<SyncEvent> {
        let record = change.record;
        match change.kind {
            ChangeKind::Inserted if record.is_deleted() => self.apply_delete(record),
            ChangeKind::Inserted => self.apply_insert(record),
            ChangeKind::Updated => self.apply_update(record),
            ChangeKind::Deleted => self.apply_delete(record),
        }
    }

    fn apply_insert(&mut self, record: MessageRecord) -> Vec<SyncEvent> {
        let Some(id) = record.id else {
            warn!("Dropping inserted record without an id");
            return vec![];
        };
        if self.cache.is_placed(id) || self.cache.is_tombstoned(id) {
            debug!("Duplicate delivery of {}", id);
            return vec![];
        }

        if let Some(temp_id) = self.match_pending(&record) {
            if let Some(record) = self.cache.replace_pending(temp_id, record.clone()) {
                return vec![SyncEvent::Message(MessageChange::Replaced { temp_id, record })];
            }
        }

        self.cache
            .append(record)
            .map(|record| SyncEvent::Message(MessageChange::Appended(record)))
            .into_iter()
            .collect()
    }

    fn apply_update(&mut self, record: MessageRecord) -> Vec<SyncEvent> {
        let Some(id) = record.id else {
            warn!("Dropping updated record without an id");
            return vec![];
        };
        if record.is_deleted() {
            return self.apply_delete(record);
        }

        match self.cache.get(id) {
            Some(cached) if cached.is_deleted() => {
                debug!("Ignoring update to deleted message {}", id);
                vec![]
            }
            Some(cached) if *cached == record => vec![],
            Some(_) => {
                self.cache.update(record.clone());
                vec![SyncEvent::Edited(record)]
            }
            None => match self.cache.oldest_confirmed() {
                // Inside the loaded range but never seen: the insert was lost
                Some(oldest) if record.created_at >= oldest => self.apply_insert(record),
                // Overtook its insert, or outside the loaded range. Hold it
                // so a stale insert or page cannot win later.
                _ => {
                    self.cache.hold(record.clone());
                    vec![SyncEvent::Edited(record)]
                }
            },
        }
    }

    fn apply_delete(&mut self, mut record: MessageRecord) -> Vec<SyncEvent> {
        let Some(id) = record.id else {
            warn!("Dropping deleted record without an id");
            return vec![];
        };
        if !record.is_deleted() {
            record.tombstone(Utc::now());
        }

        let mut events = Vec::new();
        if let Some(retracted) = record.client_nonce.and_then(|nonce| self.retract(nonce)) {
            events.push(retracted);
        }
        if self.cache.tombstone(record) {
            events.push(SyncEvent::Deleted { message_id: id });
        }
        events
    }

    /// Fold a fetched page into the cache. Returns the records to hand back,
    /// minus any the cache knows to be deleted, each in its newest known
    /// version.
    fn merge_page(&mut self, records: Vec<MessageRecord>) -> (Vec<MessageRecord>, Vec<SyncEvent>) {
        let mut page = Vec::with_capacity(records.len());
        let mut events = Vec::new();

        for record in records {
            let Some(id) = record.id else {
                continue;
            };
            if self.cache.is_tombstoned(id) {
                continue;
            }

            if self.cache.is_placed(id) {
                // Already shown; the page may still carry a newer version
                let current = self
                    .cache
                    .get(id)
                    .filter(|cached| cached.updated_at >= record.updated_at)
                    .cloned();
                match current {
                    Some(cached) => page.push(cached),
                    None => {
                        self.cache.update(record.clone());
                        events.push(SyncEvent::Edited(record.clone()));
                        page.push(record);
                    }
                }
                continue;
            }

            let mut placed = None;
            if let Some(temp_id) = self.match_pending(&record) {
                placed = self.cache.replace_pending(temp_id, record.clone());
                if let Some(record) = &placed {
                    events.push(SyncEvent::Message(MessageChange::Replaced {
                        temp_id,
                        record: record.clone(),
                    }));
                }
            }
            page.extend(placed.or_else(|| self.cache.insert_sorted(record)));
        }

        (page, events)
    }

    fn clear(&mut self) {
        self.cache.clear();
        self.tracker.clear();
    }
}

struct SyncInner {
    channel_id: Uuid,
    store: Arc<dyn DataStore>,
    config: SyncConfig,
    state: RwLock<ChannelState>,
    events: broadcast::Sender<SyncEvent>,
    closed: AtomicBool,
}

impl SyncInner {
    fn read(&self) -> RwLockReadGuard<'_, ChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChannelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the write lock and publish what it produced. Events go
    /// out while the lock is held so every subscriber sees them in the order
    /// the state changed.
    fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut ChannelState) -> Vec<SyncEvent>,
    {
        let mut state = self.write();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        state.tracker.prune_expired(Instant::now());

        for event in f(&mut *state) {
            // No receivers is fine
            let _ = self.events.send(event);
        }
    }

    fn apply_change(&self, change: ChangeEvent) {
        if change.record.channel_id != self.channel_id {
            warn!(
                "Change for channel {} arrived on {}",
                change.record.channel_id, self.channel_id
            );
            return;
        }
        self.mutate(|state| state.apply(change));
    }

    async fn persist(&self, temp_id: Uuid, msg: NewMessage) {
        match self.store.insert_message(msg).await {
            Ok(record) if record.id.is_some() => {
                debug!("Send {} confirmed as {:?}", temp_id, record.id);
                self.mutate(|state| state.confirm(temp_id, record).into_iter().collect());
            }
            Ok(_) => {
                error!("Store confirmed send {} without assigning an id", temp_id);
                self.fail_send(temp_id, SyncError::Store("confirmed record has no id".into()));
            }
            Err(e) => {
                let err = self.store_failure("send", e);
                self.fail_send(temp_id, err);
            }
        }
    }

    fn fail_send(&self, temp_id: Uuid, error: SyncError) {
        self.mutate(|state| {
            if !state.fail(temp_id) {
                debug!("Failed send {} had no pending slot", temp_id);
            }
            vec![SyncEvent::SendFailed { temp_id, error }]
        });
    }

    fn store_failure(&self, op: &str, err: StoreError) -> SyncError {
        match &err {
            StoreError::NotFound | StoreError::Tombstoned => {
                debug!("{} on channel {}: {}", op, self.channel_id, err);
            }
            StoreError::Unavailable(_) => {
                warn!("{} on channel {} failed, retryable: {}", op, self.channel_id, err);
            }
            StoreError::Fatal(_) => {
                error!("{} on channel {} failed: {}", op, self.channel_id, err);
            }
        }
        SyncError::from(err)
    }
}

/// Keeps one channel's messages in sync with the store.
///
/// Sends show up immediately as pending records and are persisted in the
/// background; the store's change feed then confirms them in place. All
/// changes to the rendered sequence are published as [`SyncEvent`]s.
///
/// Must be opened inside a Tokio runtime. Dropping the synchronizer closes
/// it.
pub struct ChannelSynchronizer {
    inner: Arc<SyncInner>,
    _feed: Subscription,
}

impl ChannelSynchronizer {
    /// Subscribe to `feed` for `channel_id` and start applying its changes.
    pub fn open(
        channel_id: Uuid,
        store: Arc<dyn DataStore>,
        feed: &dyn ChangeFeed,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let inner = Arc::new(SyncInner {
            channel_id,
            store,
            state: RwLock::new(ChannelState::new(&config)),
            config,
            events,
            closed: AtomicBool::new(false),
        });

        let mut changes = feed.subscribe(channel_id);
        let applier = inner.clone();
        let feed_task = Subscription::spawn(move |live| async move {
            while let Some(change) = changes.next().await {
                if !live.is_live() {
                    break;
                }
                applier.apply_change(change);
            }
            debug!("Change feed for channel {} ended", channel_id);
        });

        info!("Opened channel {}", channel_id);
        Self {
            inner,
            _feed: feed_task,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.inner.channel_id
    }

    /// Load a page of history, oldest first. `limit` is capped at the
    /// configured page size.
    pub async fn fetch_page(
        &self,
        limit: u32,
        before_id: Option<Uuid>,
    ) -> Result<Vec<MessageRecord>, SyncError> {
        let limit = limit.min(self.inner.config.max_page_size);
        let records = self
            .inner
            .store
            .query_messages(self.channel_id(), limit, before_id)
            .await
            .map_err(|e| self.inner.store_failure("fetch_page", e))?;

        let mut page = Vec::new();
        self.inner.mutate(|state| {
            let (visible, events) = state.merge_page(records);
            page = visible;
            events
        });
        Ok(page)
    }

    /// Show a message right away and persist it in the background.
    ///
    /// Returns the pending record. If persisting fails, a
    /// [`SyncEvent::SendFailed`] is published and the pending record is
    /// dropped.
    pub fn send(
        &self,
        author_id: Uuid,
        content: &str,
        options: SendOptions,
    ) -> Result<MessageRecord, SyncError> {
        let content = validate_content(content, self.inner.config.max_content_chars)?;

        let temp_id = Uuid::new_v4();
        let record = MessageRecord::pending(
            temp_id,
            self.channel_id(),
            author_id,
            content,
            options.reply_to_id,
            options.attachments,
            Utc::now(),
        );

        let pending = record.clone();
        self.inner.mutate(|state| {
            state.add_pending(pending.clone());
            vec![SyncEvent::Message(MessageChange::Pending(pending))]
        });

        let msg = NewMessage {
            channel_id: record.channel_id,
            author_id,
            content: record.content.clone(),
            reply_to_id: record.reply_to_id,
            attachments: record.attachments.clone(),
            client_nonce: temp_id,
        };
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.persist(temp_id, msg).await });

        Ok(record)
    }

    pub async fn edit(
        &self,
        message_id: Uuid,
        author_id: Uuid,
        new_content: &str,
    ) -> Result<MessageRecord, SyncError> {
        let content = validate_content(new_content, self.inner.config.max_content_chars)?;

        let current = self.lookup(message_id).await?;
        if current.is_deleted() {
            return Err(SyncError::Deleted);
        }
        if current.author_id != author_id {
            return Err(SyncError::Unauthorized);
        }

        self.inner
            .store
            .update_message(message_id, content)
            .await
            .map_err(|e| self.inner.store_failure("edit", e))
    }

    /// Soft-delete a message. Deleting an already deleted message is a no-op.
    pub async fn delete(
        &self,
        message_id: Uuid,
        acting_user_id: Uuid,
        has_elevated_permission: bool,
    ) -> Result<(), SyncError> {
        let current = self.lookup(message_id).await?;
        if current.is_deleted() {
            debug!("Message {} is already deleted", message_id);
            return Ok(());
        }
        if current.author_id != acting_user_id && !has_elevated_permission {
            return Err(SyncError::Unauthorized);
        }

        match self.inner.store.soft_delete_message(message_id).await {
            Ok(outcome) => {
                let record = outcome.record().clone();
                self.inner.mutate(|state| state.apply_delete(record));
                Ok(())
            }
            Err(StoreError::Tombstoned) => Ok(()),
            Err(e) => Err(self.inner.store_failure("delete", e)),
        }
    }

    pub async fn react(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionMap, SyncError> {
        self.change_reaction(message_id, user_id, emoji, ReactionOp::Add)
            .await
    }

    pub async fn unreact(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionMap, SyncError> {
        self.change_reaction(message_id, user_id, emoji, ReactionOp::Remove)
            .await
    }

    async fn change_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        op: ReactionOp,
    ) -> Result<ReactionMap, SyncError> {
        let emoji = validate_emoji(emoji)?.to_string();

        let current = self.lookup(message_id).await?;
        if current.is_deleted() {
            return Err(SyncError::Deleted);
        }

        let name = match op {
            ReactionOp::Add => "react",
            ReactionOp::Remove => "unreact",
        };
        let record = self
            .inner
            .store
            .update_reactions(message_id, user_id, emoji, op)
            .await
            .map_err(|e| self.inner.store_failure(name, e))?;
        Ok(record.reactions)
    }

    /// Cached record, or a store read on a miss.
    async fn lookup(&self, message_id: Uuid) -> Result<MessageRecord, SyncError> {
        let cached = self.inner.read().cache.get(message_id).cloned();
        if let Some(record) = cached {
            return Ok(record);
        }

        debug!("Cache miss for {}, reading from store", message_id);
        match self.inner.store.get_message(self.channel_id(), message_id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(SyncError::NotFound),
            Err(e) => Err(self.inner.store_failure("lookup", e)),
        }
    }

    /// Deliver this channel's events to `listener` until the handle is
    /// dropped or cancelled.
    pub fn subscribe<L: ChannelListener>(&self, listener: L) -> Subscription {
        Subscription::forward(self.inner.events.subscribe(), move |event| {
            deliver(&listener, event)
        })
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// The rendered sequence: confirmed and pending records, no tombstones.
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.inner.read().cache.rendered()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().cache.pending_count()
    }

    /// Stop consuming the feed and drop all cached state.
    pub fn close(self) {}
}

impl Drop for ChannelSynchronizer {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.write().clear();
        info!("Closed channel {}", self.inner.channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn state() -> ChannelState {
        ChannelState::new(&SyncConfig::default())
    }

    fn pending(content: &str) -> MessageRecord {
        MessageRecord::pending(
            Uuid::new_v4(),
            Uuid::nil(),
            Uuid::nil(),
            content.into(),
            None,
            vec![],
            Utc::now(),
        )
    }

    fn confirm(record: &MessageRecord, nonce: bool) -> MessageRecord {
        let mut confirmed = record.clone();
        confirmed.id = Some(Uuid::new_v4());
        confirmed.client_nonce = if nonce { record.temp_id } else { None };
        confirmed.temp_id = None;
        confirmed
    }

    #[test]
    fn nonce_match_replaces_pending() {
        let mut state = state();
        let sent = pending("hi");
        let temp_id = sent.temp_id.unwrap();
        state.add_pending(sent.clone());

        let record = confirm(&sent, true);
        let events = state.apply(ChangeEvent::inserted(record.clone()));
        assert_eq!(
            events,
            vec![SyncEvent::Message(MessageChange::Replaced { temp_id, record })]
        );
        assert_eq!(state.cache.len(), 1);
        assert!(state.tracker.is_empty());
    }

    #[test]
    fn foreign_nonce_does_not_steal_pending_slot() {
        let mut state = state();
        let sent = pending("hi");
        state.add_pending(sent.clone());

        // Same author and content from another session, with its own nonce
        let mut other = confirm(&sent, false);
        other.client_nonce = Some(Uuid::new_v4());
        let events = state.apply(ChangeEvent::inserted(other.clone()));
        assert_eq!(events, vec![SyncEvent::Message(MessageChange::Appended(other))]);
        assert_eq!(state.cache.pending_count(), 1);
    }

    #[test]
    fn duplicate_delivery_appends_once() {
        let mut state = state();
        let record = confirm(&pending("yo"), false);

        assert_eq!(state.apply(ChangeEvent::inserted(record.clone())).len(), 1);
        assert!(state.apply(ChangeEvent::inserted(record)).is_empty());
        assert_eq!(state.cache.rendered().len(), 1);
    }

    #[test]
    fn deleted_before_inserted_never_renders() {
        let mut state = state();
        let mut record = confirm(&pending("gone"), false);
        let live = record.clone();
        record.tombstone(Utc::now());

        let events = state.apply(ChangeEvent::deleted(record));
        assert_eq!(
            events,
            vec![SyncEvent::Deleted {
                message_id: live.id.unwrap()
            }]
        );
        assert!(state.apply(ChangeEvent::inserted(live.clone())).is_empty());
        assert!(state.apply(ChangeEvent::updated(live)).is_empty());
        assert!(state.cache.rendered().is_empty());
    }

    #[test]
    fn updates_apply_in_arrival_order() {
        let mut state = state();
        let record = confirm(&pending("v1"), false);
        state.apply(ChangeEvent::inserted(record.clone()));

        let mut v2 = record.clone();
        v2.apply_edit("v2".into(), Utc::now());
        let mut v3 = record.clone();
        v3.apply_edit("v3".into(), Utc::now());

        assert_eq!(state.apply(ChangeEvent::updated(v2.clone())).len(), 1);
        assert_eq!(state.apply(ChangeEvent::updated(v3.clone())).len(), 1);
        // Identical redelivery is silent
        assert!(state.apply(ChangeEvent::updated(v3)).is_empty());
        assert_eq!(state.cache.rendered()[0].content, "v3");
    }

    #[test]
    fn store_return_after_unmatched_append_retracts() {
        let mut state = state();
        let sent = pending("late");
        let temp_id = sent.temp_id.unwrap();
        state.add_pending(sent.clone());

        // Confirmation came back outside the match window, with no nonce
        let mut record = confirm(&sent, false);
        record.created_at = sent.created_at + Duration::seconds(30);
        record.updated_at = record.created_at;
        state.apply(ChangeEvent::inserted(record.clone()));
        assert_eq!(state.cache.rendered().len(), 2);

        let event = state.confirm(temp_id, record);
        assert_eq!(
            event,
            Some(SyncEvent::Message(MessageChange::Retracted { temp_id }))
        );
        assert_eq!(state.cache.rendered().len(), 1);
    }

    #[test]
    fn store_return_then_feed_is_silent() {
        let mut state = state();
        let sent = pending("fast");
        let temp_id = sent.temp_id.unwrap();
        state.add_pending(sent.clone());

        let record = confirm(&sent, true);
        assert!(matches!(
            state.confirm(temp_id, record.clone()),
            Some(SyncEvent::Message(MessageChange::Replaced { .. }))
        ));
        assert!(state.apply(ChangeEvent::inserted(record)).is_empty());
        assert_eq!(state.cache.rendered().len(), 1);
    }

    #[test]
    fn page_merge_reconciles_and_hides_tombstones() {
        let mut state = state();
        let sent = pending("mine");
        state.add_pending(sent.clone());

        let mine = confirm(&sent, true);
        let mut old = confirm(&pending("old"), false);
        old.created_at -= Duration::minutes(5);
        let mut dead = confirm(&pending("dead"), false);
        dead.tombstone(Utc::now());
        state.apply(ChangeEvent::deleted(dead.clone()));

        let (page, events) = state.merge_page(vec![old.clone(), dead, mine]);
        assert_eq!(page.len(), 2);
        assert_eq!(events.len(), 1);
        let rendered: Vec<_> = state.cache.rendered().into_iter().map(|r| r.content).collect();
        assert_eq!(rendered, ["old", "mine"]);
    }

    fn reacted(record: &MessageRecord) -> MessageRecord {
        let mut newer = record.clone();
        newer.reactions.add("👍", Uuid::new_v4());
        newer.updated_at = record.updated_at + Duration::seconds(1);
        newer
    }

    #[test]
    fn update_before_insert_on_empty_cache_keeps_newer_state() {
        let mut state = state();
        let v1 = confirm(&pending("first"), false);
        let v2 = reacted(&v1);

        assert_eq!(
            state.apply(ChangeEvent::updated(v2.clone())),
            vec![SyncEvent::Edited(v2.clone())]
        );
        assert!(state.cache.rendered().is_empty());

        assert_eq!(
            state.apply(ChangeEvent::inserted(v1)),
            vec![SyncEvent::Message(MessageChange::Appended(v2.clone()))]
        );
        assert_eq!(state.cache.rendered(), vec![v2]);
    }

    #[test]
    fn update_before_insert_of_own_send_keeps_newer_state() {
        let mut state = state();
        let sent = pending("mine");
        let temp_id = sent.temp_id.unwrap();
        state.add_pending(sent.clone());

        let v1 = confirm(&sent, true);
        let v2 = reacted(&v1);
        state.apply(ChangeEvent::updated(v2.clone()));
        assert_eq!(state.cache.pending_count(), 1);

        assert_eq!(
            state.apply(ChangeEvent::inserted(v1.clone())),
            vec![SyncEvent::Message(MessageChange::Replaced {
                temp_id,
                record: v2.clone()
            })]
        );
        assert_eq!(state.cache.rendered(), vec![v2.clone()]);

        // The store's own answer is older still and changes nothing
        assert!(state.confirm(temp_id, v1).is_none());
        assert_eq!(state.cache.rendered(), vec![v2]);
    }

    #[test]
    fn store_return_after_held_update_keeps_newer_state() {
        let mut state = state();
        let sent = pending("mine");
        let temp_id = sent.temp_id.unwrap();
        state.add_pending(sent.clone());

        let v1 = confirm(&sent, true);
        let v2 = reacted(&v1);
        state.apply(ChangeEvent::updated(v2.clone()));

        assert_eq!(
            state.confirm(temp_id, v1),
            Some(SyncEvent::Message(MessageChange::Replaced {
                temp_id,
                record: v2.clone()
            }))
        );
        assert_eq!(state.cache.rendered(), vec![v2]);
    }

    #[test]
    fn page_prefers_the_newer_version() {
        let mut state = state();
        let mut older = confirm(&pending("held"), false);
        older.created_at -= Duration::minutes(5);
        older.updated_at = older.created_at;
        let newer_held = reacted(&older);
        state.apply(ChangeEvent::updated(newer_held.clone()));

        let shown = confirm(&pending("shown"), false);
        state.apply(ChangeEvent::inserted(shown.clone()));
        let newer_shown = reacted(&shown);

        let (page, events) = state.merge_page(vec![older, newer_shown.clone()]);
        assert_eq!(page, vec![newer_held.clone(), newer_shown.clone()]);
        assert_eq!(events, vec![SyncEvent::Edited(newer_shown.clone())]);
        assert_eq!(state.cache.rendered(), vec![newer_held, newer_shown]);
    }

    #[tokio::test]
    async fn close_clears_state() {
        use crate::sqlite::SqliteStore;
        use hearth_db::Database;
        use hearth_gateway::Dispatcher;

        let db = Arc::new(Database::open_in_memory().unwrap());
        let channel = Uuid::new_v4();
        db.create_channel(channel, "lounge").unwrap();
        let dispatcher = Dispatcher::new();
        let store = Arc::new(SqliteStore::new(db, dispatcher.clone()));

        let sync = ChannelSynchronizer::open(channel, store, &dispatcher, SyncConfig::default());
        sync.send(Uuid::new_v4(), "bye", SendOptions::default()).unwrap();
        assert_eq!(sync.messages().len(), 1);

        let inner = sync.inner.clone();
        sync.close();
        assert!(inner.closed.load(Ordering::Acquire));
        assert!(inner.read().cache.is_empty());
        assert!(inner.read().tracker.is_empty());
    }
}
