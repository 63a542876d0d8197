use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use hearth_types::events::{GatewayEvent, TypingUser};

use crate::dispatcher::Dispatcher;
use crate::subscription::{Liveness, Subscription};

/// Typing indicator for one channel.
///
/// Signals travel through the [`Dispatcher`], so every participant (the
/// sender included) sees the same starts and stops. Each receiver expires
/// entries on its own after `ttl`, which clears indicators left behind by
/// clients that vanish without calling `stop_typing`.
pub struct TypingPresence {
    inner: Arc<TypingInner>,
    _listener: Subscription,
}

struct TypingInner {
    channel_id: Uuid,
    ttl: Duration,
    dispatcher: Dispatcher,
    entries: Mutex<HashMap<Uuid, TypingEntry>>,
    changes: watch::Sender<Vec<TypingUser>>,
}

struct TypingEntry {
    user: TypingUser,
    /// Bumped on every refresh so a stale expiry timer can tell it lost.
    generation: u64,
    expiry: JoinHandle<()>,
}

impl TypingPresence {
    /// Join the typing channel of `channel_id`. Must be called from within a
    /// tokio runtime.
    pub fn join(channel_id: Uuid, dispatcher: Dispatcher, ttl: Duration) -> Self {
        let (changes, _) = watch::channel(Vec::new());
        let inner = Arc::new(TypingInner {
            channel_id,
            ttl,
            dispatcher: dispatcher.clone(),
            entries: Mutex::new(HashMap::new()),
            changes,
        });

        let rx = dispatcher.subscribe(channel_id);
        let listener_inner = inner.clone();
        let listener = Subscription::spawn(move |live| listen(rx, listener_inner, live));

        Self {
            inner,
            _listener: listener,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.inner.channel_id
    }

    /// Announce that `user_id` is typing. Call again to keep the indicator
    /// alive past the expiry window.
    pub fn start_typing(&self, user_id: Uuid, display_name: &str) {
        self.inner.dispatcher.broadcast(GatewayEvent::TypingStart {
            channel_id: self.inner.channel_id,
            user_id,
            display_name: display_name.to_string(),
        });
    }

    pub fn stop_typing(&self, user_id: Uuid) {
        self.inner.dispatcher.broadcast(GatewayEvent::TypingStop {
            channel_id: self.inner.channel_id,
            user_id,
        });
    }

    /// Current set of users typing, ordered by display name.
    pub fn typing_users(&self) -> Vec<TypingUser> {
        self.inner.changes.borrow().clone()
    }

    /// Call `on_change` with the full typing set each time membership changes.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(Vec<TypingUser>) + Send + 'static,
    {
        let mut rx = self.inner.changes.subscribe();
        Subscription::spawn(move |live| async move {
            while rx.changed().await.is_ok() {
                let users = rx.borrow_and_update().clone();
                if !live.is_live() {
                    break;
                }
                on_change(users);
            }
        })
    }
}

impl Drop for TypingPresence {
    fn drop(&mut self) {
        let mut entries = self
            .inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in entries.drain() {
            entry.expiry.abort();
        }
    }
}

async fn listen(
    mut rx: broadcast::Receiver<GatewayEvent>,
    inner: Arc<TypingInner>,
    live: Liveness,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // Missed signals only make indicators vanish early
                warn!("Typing listener lagged by {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if !live.is_live() {
            break;
        }

        match event {
            GatewayEvent::TypingStart {
                user_id,
                display_name,
                ..
            } => inner.mark_typing(user_id, display_name),
            GatewayEvent::TypingStop { user_id, .. } => inner.clear(user_id),
            GatewayEvent::MessageChange(_) => {}
        }
    }
}

impl TypingInner {
    fn mark_typing(self: &Arc<Self>, user_id: Uuid, display_name: String) {
        let expires_at = Utc::now() + TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::zero());
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        let (generation, changed) = match entries.get(&user_id) {
            Some(existing) => {
                existing.expiry.abort();
                (
                    existing.generation + 1,
                    existing.user.display_name != display_name,
                )
            }
            None => (0, true),
        };

        let expiry = self.schedule_expiry(user_id, generation);
        entries.insert(
            user_id,
            TypingEntry {
                user: TypingUser {
                    user_id,
                    display_name,
                    expires_at,
                },
                generation,
                expiry,
            },
        );

        if changed {
            self.publish(&entries);
        }
    }

    fn clear(&self, user_id: Uuid) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.remove(&user_id) {
            entry.expiry.abort();
            self.publish(&entries);
        }
    }

    fn expire(&self, user_id: Uuid, generation: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(&user_id).is_some_and(|e| e.generation == generation) {
            entries.remove(&user_id);
            debug!("Typing indicator for {} expired in {}", user_id, self.channel_id);
            self.publish(&entries);
        }
    }

    fn schedule_expiry(self: &Arc<Self>, user_id: Uuid, generation: u64) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(user_id, generation);
            }
        })
    }

    fn publish(&self, entries: &HashMap<Uuid, TypingEntry>) {
        let mut users: Vec<TypingUser> = entries.values().map(|e| e.user.clone()).collect();
        users.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then(a.user_id.cmp(&b.user_id))
        });
        self.changes.send_replace(users);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(150);

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn start_and_stop() {
        let dispatcher = Dispatcher::new();
        let channel = Uuid::new_v4();
        let presence = TypingPresence::join(channel, dispatcher, TTL);
        let alice = Uuid::new_v4();

        presence.start_typing(alice, "Alice");
        settle().await;
        let users = presence.typing_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "Alice");

        presence.stop_typing(alice);
        settle().await;
        assert!(presence.typing_users().is_empty());
    }

    #[tokio::test]
    async fn signals_reach_other_sessions() {
        let dispatcher = Dispatcher::new();
        let channel = Uuid::new_v4();
        let mine = TypingPresence::join(channel, dispatcher.clone(), TTL);
        let theirs = TypingPresence::join(channel, dispatcher.clone(), TTL);
        let elsewhere = TypingPresence::join(Uuid::new_v4(), dispatcher, TTL);

        mine.start_typing(Uuid::new_v4(), "Bob");
        settle().await;

        assert_eq!(theirs.typing_users().len(), 1);
        assert!(elsewhere.typing_users().is_empty());
    }

    #[tokio::test]
    async fn refresh_extends_expiry() {
        let dispatcher = Dispatcher::new();
        let presence = TypingPresence::join(Uuid::new_v4(), dispatcher, TTL);
        let alice = Uuid::new_v4();

        presence.start_typing(alice, "Alice");
        tokio::time::sleep(Duration::from_millis(100)).await;
        presence.start_typing(alice, "Alice");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 200ms since the first start, but only 100ms since the refresh
        assert_eq!(presence.typing_users().len(), 1);

        tokio::time::sleep(TTL).await;
        assert!(presence.typing_users().is_empty());
    }
}
