use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use hearth_types::MessageRecord;

/// A send that has not been matched to a confirmed record yet.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub temp_id: Uuid,
    pub channel_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    registered: Instant,
}

/// Short-lived table of optimistic sends, keyed by temp id.
#[derive(Debug)]
pub struct PendingTracker {
    entries: HashMap<Uuid, PendingEntry>,
    match_window: Duration,
    ttl: Duration,
}

impl PendingTracker {
    pub fn new(match_window: Duration, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            match_window,
            ttl,
        }
    }

    /// Track a pending record. Confirmed records and records without a temp
    /// id are refused.
    pub fn register(&mut self, record: &MessageRecord) -> bool {
        let Some(temp_id) = record.temp_id.filter(|_| record.is_pending()) else {
            return false;
        };
        self.entries.insert(
            temp_id,
            PendingEntry {
                temp_id,
                channel_id: record.channel_id,
                author_id: record.author_id,
                content: record.content.clone(),
                created_at: record.created_at,
                registered: Instant::now(),
            },
        );
        true
    }

    pub fn take(&mut self, temp_id: Uuid) -> Option<PendingEntry> {
        self.entries.remove(&temp_id)
    }

    pub fn contains(&self, temp_id: Uuid) -> bool {
        self.entries.contains_key(&temp_id)
    }

    /// Find and remove the entry a confirmed record most likely came from:
    /// same channel and author, identical content, created within the match
    /// window. The closest in time wins.
    pub fn take_match(&mut self, record: &MessageRecord) -> Option<PendingEntry> {
        let window = self.match_window.as_millis();

        let temp_id = self
            .entries
            .values()
            .filter(|e| {
                e.channel_id == record.channel_id
                    && e.author_id == record.author_id
                    && e.content == record.content
            })
            .map(|e| (distance_ms(e.created_at, record.created_at), e))
            .filter(|(delta, _)| u128::from(*delta) <= window)
            .min_by_key(|(delta, e)| (*delta, e.registered))
            .map(|(_, e)| e.temp_id)?;

        self.entries.remove(&temp_id)
    }

    /// Drop entries registered longer ago than the TTL. Returns their temp ids.
    pub fn prune_expired(&mut self, now: Instant) -> Vec<Uuid> {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        self.entries.retain(|temp_id, e| {
            let keep = now.saturating_duration_since(e.registered) < ttl;
            if !keep {
                expired.push(*temp_id);
            }
            keep
        });
        if !expired.is_empty() {
            debug!("Pruned {} expired pending entries", expired.len());
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn distance_ms(a: DateTime<Utc>, b: DateTime<Utc>) -> u64 {
    (a - b).num_milliseconds().unsigned_abs()
}
