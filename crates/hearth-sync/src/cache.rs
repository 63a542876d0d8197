use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use hearth_types::MessageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Pending(Uuid),
    Confirmed(Uuid),
}

/// Last known state of a channel's messages plus their rendered order.
///
/// Tombstones stay in `records` so late deliveries can't resurrect them, but
/// are skipped by [`MessageCache::rendered`]. A tombstone or update learned
/// for a message that was never loaded has no slot in `order`; when that
/// message is placed later, the newer of the two versions wins.
#[derive(Debug, Default)]
pub struct MessageCache {
    records: HashMap<CacheKey, MessageRecord>,
    order: Vec<CacheKey>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<&MessageRecord> {
        self.records.get(&CacheKey::Confirmed(id))
    }

    pub fn get_pending(&self, temp_id: Uuid) -> Option<&MessageRecord> {
        self.records.get(&CacheKey::Pending(temp_id))
    }

    /// True for any confirmed id the cache has seen, tombstones included.
    pub fn contains(&self, id: Uuid) -> bool {
        self.records.contains_key(&CacheKey::Confirmed(id))
    }

    /// True if the confirmed id has a slot in the rendered order.
    pub fn is_placed(&self, id: Uuid) -> bool {
        self.order.contains(&CacheKey::Confirmed(id))
    }

    pub fn push_pending(&mut self, record: MessageRecord) -> bool {
        let Some(temp_id) = record.temp_id.filter(|_| record.is_pending()) else {
            return false;
        };
        let key = CacheKey::Pending(temp_id);
        if self.records.insert(key, record).is_none() {
            self.order.push(key);
        }
        true
    }

    pub fn remove_pending(&mut self, temp_id: Uuid) -> Option<MessageRecord> {
        let key = CacheKey::Pending(temp_id);
        let record = self.records.remove(&key)?;
        self.order.retain(|k| *k != key);
        Some(record)
    }

    /// Remember a live confirmed record that has no slot yet, such as an
    /// update that overtook its insert. Returns false if the id is already
    /// placed or tombstoned.
    pub fn hold(&mut self, record: MessageRecord) -> bool {
        let Some(id) = record.id.filter(|_| !record.is_deleted()) else {
            return false;
        };
        if self.is_placed(id) || self.is_tombstoned(id) {
            return false;
        }
        self.records.insert(CacheKey::Confirmed(id), record);
        true
    }

    /// Resolve `record` against a held version of the same message before it
    /// gets a slot. None if the id already has a slot or is tombstoned.
    fn settle(&mut self, key: CacheKey, record: MessageRecord) -> Option<MessageRecord> {
        if self.order.contains(&key) {
            return None;
        }
        match self.records.remove(&key) {
            None => Some(record),
            Some(known) if known.is_deleted() => {
                self.records.insert(key, known);
                None
            }
            Some(known) if known.updated_at >= record.updated_at => Some(known),
            Some(_) => Some(record),
        }
    }

    /// Swap a pending slot for its confirmed record, keeping its position.
    /// Returns the record now in the slot, or None if there is no such
    /// pending slot or the id cannot be placed.
    pub fn replace_pending(&mut self, temp_id: Uuid, record: MessageRecord) -> Option<MessageRecord> {
        let key = CacheKey::Confirmed(record.id?);
        let pending = CacheKey::Pending(temp_id);
        let pos = self.order.iter().position(|k| *k == pending)?;
        let record = self.settle(key, record)?;

        self.records.remove(&pending);
        self.order[pos] = key;
        self.records.insert(key, record.clone());
        Some(record)
    }

    /// Add a confirmed record at the end of the rendered order and return
    /// what was placed. Placed and tombstoned ids are left alone.
    pub fn append(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        let key = CacheKey::Confirmed(record.id?);
        let record = self.settle(key, record)?;
        self.records.insert(key, record.clone());
        self.order.push(key);
        Some(record)
    }

    /// Add a confirmed record from history in `created_at` order. Pending
    /// slots always stay after confirmed ones.
    pub fn insert_sorted(&mut self, record: MessageRecord) -> Option<MessageRecord> {
        let key = CacheKey::Confirmed(record.id?);
        let record = self.settle(key, record)?;

        let pos = self
            .order
            .iter()
            .position(|k| match k {
                CacheKey::Pending(_) => true,
                CacheKey::Confirmed(_) => self
                    .records
                    .get(k)
                    .is_some_and(|existing| existing.created_at > record.created_at),
            })
            .unwrap_or(self.order.len());

        self.order.insert(pos, key);
        self.records.insert(key, record.clone());
        Some(record)
    }

    /// Overwrite a known confirmed record, placed or held.
    pub fn update(&mut self, record: MessageRecord) -> bool {
        match record.id.and_then(|id| self.records.get_mut(&CacheKey::Confirmed(id))) {
            Some(slot) => {
                *slot = record;
                true
            }
            None => false,
        }
    }

    /// Store a tombstoned record. Returns false if the cache already held a
    /// tombstone for that id.
    pub fn tombstone(&mut self, record: MessageRecord) -> bool {
        let Some(id) = record.id.filter(|_| record.is_deleted()) else {
            return false;
        };
        let key = CacheKey::Confirmed(id);
        match self.records.get_mut(&key) {
            Some(existing) if existing.is_deleted() => false,
            Some(existing) => {
                *existing = record;
                true
            }
            None => {
                self.records.insert(key, record);
                true
            }
        }
    }

    pub fn is_tombstoned(&self, id: Uuid) -> bool {
        self.get(id).is_some_and(MessageRecord::is_deleted)
    }

    /// Creation time of the oldest live confirmed record in the view.
    pub fn oldest_confirmed(&self) -> Option<DateTime<Utc>> {
        self.order
            .iter()
            .filter(|k| matches!(k, CacheKey::Confirmed(_)))
            .filter_map(|k| self.records.get(k))
            .filter(|r| !r.is_deleted())
            .map(|r| r.created_at)
            .min()
    }

    /// The channel as it should be rendered: pending and confirmed records in
    /// order, tombstones left out.
    pub fn rendered(&self) -> Vec<MessageRecord> {
        self.order
            .iter()
            .filter_map(|k| self.records.get(k))
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.order
            .iter()
            .filter(|k| matches!(k, CacheKey::Pending(_)))
            .count()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }

    /// Number of slots in the rendered order.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
