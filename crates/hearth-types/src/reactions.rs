use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;
use uuid::Uuid;

/// One emoji's reaction state. `count` always equals `users.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reaction {
    count: u32,
    users: BTreeSet<Uuid>,
}

impl Reaction {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn users(&self) -> &BTreeSet<Uuid> {
        &self.users
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.users.contains(user_id)
    }
}

/// Reactions on a message, keyed by emoji.
///
/// Every mutation goes through [`add`](Self::add), [`remove`](Self::remove)
/// or [`toggle`](Self::toggle), which keep two invariants:
/// a user is counted at most once per emoji, and an emoji whose count drops
/// to zero is removed from the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReactionMap(BTreeMap<String, Reaction>);

impl ReactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user_id` reacting with `emoji`. Returns false if the user had
    /// already reacted with it.
    pub fn add(&mut self, emoji: &str, user_id: Uuid) -> bool {
        let reaction = self.0.entry(emoji.to_string()).or_insert_with(|| Reaction {
            count: 0,
            users: BTreeSet::new(),
        });

        if !reaction.users.insert(user_id) {
            return false;
        }
        reaction.count += 1;
        true
    }

    /// Withdraw `user_id`'s `emoji` reaction. Returns false if there was none.
    pub fn remove(&mut self, emoji: &str, user_id: Uuid) -> bool {
        let Some(reaction) = self.0.get_mut(emoji) else {
            return false;
        };

        if !reaction.users.remove(&user_id) {
            return false;
        }
        reaction.count -= 1;

        if reaction.count == 0 {
            self.0.remove(emoji);
        }
        true
    }

    /// Remove the reaction if present, add it otherwise.
    /// Returns true when the reaction ends up added.
    pub fn toggle(&mut self, emoji: &str, user_id: Uuid) -> bool {
        if self.has_reacted(emoji, user_id) {
            self.remove(emoji, user_id);
            false
        } else {
            self.add(emoji, user_id)
        }
    }

    pub fn has_reacted(&self, emoji: &str, user_id: Uuid) -> bool {
        self.0.get(emoji).is_some_and(|r| r.contains(&user_id))
    }

    pub fn get(&self, emoji: &str) -> Option<&Reaction> {
        self.0.get(emoji)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Reaction)> {
        self.0.iter().map(|(emoji, reaction)| (emoji.as_str(), reaction))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a map from `(emoji, user_id)` rows, as stored one-per-row.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Uuid)>,
        S: AsRef<str>,
    {
        let mut map = Self::new();
        for (emoji, user_id) in pairs {
            map.add(emoji.as_ref(), user_id);
        }
        map
    }
}

/// Reaction payload shapes accepted from backends.
///
/// Older writers stored a bare counter per emoji; newer ones store
/// `{count, users}`. Both are folded into [`ReactionMap`] at deserialization.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReaction {
    Detailed {
        #[serde(default)]
        #[allow(dead_code)]
        count: Option<u64>,
        #[serde(default)]
        users: Vec<Uuid>,
    },
    Counter(u64),
}

impl<'de> Deserialize<'de> for ReactionMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, RawReaction>::deserialize(deserializer)?;
        let mut map = ReactionMap::new();

        for (emoji, reaction) in raw {
            match reaction {
                // `count` is recomputed from `users`; a stored count can drift
                RawReaction::Detailed { users, .. } => {
                    for user_id in users {
                        map.add(&emoji, user_id);
                    }
                }
                RawReaction::Counter(n) => {
                    debug!("Dropping unattributed reaction counter {}={}", emoji, n);
                }
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(map: &ReactionMap) {
        for (emoji, reaction) in map.iter() {
            assert_eq!(reaction.count() as usize, reaction.users().len(), "emoji {emoji}");
            assert!(reaction.count() > 0, "zero-count key {emoji}");
        }
    }

    #[test]
    fn add_is_idempotent() {
        let user = Uuid::new_v4();
        let mut once = ReactionMap::new();
        once.add("👍", user);

        let mut twice = once.clone();
        assert!(!twice.add("👍", user));
        assert_eq!(once, twice);
        assert_eq!(twice.get("👍").unwrap().count(), 1);
    }

    #[test]
    fn remove_deletes_empty_key() {
        let user = Uuid::new_v4();
        let mut map = ReactionMap::new();
        map.add("🔥", user);
        assert!(map.remove("🔥", user));
        assert!(map.get("🔥").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn remove_absent_is_noop() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut map = ReactionMap::new();
        map.add("🎉", alice);
        let before = map.clone();

        assert!(!map.remove("🎉", bob));
        assert!(!map.remove("❤️", alice));
        assert_eq!(map, before);
    }

    #[test]
    fn toggle_flips_state() {
        let user = Uuid::new_v4();
        let mut map = ReactionMap::new();
        assert!(map.toggle("😂", user));
        assert!(map.has_reacted("😂", user));
        assert!(!map.toggle("😂", user));
        assert!(map.is_empty());
    }

    #[test]
    fn invariant_holds_across_mixed_sequence() {
        let users: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let emojis = ["👍", "🔥", "🎉"];
        let mut map = ReactionMap::new();

        // Deterministic pseudo-random walk over add/remove/toggle
        let mut state: u32 = 17;
        for _ in 0..500 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let user = users[(state >> 8) as usize % users.len()];
            let emoji = emojis[(state >> 16) as usize % emojis.len()];
            match (state >> 24) % 3 {
                0 => {
                    map.add(emoji, user);
                }
                1 => {
                    map.remove(emoji, user);
                }
                _ => {
                    map.toggle(emoji, user);
                }
            }
            assert_invariant(&map);
        }
    }

    #[test]
    fn normalizes_both_payload_shapes() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let json = serde_json::json!({
            "👍": { "count": 7, "users": [alice, bob, alice] },
            "🔥": 3,
            "🎉": { "count": 0, "users": [] },
        });

        let map: ReactionMap = serde_json::from_value(json).unwrap();
        assert_invariant(&map);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("👍").unwrap().count(), 2);
    }

    #[test]
    fn serializes_canonical_shape() {
        let user = Uuid::new_v4();
        let mut map = ReactionMap::new();
        map.add("👍", user);

        let value = serde_json::to_value(&map).unwrap();
        assert_eq!(value["👍"]["count"], 1);
        assert_eq!(value["👍"]["users"][0], serde_json::json!(user));

        let back: ReactionMap = serde_json::from_value(value).unwrap();
        assert_eq!(back, map);
    }
}
