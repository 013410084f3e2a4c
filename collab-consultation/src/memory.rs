//! Per-counterpart conversation memory.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation in the canonical backend-agnostic shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered histories keyed by counterpart, each seeded with a system turn on
/// first access.
///
/// Appends are sequential per key and never reordered or deduplicated.
/// Different keys are fully independent.
#[derive(Debug)]
pub struct MemoryStore<K: Eq + Hash> {
    seed: Turn,
    histories: DashMap<K, Vec<Turn>>,
}

impl<K: Eq + Hash + Clone> MemoryStore<K> {
    pub fn new(system_message: impl Into<String>) -> Self {
        Self {
            seed: Turn::system(system_message),
            histories: DashMap::new(),
        }
    }

    /// Snapshot of the history for `key`, creating the seeded history if needed.
    pub fn history(&self, key: &K) -> Vec<Turn> {
        self.histories
            .entry(key.clone())
            .or_insert_with(|| vec![self.seed.clone()])
            .clone()
    }

    pub fn append(&self, key: &K, turn: Turn) {
        self.histories
            .entry(key.clone())
            .or_insert_with(|| vec![self.seed.clone()])
            .push(turn);
    }

    /// Append a user/assistant exchange as one unit.
    pub fn record_exchange(&self, key: &K, prompt: impl Into<String>, reply: impl Into<String>) {
        let mut history = self
            .histories
            .entry(key.clone())
            .or_insert_with(|| vec![self.seed.clone()]);
        history.push(Turn::user(prompt));
        history.push(Turn::assistant(reply));
    }

    /// Reset one history to its seed, or all of them when `key` is `None`.
    pub fn forget(&self, key: Option<&K>) {
        match key {
            Some(key) => {
                self.histories.remove(key);
            }
            None => self.histories.clear(),
        }
    }

    pub fn len(&self, key: &K) -> usize {
        self.histories.get(key).map(|h| h.len()).unwrap_or(1)
    }

    pub fn system_message(&self) -> &str {
        &self.seed.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_seeded_history() {
        let store: MemoryStore<u32> = MemoryStore::new("You are a doctor.");
        let history = store.history(&7);
        assert_eq!(history, vec![Turn::system("You are a doctor.")]);
    }

    #[test]
    fn test_histories_are_isolated() {
        let store: MemoryStore<String> = MemoryStore::new("seed");
        store.record_exchange(&"a".to_string(), "hi", "hello");
        store.append(&"b".to_string(), Turn::assistant("greeting"));

        assert_eq!(store.len(&"a".to_string()), 3);
        assert_eq!(store.len(&"b".to_string()), 2);
        let a = store.history(&"a".to_string());
        assert_eq!(a[1], Turn::user("hi"));
        assert_eq!(a[2], Turn::assistant("hello"));
    }

    #[test]
    fn test_forget_one_or_all() {
        let store: MemoryStore<u32> = MemoryStore::new("seed");
        store.append(&1, Turn::user("one"));
        store.append(&2, Turn::user("two"));

        store.forget(Some(&1));
        assert_eq!(store.len(&1), 1);
        assert_eq!(store.len(&2), 2);

        store.forget(None);
        assert_eq!(store.history(&2), vec![Turn::system("seed")]);
    }
}
