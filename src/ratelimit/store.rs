//! Window store: keyed sequences of admission timestamps.
//!
//! The store knows nothing about policies. Keys are `identity:endpoint` and
//! values are the epoch-millisecond timestamps of admitted requests, oldest
//! first. Entries that become empty are removed.

use dashmap::DashMap;
use std::fmt::Debug;

/// Keyed collection of admission timestamp sequences.
///
/// `update` and `retain` are the read-modify-write paths: each runs its
/// closure while holding exclusive access to the entries it touches, so an
/// evaluation and a sweep never interleave on the same key. A shared backend
/// can implement the same contract without changing the evaluator.
pub trait WindowStore: Send + Sync + Debug {
    /// Snapshot of the sequence stored under `key` (empty if absent).
    fn get(&self, key: &str) -> Vec<i64>;

    /// Replace the sequence under `key`. An empty sequence deletes the key.
    fn set(&self, key: &str, timestamps: Vec<i64>);

    /// Remove `key` entirely.
    fn delete(&self, key: &str);

    /// Number of keys currently stored.
    fn size(&self) -> usize;

    /// Drop every key.
    fn clear(&self);

    /// Run `f` against the sequence for `key` under exclusive access.
    ///
    /// The sequence is empty if the key did not exist. If it is empty once
    /// `f` returns, the key is removed.
    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Vec<i64>) -> R;

    /// Keep only the entries for which `f` returns `true`. `f` may shrink
    /// the sequence in place.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&str, &mut Vec<i64>) -> bool;
}

/// In-process window store sharded over a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, Vec<i64>>,
}

impl MemoryWindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }
}

impl WindowStore for MemoryWindowStore {
    fn get(&self, key: &str) -> Vec<i64> {
        self.windows
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, timestamps: Vec<i64>) {
        if timestamps.is_empty() {
            self.windows.remove(key);
        } else {
            self.windows.insert(key.to_string(), timestamps);
        }
    }

    fn delete(&self, key: &str) {
        self.windows.remove(key);
    }

    fn size(&self) -> usize {
        self.windows.len()
    }

    fn clear(&self) {
        self.windows.clear();
    }

    fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Vec<i64>) -> R,
    {
        let (result, now_empty) = {
            let mut entry = self.windows.entry(key.to_string()).or_default();
            let result = f(entry.value_mut());
            (result, entry.value().is_empty())
        };

        // The entry guard must be dropped before touching the map again.
        if now_empty {
            self.windows.remove_if(key, |_, timestamps| timestamps.is_empty());
        }
        result
    }

    fn retain<F>(&self, mut f: F)
    where
        F: FnMut(&str, &mut Vec<i64>) -> bool,
    {
        self.windows
            .retain(|key, timestamps| f(key.as_str(), timestamps) && !timestamps.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_key_is_empty() {
        let store = MemoryWindowStore::new();
        assert!(store.get("nobody:product").is_empty());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_set_get_delete() {
        let store = MemoryWindowStore::new();
        store.set("a:product", vec![1, 2, 3]);
        assert_eq!(store.get("a:product"), vec![1, 2, 3]);
        assert_eq!(store.size(), 1);

        store.delete("a:product");
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_set_empty_deletes() {
        let store = MemoryWindowStore::new();
        store.set("a:cart", vec![5]);
        store.set("a:cart", Vec::new());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_update_creates_and_returns() {
        let store = MemoryWindowStore::new();
        let len = store.update("a:search", |timestamps| {
            timestamps.push(10);
            timestamps.len()
        });
        assert_eq!(len, 1);
        assert_eq!(store.get("a:search"), vec![10]);
    }

    #[test]
    fn test_update_leaving_empty_removes_key() {
        let store = MemoryWindowStore::new();
        store.update("a:search", |_| ());
        assert_eq!(store.size(), 0);

        store.set("b:search", vec![1]);
        store.update("b:search", |timestamps| timestamps.clear());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_retain_drops_emptied_entries() {
        let store = MemoryWindowStore::new();
        store.set("a:shop", vec![1, 2]);
        store.set("b:shop", vec![3, 4]);

        store.retain(|_, timestamps| {
            timestamps.retain(|&t| t > 2);
            true
        });

        assert_eq!(store.size(), 1);
        assert_eq!(store.get("b:shop"), vec![3, 4]);
        assert!(store.get("a:shop").is_empty());
    }
}
