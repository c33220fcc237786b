//! Indexed min-heap of eviction deadlines.
//!
//! Keeps a key → position map alongside the heap array so a deadline can
//! be updated in O(log n) when an entry is used again.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Instant;

struct Entry<K> {
    key: K,
    deadline: Instant,
}

pub(crate) struct EvictionQueue<K> {
    entries: Vec<Entry<K>>,
    positions: HashMap<K, usize>,
}

impl<K: Hash + Eq + Clone> EvictionQueue<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert a key with its eviction deadline. A key that is already
    /// queued keeps a single entry; its deadline is replaced instead.
    pub fn push(&mut self, key: K, deadline: Instant) {
        if let Some(&idx) = self.positions.get(&key) {
            self.entries[idx].deadline = deadline;
            self.resift(idx);
            return;
        }

        let idx = self.entries.len();
        self.entries.push(Entry {
            key: key.clone(),
            deadline,
        });
        self.positions.insert(key, idx);
        self.sift_up(idx);
    }

    /// The entry with the lowest remaining eviction deadline.
    pub fn peek(&self) -> Option<(&K, Instant)> {
        self.entries.first().map(|e| (&e.key, e.deadline))
    }

    /// Remove and return the entry with the lowest eviction deadline.
    pub fn pop(&mut self) -> Option<(K, Instant)> {
        let last = self.entries.len().checked_sub(1)?;
        self.entries.swap(0, last);
        let entry = self.entries.pop()?;
        self.positions.remove(&entry.key);

        if !self.entries.is_empty() {
            self.positions.insert(self.entries[0].key.clone(), 0);
            self.sift_down(0);
        }

        Some((entry.key, entry.deadline))
    }

    /// Move an existing entry to a new deadline. Returns false if the key
    /// is not queued.
    pub fn update(&mut self, key: &K, deadline: Instant) -> bool {
        let Some(&idx) = self.positions.get(key) else {
            return false;
        };
        self.entries[idx].deadline = deadline;
        self.resift(idx);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    fn resift(&mut self, idx: usize) {
        let idx = self.sift_up(idx);
        self.sift_down(idx);
    }

    fn sift_up(&mut self, mut idx: usize) -> usize {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[idx].deadline >= self.entries[parent].deadline {
                break;
            }
            self.swap_entries(idx, parent);
            idx = parent;
        }
        idx
    }

    fn sift_down(&mut self, mut idx: usize) -> usize {
        loop {
            let left = 2 * idx + 1;
            if left >= self.entries.len() {
                break;
            }

            let mut child = left;
            let right = left + 1;
            if right < self.entries.len() && self.entries[right].deadline < self.entries[left].deadline
            {
                child = right;
            }

            if self.entries[idx].deadline <= self.entries[child].deadline {
                break;
            }
            self.swap_entries(idx, child);
            idx = child;
        }
        idx
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].key.clone(), a);
        self.positions.insert(self.entries[b].key.clone(), b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_orders_by_deadline() {
        let base = Instant::now();
        let mut q = EvictionQueue::new();
        q.push("c", base + Duration::from_secs(3));
        q.push("a", base + Duration::from_secs(1));
        q.push("b", base + Duration::from_secs(2));

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().map(|(k, _)| k), Some("a"));
        assert_eq!(q.pop().map(|(k, _)| k), Some("b"));
        assert_eq!(q.pop().map(|(k, _)| k), Some("c"));
        assert!(q.pop().is_none());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_update_moves_entry() {
        let base = Instant::now();
        let mut q = EvictionQueue::new();
        q.push("a", base + Duration::from_secs(1));
        q.push("b", base + Duration::from_secs(2));

        assert!(q.update(&"a", base + Duration::from_secs(10)));
        assert_eq!(q.peek().map(|(k, _)| *k), Some("b"));

        assert!(!q.update(&"missing", base));
    }

    #[test]
    fn test_push_existing_key_keeps_single_entry() {
        let base = Instant::now();
        let mut q = EvictionQueue::new();
        q.push("a", base + Duration::from_secs(1));
        q.push("a", base + Duration::from_secs(5));

        assert_eq!(q.len(), 1);
        let (key, deadline) = q.pop().unwrap();
        assert_eq!(key, "a");
        assert_eq!(deadline, base + Duration::from_secs(5));
    }
}
