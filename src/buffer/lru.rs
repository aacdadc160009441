//! Recency ordering for the page cache.

use std::collections::HashMap;
use std::hash::Hash;

/// Tracks keys from most to least recently used.
///
/// Nodes live in a slab and are threaded into a doubly-linked list, so
/// touch, remove and eviction are all O(1).
pub struct LruOrder<K> {
    slots: HashMap<K, usize>,
    nodes: Vec<Node<K>>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    vacant: Vec<usize>,
}

#[derive(Clone, Copy)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

impl<K: Copy + Eq + Hash> LruOrder<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            vacant: Vec::new(),
        }
    }

    /// Mark `key` as most recently used, inserting it if new
    pub fn touch(&mut self, key: K) {
        match self.slots.get(&key) {
            Some(&slot) => {
                if self.head != Some(slot) {
                    self.unlink(slot);
                    self.push_front(slot);
                }
            }
            None => {
                let node = Node {
                    key,
                    prev: None,
                    next: None,
                };
                let slot = match self.vacant.pop() {
                    Some(slot) => {
                        self.nodes[slot] = node;
                        slot
                    }
                    None => {
                        self.nodes.push(node);
                        self.nodes.len() - 1
                    }
                };
                self.slots.insert(key, slot);
                self.push_front(slot);
            }
        }
    }

    /// Forget `key`; returns whether it was tracked
    pub fn remove(&mut self, key: &K) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.unlink(slot);
                self.vacant.push(slot);
                true
            }
            None => false,
        }
    }

    /// Remove and return the least recently used key
    pub fn pop_oldest(&mut self) -> Option<K> {
        let key = self.nodes[self.tail?].key;
        self.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.nodes.clear();
        self.vacant.clear();
        self.head = None;
        self.tail = None;
    }

    fn push_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.head;
        if let Some(old) = self.head {
            self.nodes[old].prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Node { prev, next, .. } = self.nodes[slot];
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_basic() {
        let mut order = LruOrder::with_capacity(3);

        order.touch(1);
        order.touch(2);
        order.touch(3);

        // 1 becomes most recent, 2 is now the oldest
        order.touch(1);
        assert_eq!(order.pop_oldest(), Some(2));
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_lru_remove() {
        let mut order = LruOrder::with_capacity(3);

        order.touch(1);
        order.touch(2);
        order.touch(3);

        assert!(order.remove(&2));
        assert!(!order.remove(&2));
        assert_eq!(order.len(), 2);

        assert_eq!(order.pop_oldest(), Some(1));
        assert_eq!(order.pop_oldest(), Some(3));
        assert_eq!(order.pop_oldest(), None);
    }

    #[test]
    fn test_lru_reuses_vacant_slots() {
        let mut order = LruOrder::with_capacity(2);
        for round in 0..10 {
            order.touch(round);
            if order.len() > 2 {
                order.pop_oldest();
            }
        }
        assert_eq!(order.len(), 2);
        assert!(order.nodes.len() <= 3);
        assert_eq!(order.pop_oldest(), Some(8));

        order.clear();
        assert_eq!(order.pop_oldest(), None);
    }
}
