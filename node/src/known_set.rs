//! Recently-seen notification set: stops a block hash or raw transaction
//! that the daemon pushes twice from being published twice.
//!
//! Each set remembers only the most recent notifications. Once a set is at
//! capacity, recording a new one forgets whichever was recorded first.

use std::collections::{HashSet, VecDeque};

/// Capacity of the block-hash set.
pub const KNOWN_BLOCKS: usize = 50;

/// Capacity of each transaction set.
pub const KNOWN_TRANSACTIONS: usize = 5000;

pub struct KnownSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl KnownSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `key`. Returns `false` if it was already known.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.set.contains(key) {
            return false;
        }
        if self.capacity == 0 {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        self.set.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}
