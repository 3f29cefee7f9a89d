//! Bounded dedup cache for at-least-once delivered notifications

use std::collections::{HashSet, VecDeque};

use crate::models::NotificationId;

pub const DEFAULT_DEDUP_CAPACITY: usize = 100;

/// Insertion-ordered membership over recently seen notification ids.
///
/// Inserting past capacity evicts the oldest id, so a very old id can be
/// admitted again. Query and insert are one call; the caller records an id
/// before dispatching it.
#[derive(Debug, Clone)]
pub struct NotificationDeduplicator {
    capacity: usize,
    order: VecDeque<NotificationId>,
    seen: HashSet<NotificationId>,
}

impl NotificationDeduplicator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
        }
    }

    /// `true` if `id` was not seen before. Records it either way.
    pub fn admit(&mut self, id: NotificationId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, id: NotificationId) -> bool {
        self.seen.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for NotificationDeduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
