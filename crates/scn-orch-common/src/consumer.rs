//! Per-key deduplicating task queue.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;

/// Operation requested for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Add or update
    Set,
    /// Delete
    Del,
}

impl Operation {
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// Key, operation and value tuple: the unit of work held by a [`Consumer`].
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOpValue<K, V> {
    pub key: K,
    pub op: Operation,
    /// Present for `Set`, absent for `Del`.
    pub value: Option<V>,
}

impl<K, V> KeyOpValue<K, V> {
    pub fn set(key: K, value: V) -> Self {
        Self {
            key,
            op: Operation::Set,
            value: Some(value),
        }
    }

    pub fn del(key: K) -> Self {
        Self {
            key,
            op: Operation::Del,
            value: None,
        }
    }
}

/// Pending work for an Orch, deduplicated per key.
///
/// When several operations arrive for the same key before the Orch runs:
/// - SET after SET: the newer value replaces the older one
/// - DEL: clears any pending operations for the key, then queues the DEL
/// - SET after DEL: both are kept, in order
///
/// Entries are drained in key order.
pub struct Consumer<K, V> {
    name: String,
    to_sync: BTreeMap<K, VecDeque<KeyOpValue<K, V>>>,
    pending_count: usize,
}

impl<K, V> Consumer<K, V>
where
    K: Ord + Clone + Debug,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            to_sync: BTreeMap::new(),
            pending_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Queues a batch of entries with deduplication.
    pub fn add_to_sync(&mut self, entries: impl IntoIterator<Item = KeyOpValue<K, V>>) {
        for entry in entries {
            self.add_single_entry(entry);
        }
    }

    fn add_single_entry(&mut self, entry: KeyOpValue<K, V>) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();

        match entry.op {
            Operation::Del => {
                self.pending_count -= queue.len();
                queue.clear();
                queue.push_back(entry);
                self.pending_count += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        *last = entry;
                        return;
                    }
                }
                queue.push_back(entry);
                self.pending_count += 1;
            }
        }
    }

    /// Removes and returns every pending entry.
    pub fn drain(&mut self) -> Vec<KeyOpValue<K, V>> {
        let mut result = Vec::with_capacity(self.pending_count);
        for (_key, queue) in std::mem::take(&mut self.to_sync) {
            result.extend(queue);
        }
        self.pending_count = 0;
        result
    }

    pub fn peek(&self) -> impl Iterator<Item = &KeyOpValue<K, V>> {
        self.to_sync.values().flat_map(|q| q.iter())
    }

    /// Puts an entry back at the front of its key's queue.
    pub fn retry(&mut self, entry: KeyOpValue<K, V>) {
        let queue = self.to_sync.entry(entry.key.clone()).or_default();
        queue.push_front(entry);
        self.pending_count += 1;
    }

    pub fn clear(&mut self) {
        self.to_sync.clear();
        self.pending_count = 0;
    }

    /// Dumps pending entries for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.peek()
            .map(|e| {
                let op = if e.op.is_set() { "SET" } else { "DEL" };
                format!("{}: {} {:?}", self.name, op, e.key)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_consumer_basic() {
        let mut consumer: Consumer<u32, &str> = Consumer::new("HOSTS");
        assert_eq!(consumer.name(), "HOSTS");
        assert!(!consumer.has_pending());

        consumer.add_to_sync([KeyOpValue::set(1, "a"), KeyOpValue::set(2, "b")]);
        assert_eq!(consumer.pending_count(), 2);
    }

    #[test]
    fn test_consumer_set_replaces_set() {
        let mut consumer = Consumer::new("STATS");
        consumer.add_to_sync([KeyOpValue::set(1, 10)]);
        consumer.add_to_sync([KeyOpValue::set(1, 20)]);

        assert_eq!(consumer.pending_count(), 1);
        let entries = consumer.drain();
        assert_eq!(entries, vec![KeyOpValue::set(1, 20)]);
        assert!(!consumer.has_pending());
    }

    #[test]
    fn test_consumer_del_clears_set() {
        let mut consumer = Consumer::new("PATHS");
        consumer.add_to_sync([KeyOpValue::set("p", 1), KeyOpValue::del("p")]);

        assert_eq!(consumer.pending_count(), 1);
        let entries = consumer.drain();
        assert!(entries[0].op.is_del());
        assert!(entries[0].value.is_none());
    }

    #[test]
    fn test_consumer_del_then_set() {
        let mut consumer = Consumer::new("PATHS");
        consumer.add_to_sync([KeyOpValue::del("p"), KeyOpValue::set("p", 1)]);

        assert_eq!(consumer.pending_count(), 2);
        let entries = consumer.drain();
        assert!(entries[0].op.is_del());
        assert!(entries[1].op.is_set());
    }

    #[test]
    fn test_consumer_drains_in_key_order() {
        let mut consumer = Consumer::new("STATS");
        consumer.add_to_sync([KeyOpValue::set(3, ()), KeyOpValue::set(1, ()), KeyOpValue::set(2, ())]);

        let keys: Vec<_> = consumer.drain().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_consumer_retry_and_dump() {
        let mut consumer = Consumer::new("PATHS");
        consumer.add_to_sync([KeyOpValue::set(7, "late")]);
        consumer.retry(KeyOpValue::del(7));

        assert_eq!(consumer.pending_count(), 2);
        assert_eq!(consumer.dump(), vec!["PATHS: DEL 7", "PATHS: SET 7"]);
    }
}
