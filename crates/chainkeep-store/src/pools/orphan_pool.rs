//! Ring buffer of blocks (or headers) awaiting a missing ancestor. Grounded on spec.md §4.F's
//! `orphan_pool`: fixed capacity, duplicate rejection, and `trace(end)` to walk the longest
//! ancestor chain it holds ending at a given hash.

use std::collections::{HashSet, VecDeque};
use std::sync::RwLock;

use bitcoin::BlockHash;

use super::fork::ForkItem;

struct Inner<T> {
    entries: VecDeque<T>,
    seen: HashSet<BlockHash>,
}

/// Thread-safe via a plain reader/writer lock, independent of the store's own lock (spec.md §5:
/// "the orphan and header pools have their own reader/writer mutexes").
pub struct OrphanPool<T: ForkItem> {
    capacity: usize,
    inner: RwLock<Inner<T>>,
}

impl<T: ForkItem> OrphanPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                seen: HashSet::new(),
            }),
        }
    }

    /// Adds `item`, evicting the oldest entry if at capacity. Returns `false` (and leaves the
    /// pool untouched) if `item`'s hash is already present.
    pub fn add(&self, item: T) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.seen.contains(&item.hash()) {
            return false;
        }
        if inner.entries.len() == self.capacity {
            if let Some(evicted) = inner.entries.pop_front() {
                inner.seen.remove(&evicted.hash());
            }
        }
        inner.seen.insert(item.hash());
        inner.entries.push_back(item);
        true
    }

    pub fn contains(&self, hash: BlockHash) -> bool {
        self.inner.read().unwrap().seen.contains(&hash)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The longest ancestor chain held in the pool ending at `end`, oldest first.
    pub fn trace(&self, end: BlockHash) -> Vec<T> {
        let inner = self.inner.read().unwrap();
        let by_hash: std::collections::HashMap<BlockHash, &T> =
            inner.entries.iter().map(|e| (e.hash(), e)).collect();

        let mut chain = Vec::new();
        let mut cursor = end;
        while let Some(item) = by_hash.get(&cursor) {
            chain.push((*item).clone());
            cursor = item.prev_hash();
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Item {
        hash: BlockHash,
        prev: BlockHash,
    }

    impl ForkItem for Item {
        fn hash(&self) -> BlockHash {
            self.hash
        }
        fn prev_hash(&self) -> BlockHash {
            self.prev
        }
        fn work(&self) -> u128 {
            1
        }
    }

    fn hash(b: u8) -> BlockHash {
        BlockHash::from_str(&format!("{:02x}{}", b, "0".repeat(62))).unwrap()
    }

    #[test]
    fn add_rejects_duplicates() {
        let pool: OrphanPool<Item> = OrphanPool::new(8);
        let item = Item { hash: hash(1), prev: hash(0) };
        assert!(pool.add(item.clone()));
        assert!(!pool.add(item));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let pool: OrphanPool<Item> = OrphanPool::new(2);
        pool.add(Item { hash: hash(1), prev: hash(0) });
        pool.add(Item { hash: hash(2), prev: hash(1) });
        pool.add(Item { hash: hash(3), prev: hash(2) });
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(hash(1)));
    }

    #[test]
    fn trace_walks_the_ancestor_chain() {
        let pool: OrphanPool<Item> = OrphanPool::new(8);
        pool.add(Item { hash: hash(1), prev: hash(0) });
        pool.add(Item { hash: hash(2), prev: hash(1) });
        pool.add(Item { hash: hash(3), prev: hash(2) });

        let chain = pool.trace(hash(3));
        let hashes: Vec<_> = chain.iter().map(|i| i.hash).collect();
        assert_eq!(hashes, vec![hash(1), hash(2), hash(3)]);
    }
}
