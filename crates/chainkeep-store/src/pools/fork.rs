//! `Fork<T>`: an ordered sequence of candidate items above a fork point. Used directly by the
//! block organizer (chaining candidate blocks) and, via `HeaderBranch = Fork<HeaderEntry>`, by
//! the header pool.

use bitcoin::BlockHash;
use chainkeep_common::CoreError;

/// Anything that can be chained in a `Fork`: knows its own hash, its parent's hash, and a
/// work value forks are ranked by.
pub trait ForkItem: Clone {
    fn hash(&self) -> BlockHash;
    fn prev_hash(&self) -> BlockHash;
    fn work(&self) -> u128;
}

/// A candidate chain above `fork_point`. `push` only accepts an item whose parent is the current
/// tip (or `fork_point` itself, for the first item), so a `Fork` is always contiguous by
/// construction.
#[derive(Clone, Debug)]
pub struct Fork<T: ForkItem> {
    fork_point: BlockHash,
    items: Vec<T>,
}

impl<T: ForkItem> Fork<T> {
    pub fn new(fork_point: BlockHash) -> Self {
        Self {
            fork_point,
            items: Vec::new(),
        }
    }

    pub fn fork_point(&self) -> BlockHash {
        self.fork_point
    }

    fn tip(&self) -> BlockHash {
        self.items.last().map(ForkItem::hash).unwrap_or(self.fork_point)
    }

    pub fn push(&mut self, item: T) -> Result<(), CoreError> {
        if item.prev_hash() != self.tip() {
            return Err(CoreError::MissingAncestor(item.hash()));
        }
        self.items.push(item);
        Ok(())
    }

    /// Truncates from index `i`, returning the removed tail. `reason` is recorded by callers
    /// only for logging; the fork itself doesn't track rejection reasons.
    pub fn pop(&mut self, i: usize) -> Vec<T> {
        self.items.split_off(i.min(self.items.len()))
    }

    pub fn difficulty(&self) -> u128 {
        self.items.iter().map(ForkItem::work).sum()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn hash_at(&self, index: usize) -> Option<BlockHash> {
        self.items.get(index).map(ForkItem::hash)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Block {
        hash: BlockHash,
        prev: BlockHash,
        work: u128,
    }

    impl ForkItem for Block {
        fn hash(&self) -> BlockHash {
            self.hash
        }
        fn prev_hash(&self) -> BlockHash {
            self.prev
        }
        fn work(&self) -> u128 {
            self.work
        }
    }

    fn hash(b: u8) -> BlockHash {
        BlockHash::from_str(&format!("{:02x}{}", b, "0".repeat(62))).unwrap()
    }

    #[test]
    fn push_rejects_a_block_that_does_not_extend_the_tip() {
        let point = hash(0);
        let mut fork: Fork<Block> = Fork::new(point);
        fork.push(Block { hash: hash(1), prev: point, work: 10 }).unwrap();
        let err = fork.push(Block { hash: hash(2), prev: hash(9), work: 10 });
        assert!(err.is_err());
    }

    #[test]
    fn difficulty_sums_pushed_work() {
        let point = hash(0);
        let mut fork: Fork<Block> = Fork::new(point);
        fork.push(Block { hash: hash(1), prev: point, work: 10 }).unwrap();
        fork.push(Block { hash: hash(2), prev: hash(1), work: 20 }).unwrap();
        assert_eq!(fork.difficulty(), 30);
    }

    #[test]
    fn pop_truncates_and_returns_the_tail() {
        let point = hash(0);
        let mut fork: Fork<Block> = Fork::new(point);
        fork.push(Block { hash: hash(1), prev: point, work: 1 }).unwrap();
        fork.push(Block { hash: hash(2), prev: hash(1), work: 1 }).unwrap();
        let tail = fork.pop(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(fork.len(), 1);
    }
}
