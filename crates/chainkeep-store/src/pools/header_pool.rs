//! Header pool: a tree of header entries keyed by hash, each node holding its parent hash and
//! child list, used to enumerate candidate branches competing with the indexed chain's top.

use std::collections::HashMap;

use bitcoin::block::Header as BlockHeader;
use bitcoin::BlockHash;
use chainkeep_common::CoreError;

use super::fork::{Fork, ForkItem};

/// A lightweight header projection: the header itself, plus the height it would occupy if
/// connected. `Fork<HeaderEntry>` is the header pool's branch representation.
#[derive(Clone, Debug)]
pub struct HeaderEntry {
    pub header: BlockHeader,
    pub height: u32,
}

impl ForkItem for HeaderEntry {
    fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    /// Lower `bits` encode a harder target, i.e. more work; this orders candidate header
    /// branches correctly without requiring a byte-exact chainwork accumulator.
    fn work(&self) -> u128 {
        u128::from(u32::MAX - self.header.bits.to_consensus())
    }
}

pub type HeaderBranch = Fork<HeaderEntry>;

struct Node {
    entry: HeaderEntry,
    children: Vec<BlockHash>,
}

pub struct HeaderPool {
    indexed_top: BlockHash,
    nodes: HashMap<BlockHash, Node>,
}

impl HeaderPool {
    pub fn new(indexed_top: BlockHash) -> Self {
        Self {
            indexed_top,
            nodes: HashMap::new(),
        }
    }

    pub fn insert(&mut self, entry: HeaderEntry) -> Result<(), CoreError> {
        let hash = entry.hash();
        let parent = entry.prev_hash();
        if parent != self.indexed_top && !self.nodes.contains_key(&parent) {
            return Err(CoreError::MissingAncestor(hash));
        }
        self.nodes.insert(hash, Node { entry, children: Vec::new() });
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(hash);
        }
        Ok(())
    }

    pub fn contains(&self, hash: BlockHash) -> bool {
        self.nodes.contains_key(&hash)
    }

    pub fn indexed_top(&self) -> BlockHash {
        self.indexed_top
    }

    /// The branch from the indexed top up to and including `hash`, if `hash` names a pooled
    /// header (directly or transitively rooted at the indexed top).
    pub fn branch_to(&self, hash: BlockHash) -> Option<HeaderBranch> {
        let mut chain = Vec::new();
        let mut cursor = hash;
        loop {
            let node = self.nodes.get(&cursor)?;
            chain.push(node.entry.clone());
            if node.entry.prev_hash() == self.indexed_top {
                break;
            }
            cursor = node.entry.prev_hash();
        }
        chain.reverse();
        let mut branch = Fork::new(self.indexed_top);
        for entry in chain {
            branch.push(entry).ok()?;
        }
        Some(branch)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Every maximal branch rooted at a direct child of the indexed top, leaf-terminated.
    pub fn branches(&self) -> Vec<HeaderBranch> {
        let roots: Vec<BlockHash> = self
            .nodes
            .values()
            .filter(|n| n.entry.prev_hash() == self.indexed_top)
            .map(|n| n.entry.hash())
            .collect();

        let mut out = Vec::new();
        for root in roots {
            self.collect_branches(root, Fork::new(self.indexed_top), &mut out);
        }
        out
    }

    fn collect_branches(&self, hash: BlockHash, mut branch: HeaderBranch, out: &mut Vec<HeaderBranch>) {
        let node = &self.nodes[&hash];
        branch
            .push(node.entry.clone())
            .expect("a branch built by walking child links is always contiguous");
        if node.children.is_empty() {
            out.push(branch);
            return;
        }
        for &child in &node.children {
            self.collect_branches(child, branch.clone(), out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    fn child_of(parent: BlockHash, nonce: u32, height: u32) -> HeaderEntry {
        let mut header = genesis_block(Network::Bitcoin).header;
        header.prev_blockhash = parent;
        header.nonce = nonce;
        HeaderEntry { header, height }
    }

    #[test]
    fn branches_enumerates_every_leaf_path() {
        let top = genesis_block(Network::Bitcoin).block_hash();
        let mut pool = HeaderPool::new(top);

        let a = child_of(top, 1, 1);
        let a_hash = a.hash();
        pool.insert(a).unwrap();
        pool.insert(child_of(a_hash, 2, 2)).unwrap();
        pool.insert(child_of(top, 3, 1)).unwrap();

        let branches = pool.branches();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().any(|b| b.len() == 2));
        assert!(branches.iter().any(|b| b.len() == 1));
    }
}
