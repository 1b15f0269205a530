//! Stub adjacency-list graph. Out of scope for this design; only the interface survives, the
//! way the original leaves it as a stub too.

use std::collections::HashSet;

use bitcoin::BlockHash;

#[derive(Default)]
pub struct BlockGraph {
    seen: HashSet<BlockHash>,
}

impl BlockGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `hash`, returning whether it was new.
    pub fn add(&mut self, hash: BlockHash) -> bool {
        self.seen.insert(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash as _;

    #[test]
    fn add_reports_novelty() {
        let mut graph = BlockGraph::new();
        let hash = BlockHash::all_zeros();
        assert!(graph.add(hash));
        assert!(!graph.add(hash));
    }
}
