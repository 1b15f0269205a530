//! Fixed `(height, hash)` pairs a header/block must match if it reaches that height. These
//! are inputs to the core (genesis/BIP activation constants are likewise inputs, per the
//! design's scope), never derived from the store itself.

use bitcoin::BlockHash;

/// An immutable, height-ordered checkpoint table.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints(Vec<(u32, BlockHash)>);

impl Checkpoints {
    pub fn new(mut entries: Vec<(u32, BlockHash)>) -> Self {
        entries.sort_unstable_by_key(|(height, _)| *height);
        entries.dedup_by_key(|(height, _)| *height);
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The hash expected at `height`, if this table has an opinion on it.
    pub fn hash_at(&self, height: u32) -> Option<BlockHash> {
        self.0
            .binary_search_by_key(&height, |(h, _)| *h)
            .ok()
            .map(|idx| self.0[idx].1)
    }

    /// The height of the highest checkpoint at or below `height`, used to reject reorgs that
    /// would cross a checkpoint.
    pub fn last_at_or_below(&self, height: u32) -> Option<u32> {
        self.0
            .iter()
            .rev()
            .find(|(h, _)| *h <= height)
            .map(|(h, _)| *h)
    }

    /// Verify `hash` against any checkpoint recorded at `height`. `Ok(())` if there's no
    /// opinion or the hash matches.
    pub fn verify(&self, height: u32, hash: BlockHash) -> Result<(), (BlockHash, u32)> {
        match self.hash_at(height) {
            Some(expected) if expected == hash => Ok(()),
            Some(expected) => Err((expected, height)),
            None => Ok(()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u32, BlockHash)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn hash(b: u8) -> BlockHash {
        BlockHash::from_str(&format!("{:02x}{}", b, "0".repeat(62))).unwrap()
    }

    #[test]
    fn verify_matches_and_rejects() {
        let checkpoints = Checkpoints::new(vec![(0, hash(1)), (100, hash(2))]);
        assert!(checkpoints.verify(0, hash(1)).is_ok());
        assert!(checkpoints.verify(100, hash(2)).is_ok());
        assert!(checkpoints.verify(50, hash(9)).is_ok()); // no opinion at 50
        assert!(checkpoints.verify(100, hash(9)).is_err());
    }

    #[test]
    fn last_at_or_below_picks_the_closest() {
        let checkpoints = Checkpoints::new(vec![(10, hash(1)), (20, hash(2))]);
        assert_eq!(checkpoints.last_at_or_below(15), Some(10));
        assert_eq!(checkpoints.last_at_or_below(20), Some(20));
        assert_eq!(checkpoints.last_at_or_below(5), None);
    }
}
