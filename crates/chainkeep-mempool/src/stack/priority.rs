//! `PriorityCalculator`: the combined fee-per-kilobyte a root would carry if its whole
//! not-yet-anchor descendant closure were mined alongside it (child-pays-for-parent).

use std::collections::{HashMap, HashSet};

use crate::entry::{EntryId, TransactionEntry};
use crate::stack::child_closure::ChildClosureCalculator;

pub struct PriorityCalculator<'a> {
    entries: &'a HashMap<EntryId, TransactionEntry>,
}

impl<'a> PriorityCalculator<'a> {
    pub fn new(entries: &'a HashMap<EntryId, TransactionEntry>) -> Self {
        Self { entries }
    }

    /// Fee-per-kilobyte of `root` plus every descendant, skipping anchors (they pay for
    /// themselves and are scored independently).
    pub fn combined_priority(&self, root: EntryId) -> u64 {
        let Some(root_entry) = self.entries.get(&root) else {
            return 0;
        };
        let closure = ChildClosureCalculator::new(self.entries).closure_of(root);

        let mut fee = root_entry.fee;
        let mut size = root_entry.size as u64;
        for id in closure {
            if let Some(entry) = self.entries.get(&id) {
                if entry.is_anchor() {
                    continue;
                }
                fee += entry.fee;
                size += entry.size as u64;
            }
        }
        if size == 0 {
            return 0;
        }
        fee.saturating_mul(1000) / size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn combined_priority_of_a_lone_anchor_is_its_own_priority() {
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let size = bitcoin::consensus::serialize(&a).len() as u64;
        let mut entries = HashMap::new();
        entries.insert(0, TransactionEntry::new(a, size, HashSet::new()));

        let calc = PriorityCalculator::new(&entries);
        assert_eq!(calc.combined_priority(0), 1000);
    }

    #[test]
    fn combined_priority_folds_in_a_high_fee_child() {
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = 0;
        let mut b = a.clone();
        b.output[0].value = bitcoin::Amount::from_sat(1);
        b.input[0].previous_output.txid = a.compute_txid();
        let b_size = bitcoin::consensus::serialize(&b).len() as u64;
        let b_id = 1;

        let mut entries = HashMap::new();
        let mut a_entry = TransactionEntry::new(a, 0, HashSet::new());
        a_entry.children.insert(b_id);
        entries.insert(a_id, a_entry);
        let mut parents_b = HashSet::new();
        parents_b.insert(a_id);
        entries.insert(b_id, TransactionEntry::new(b, b_size * 2, parents_b));

        let calc = PriorityCalculator::new(&entries);
        assert!(calc.combined_priority(a_id) > 0);
    }
}
