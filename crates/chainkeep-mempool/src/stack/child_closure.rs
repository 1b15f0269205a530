//! `ChildClosureCalculator`: every descendant of a root entry, in post-order (a parent always
//! comes after all the children it reaches through). Used both for cost accounting (sum a
//! subtree's bytes/sigops) and for eviction (children must be removed before their parents).

use std::collections::{HashMap, HashSet};

use crate::entry::{EntryId, TransactionEntry};
use crate::stack::evaluator::StackEvaluator;

pub struct ChildClosureCalculator<'a> {
    entries: &'a HashMap<EntryId, TransactionEntry>,
    encountered: HashSet<EntryId>,
    expanded: HashSet<EntryId>,
    order: Vec<EntryId>,
}

impl<'a> ChildClosureCalculator<'a> {
    pub fn new(entries: &'a HashMap<EntryId, TransactionEntry>) -> Self {
        Self {
            entries,
            encountered: HashSet::new(),
            expanded: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// `root`'s descendants only (`root` itself is excluded from the result).
    pub fn closure_of(mut self, root: EntryId) -> Vec<EntryId> {
        self.evaluate(root);
        self.order.retain(|&id| id != root);
        self.order
    }
}

impl<'a> StackEvaluator for ChildClosureCalculator<'a> {
    fn encountered_mut(&mut self) -> &mut HashSet<EntryId> {
        &mut self.encountered
    }

    fn visit(&mut self, entry: EntryId, stack: &mut Vec<EntryId>) -> bool {
        if self.expanded.contains(&entry) {
            self.order.push(entry);
            return true;
        }
        self.expanded.insert(entry);
        stack.push(entry);
        if let Some(e) = self.entries.get(&entry) {
            for &child in &e.children {
                if !self.encountered.contains(&child) {
                    stack.push(child);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::hashes::Hash as _;
    use bitcoin::Network;

    fn tx_with_prevout(prevout: bitcoin::Txid) -> bitcoin::Transaction {
        let mut tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        tx.output[0].value = bitcoin::Amount::from_sat(prevout.to_byte_array()[0] as u64 + 1);
        tx.input[0].previous_output.txid = prevout;
        tx
    }

    #[test]
    fn closure_excludes_root_and_includes_all_descendants() {
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = 0;
        let b = tx_with_prevout(a.compute_txid());
        let b_id = 1;
        let c = tx_with_prevout(b.compute_txid());
        let c_id = 2;

        let mut entries = HashMap::new();
        let mut a_entry = TransactionEntry::new(a, 0, HashSet::new());
        a_entry.children.insert(b_id);
        entries.insert(a_id, a_entry);

        let mut parents_b = HashSet::new();
        parents_b.insert(a_id);
        let mut b_entry = TransactionEntry::new(b, 0, parents_b);
        b_entry.children.insert(c_id);
        entries.insert(b_id, b_entry);

        let mut parents_c = HashSet::new();
        parents_c.insert(b_id);
        entries.insert(c_id, TransactionEntry::new(c, 0, parents_c));

        let closure = ChildClosureCalculator::new(&entries).closure_of(a_id);
        assert_eq!(closure.len(), 2);
        assert!(closure.contains(&b_id));
        assert!(closure.contains(&c_id));
        // c must precede b in true post-order (children before parents).
        let c_pos = closure.iter().position(|&id| id == c_id).unwrap();
        let b_pos = closure.iter().position(|&id| id == b_id).unwrap();
        assert!(c_pos < b_pos);
    }
}
