//! `ConflictingSpendRemover`: when a newly confirmed block spends an output a pooled entry also
//! spent, the pooled entry (and everything built on top of it) can never confirm. This evicts
//! the whole subtree and reports the highest priority lost, so callers can log or refund fee
//! estimation state.

use crate::entry::EntryId;
use crate::state::TransactionPoolState;

pub struct ConflictingSpendRemover<'a> {
    state: &'a mut TransactionPoolState,
}

impl<'a> ConflictingSpendRemover<'a> {
    pub fn new(state: &'a mut TransactionPoolState) -> Self {
        Self { state }
    }

    /// Removes `root` and every descendant from the pool and template. Returns the highest
    /// priority among the removed entries, or `0` if `root` was not pooled.
    pub fn remove(self, root: EntryId) -> u64 {
        let mut max_removed_priority = self
            .state
            .priority_of(root)
            .unwrap_or(0);

        let closure = self.state.child_closure(root);
        for &id in &closure {
            if let Some(priority) = self.state.priority_of(id) {
                max_removed_priority = max_removed_priority.max(priority);
            }
            self.state.remove_entry(id);
        }
        self.state.remove_entry(root);

        max_removed_priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn removing_a_root_evicts_its_whole_subtree() {
        let mut state = TransactionPoolState::new(1_000_000, 80_000, 0, 0);
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = state.insert(a.clone(), 0).unwrap();

        let mut b = a.clone();
        b.output[0].value = bitcoin::Amount::from_sat(1);
        b.input[0].previous_output.txid = a.compute_txid();
        let b_id = state.insert(b, 0).unwrap();

        ConflictingSpendRemover::new(&mut state).remove(a_id);

        assert!(state.entry(a_id).is_none());
        assert!(state.entry(b_id).is_none());
        assert_eq!(state.pool_len(), 0);
    }
}
