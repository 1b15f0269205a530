//! `TransactionPoolState`: the slot table of pooled entries plus two bidirectional
//! `{entry ↔ priority}` indices — `pool` (everything admitted) and `block_template` (the
//! current candidate selection) — and the byte/sigop budgets template assembly draws against.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use bitcoin::{Transaction, Txid};
use tracing::trace;

use crate::entry::{EntryId, TransactionEntry};
use crate::error::{PoolError, PoolResult};
use crate::stack::child_closure::ChildClosureCalculator;

pub struct TransactionPoolState {
    entries: HashMap<EntryId, TransactionEntry>,
    next_id: EntryId,
    id_by_txid: HashMap<Txid, EntryId>,

    pool_priority: HashMap<EntryId, u64>,
    pool_by_priority: BTreeSet<(Reverse<u64>, EntryId)>,

    template: HashSet<EntryId>,
    template_by_priority: BTreeSet<(Reverse<u64>, EntryId)>,
    template_bytes_used: usize,
    template_sigops_used: usize,

    byte_budget: usize,
    sigop_budget: usize,
    coinbase_reserve_bytes: usize,
    coinbase_reserve_sigops: usize,

    child_closure_cache: HashMap<EntryId, Vec<EntryId>>,
}

impl TransactionPoolState {
    pub fn new(
        byte_budget: usize,
        sigop_budget: usize,
        coinbase_reserve_bytes: usize,
        coinbase_reserve_sigops: usize,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
            id_by_txid: HashMap::new(),
            pool_priority: HashMap::new(),
            pool_by_priority: BTreeSet::new(),
            template: HashSet::new(),
            template_by_priority: BTreeSet::new(),
            template_bytes_used: 0,
            template_sigops_used: 0,
            byte_budget,
            sigop_budget,
            coinbase_reserve_bytes,
            coinbase_reserve_sigops,
            child_closure_cache: HashMap::new(),
        }
    }

    pub fn contains(&self, txid: Txid) -> bool {
        self.id_by_txid.contains_key(&txid)
    }

    pub fn id_of(&self, txid: Txid) -> Option<EntryId> {
        self.id_by_txid.get(&txid).copied()
    }

    pub fn entry(&self, id: EntryId) -> Option<&TransactionEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn entries(&self) -> &HashMap<EntryId, TransactionEntry> {
        &self.entries
    }

    pub fn pool_len(&self) -> usize {
        self.entries.len()
    }

    pub fn template_len(&self) -> usize {
        self.template.len()
    }

    pub fn in_template(&self, id: EntryId) -> bool {
        self.template.contains(&id)
    }

    pub fn priority_of(&self, id: EntryId) -> Option<u64> {
        self.pool_priority.get(&id).copied()
    }

    /// Admits `tx` at the given absolute `fee` (caller resolves prevout values). Parents are
    /// whichever of `tx`'s inputs spend an already-pooled entry; everything else is assumed
    /// confirmed on-chain.
    pub fn insert(&mut self, tx: Transaction, fee: u64) -> PoolResult<EntryId> {
        let txid = tx.compute_txid();
        if self.id_by_txid.contains_key(&txid) {
            return Err(PoolError::AlreadyPresent(txid));
        }

        let mut parents = HashSet::new();
        for input in &tx.input {
            if let Some(&parent_id) = self.id_by_txid.get(&input.previous_output.txid) {
                parents.insert(parent_id);
            }
        }

        let entry = TransactionEntry::new(tx, fee, parents.clone());
        let id = self.next_id;
        self.next_id += 1;

        for &parent_id in &parents {
            if let Some(parent) = self.entries.get_mut(&parent_id) {
                parent.children.insert(id);
            }
        }

        let priority = entry.priority();
        self.id_by_txid.insert(txid, id);
        self.entries.insert(id, entry);
        self.pool_priority.insert(id, priority);
        self.pool_by_priority.insert((Reverse(priority), id));
        self.child_closure_cache.clear();

        trace!(%txid, id, priority, parents = parents.len(), "inserted pool entry");
        Ok(id)
    }

    /// Removes `id` from both the pool and the template, severing it from its parents'
    /// child sets. Does not touch descendants — callers walking a closure (the conflicting-spend
    /// remover) call this once per node in the closure themselves.
    pub fn remove_entry(&mut self, id: EntryId) -> Option<TransactionEntry> {
        let entry = self.entries.remove(&id)?;
        self.id_by_txid.remove(&entry.txid);
        if let Some(priority) = self.pool_priority.remove(&id) {
            self.pool_by_priority.remove(&(Reverse(priority), id));
            self.template_by_priority.remove(&(Reverse(priority), id));
        }
        if self.template.remove(&id) {
            self.template_bytes_used = self.template_bytes_used.saturating_sub(entry.size);
            self.template_sigops_used = self.template_sigops_used.saturating_sub(entry.sigops);
        }
        for &parent_id in &entry.parents {
            if let Some(parent) = self.entries.get_mut(&parent_id) {
                parent.children.remove(&id);
            }
        }
        self.child_closure_cache.clear();
        trace!(id, "removed pool entry");
        Some(entry)
    }

    /// Every pooled anchor-or-not root, ordered by descending priority — the candidate order
    /// block template assembly walks.
    pub fn pool_roots_by_priority_desc(&self) -> Vec<EntryId> {
        self.pool_by_priority.iter().map(|&(_, id)| id).collect()
    }

    /// `id`'s descendants (not including `id` itself), post-order, using and refreshing the
    /// cache.
    pub fn child_closure(&mut self, root: EntryId) -> Vec<EntryId> {
        if let Some(cached) = self.child_closure_cache.get(&root) {
            return cached.clone();
        }
        let closure = ChildClosureCalculator::new(&self.entries).closure_of(root);
        self.child_closure_cache.insert(root, closure.clone());
        closure
    }

    pub fn closure_cost(&self, ids: &[EntryId]) -> (usize, usize) {
        ids.iter()
            .filter_map(|id| self.entries.get(id))
            .fold((0, 0), |(bytes, sigops), e| (bytes + e.size, sigops + e.sigops))
    }

    pub fn template_remaining_bytes(&self) -> usize {
        self.byte_budget
            .saturating_sub(self.coinbase_reserve_bytes)
            .saturating_sub(self.template_bytes_used)
    }

    pub fn template_remaining_sigops(&self) -> usize {
        self.sigop_budget
            .saturating_sub(self.coinbase_reserve_sigops)
            .saturating_sub(self.template_sigops_used)
    }

    pub fn add_to_template(&mut self, id: EntryId) {
        if !self.template.insert(id) {
            return;
        }
        if let Some(entry) = self.entries.get(&id) {
            self.template_bytes_used += entry.size;
            self.template_sigops_used += entry.sigops;
        }
        if let Some(&priority) = self.pool_priority.get(&id) {
            self.template_by_priority.insert((Reverse(priority), id));
        }
    }

    pub fn remove_from_template(&mut self, id: EntryId) {
        if !self.template.remove(&id) {
            return;
        }
        if let Some(entry) = self.entries.get(&id) {
            self.template_bytes_used = self.template_bytes_used.saturating_sub(entry.size);
            self.template_sigops_used = self.template_sigops_used.saturating_sub(entry.sigops);
        }
        if let Some(&priority) = self.pool_priority.get(&id) {
            self.template_by_priority.remove(&(Reverse(priority), id));
        }
    }

    /// Template entries whose own priority has fallen below `min_priority` — candidates for
    /// `AnchorConverter` to demote.
    pub(crate) fn template_entries_below(&self, min_priority: u64) -> Vec<EntryId> {
        self.template_by_priority
            .iter()
            .rev()
            .take_while(|&&(Reverse(priority), _)| priority < min_priority)
            .map(|&(_, id)| id)
            .collect()
    }

    pub fn template_ids(&self) -> Vec<EntryId> {
        self.template.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn insert_rejects_duplicate_txid() {
        let mut state = TransactionPoolState::new(1_000_000, 80_000, 0, 0);
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        state.insert(tx.clone(), 0).unwrap();
        assert!(state.insert(tx, 0).is_err());
    }

    #[test]
    fn remove_entry_severs_parent_child_links() {
        let mut state = TransactionPoolState::new(1_000_000, 80_000, 0, 0);
        let a = genesis_block(Network::Bitcoin).txdata[0].clone();
        let a_id = state.insert(a.clone(), 0).unwrap();

        let mut b = a.clone();
        b.output[0].value = bitcoin::Amount::from_sat(1);
        b.input[0].previous_output.txid = a.compute_txid();
        let b_id = state.insert(b, 0).unwrap();

        assert!(state.entries().get(&a_id).unwrap().children.contains(&b_id));
        state.remove_entry(b_id);
        assert!(!state.entries().get(&a_id).unwrap().children.contains(&b_id));
    }
}
