//! `TransactionEntry`: a parsed transaction plus its cached cost figures and its links to other
//! pooled entries. Parent/child links are slot-table indices (`EntryId`) rather than shared
//! pointers, so the pool's DAG has no back-reference cycles to reason about.

use std::collections::HashSet;

use bitcoin::{Transaction, Txid};

/// Index into `TransactionPoolState`'s entry table. Stable for the entry's lifetime in the pool;
/// reused once the slot is freed.
pub type EntryId = usize;

/// Legacy-style sigop count, the same simplified byte scanner `chainkeep-store::validate` uses:
/// not pushdata-aware, an accepted approximation for the budget checks this feeds.
fn count_sigops(tx: &Transaction) -> usize {
    const OP_CHECKSIG: u8 = 0xac;
    const OP_CHECKSIGVERIFY: u8 = 0xad;
    const OP_CHECKMULTISIG: u8 = 0xae;
    const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

    tx.input
        .iter()
        .map(|i| i.script_sig.as_bytes())
        .chain(tx.output.iter().map(|o| o.script_pubkey.as_bytes()))
        .flat_map(|script| script.iter())
        .map(|&op| match op {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => 20,
            _ => 0,
        })
        .sum()
}

#[derive(Clone)]
pub struct TransactionEntry {
    pub tx: Transaction,
    pub txid: Txid,
    pub fee: u64,
    pub size: usize,
    pub sigops: usize,
    pub parents: HashSet<EntryId>,
    pub children: HashSet<EntryId>,
}

impl TransactionEntry {
    pub fn new(tx: Transaction, fee: u64, parents: HashSet<EntryId>) -> Self {
        let txid = tx.compute_txid();
        let size = bitcoin::consensus::serialize(&tx).len();
        let sigops = count_sigops(&tx);
        Self {
            tx,
            txid,
            fee,
            size,
            sigops,
            parents,
            children: HashSet::new(),
        }
    }

    /// No in-pool parents: every prevout this entry spends is already confirmed.
    pub fn is_anchor(&self) -> bool {
        self.parents.is_empty()
    }

    /// Fee per kilobyte, the standard mempool priority metric.
    pub fn priority(&self) -> u64 {
        if self.size == 0 {
            return 0;
        }
        (self.fee.saturating_mul(1000)) / self.size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn entry_with_no_parents_is_an_anchor() {
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        let entry = TransactionEntry::new(tx, 0, HashSet::new());
        assert!(entry.is_anchor());
    }

    #[test]
    fn priority_is_fee_per_kilobyte() {
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        let size = bitcoin::consensus::serialize(&tx).len() as u64;
        let entry = TransactionEntry::new(tx, size, HashSet::new());
        assert_eq!(entry.priority(), 1000);
    }
}
