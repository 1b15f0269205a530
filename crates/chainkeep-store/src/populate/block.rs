//! `populate_block`: resolves every non-coinbase input's previous output, either from the
//! confirmed transaction table or from the pending transactions earlier in the same candidate
//! branch, in `buckets` parallel slices keyed by the spent outpoint's hash.

use std::collections::HashMap;

use bitcoin::{Block, OutPoint, Transaction, TxOut};
use chainkeep_common::CoreError;
use tracing::debug;

use crate::database::ChainDb;
use crate::key::{hash_bucket, OutPointKey};
use crate::validate::block::PrevoutLookup;

/// The outcome of populating one block: every input's prevout that could be resolved, and every
/// one that couldn't (either a double-spend of something outside this block, or a reference to a
/// transaction this store has never seen).
pub struct ResolvedPrevouts {
    resolved: HashMap<OutPoint, TxOut>,
    pub missing: Vec<OutPoint>,
    pub duplicate_inputs: Vec<OutPoint>,
}

impl PrevoutLookup for ResolvedPrevouts {
    fn prevout(&self, outpoint: OutPoint) -> Option<TxOut> {
        self.resolved.get(&outpoint).cloned()
    }
}

/// Looks an outpoint up in the transactions already confirmed earlier in `pending` (the
/// candidate branch building on top of the store), falling back to the confirmed store itself.
fn resolve_one(db: &ChainDb, pending: &[Transaction], outpoint: OutPoint) -> Result<Option<TxOut>, CoreError> {
    for tx in pending {
        if tx.compute_txid() == outpoint.txid {
            return Ok(tx.output.get(outpoint.vout as usize).cloned());
        }
    }
    let Some(record) = db.fetch_transaction(outpoint.txid).map_err(CoreError::from)? else {
        return Ok(None);
    };
    Ok(record.transaction.output.get(outpoint.vout as usize).cloned())
}

fn resolve_slice(
    db: &ChainDb,
    pending: &[Transaction],
    outpoints: &[OutPoint],
) -> Result<Vec<(OutPoint, Option<TxOut>)>, CoreError> {
    outpoints
        .iter()
        .map(|&op| resolve_one(db, pending, op).map(|v| (op, v)))
        .collect()
}

/// `buckets` mirrors the htdb tables' own bucket count: each slice is independent, so resolving
/// them on separate threads never touches overlapping state.
pub fn populate_block(
    db: &ChainDb,
    pending: &[Transaction],
    block: &Block,
    buckets: usize,
) -> Result<ResolvedPrevouts, CoreError> {
    let buckets = buckets.max(1);
    debug!(block_hash = %block.block_hash(), txs = block.txdata.len(), buckets, "populating block inputs");

    let mut seen = std::collections::HashSet::new();
    let mut duplicate_inputs = Vec::new();
    let mut slices: Vec<Vec<OutPoint>> = vec![Vec::new(); buckets];
    for tx in block.txdata.iter().skip(1) {
        for input in &tx.input {
            if !seen.insert(input.previous_output) {
                duplicate_inputs.push(input.previous_output);
                continue;
            }
            let key = OutPointKey::from(input.previous_output);
            let bucket = hash_bucket(&key, buckets as u64) as usize;
            slices[bucket].push(input.previous_output);
        }
    }

    let results: Vec<Result<Vec<(OutPoint, Option<TxOut>)>, CoreError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = slices
            .iter()
            .map(|slice| scope.spawn(|| resolve_slice(db, pending, slice)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(CoreError::ServiceStopped)))
            .collect()
    });

    let mut resolved = HashMap::new();
    let mut missing = Vec::new();
    for result in results {
        for (outpoint, value) in result? {
            match value {
                Some(out) => {
                    resolved.insert(outpoint, out);
                }
                None => missing.push(outpoint),
            }
        }
    }

    debug!(resolved = resolved.len(), missing = missing.len(), "block inputs populated");
    Ok(ResolvedPrevouts {
        resolved,
        missing,
        duplicate_inputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use chainkeep_common::settings::DatabaseSettings;

    fn settings(dir: &tempfile::TempDir) -> DatabaseSettings {
        DatabaseSettings {
            directory: dir.path().to_string_lossy().into_owned(),
            history_start_height: 0,
            stealth_start_height: 0,
            block_table_buckets: 16,
            transaction_table_buckets: 16,
            spend_table_buckets: 16,
            history_table_buckets: 16,
            file_growth_rate: 1.5,
        }
    }

    #[test]
    fn coinbase_only_block_has_nothing_to_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(&dir);
        let mut db = ChainDb::open(&s).unwrap();
        db.create(&s).unwrap();

        let block = genesis_block(Network::Bitcoin);
        let resolved = populate_block(&db, &[], &block, 4).unwrap();
        assert!(resolved.missing.is_empty());
        assert!(resolved.duplicate_inputs.is_empty());
    }
}
