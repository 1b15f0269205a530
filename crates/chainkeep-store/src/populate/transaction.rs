//! `populate_transaction`: the mempool counterpart of `populate_block` for a single pending
//! transaction — checks for an in-pool duplicate, then resolves each input against the confirmed
//! store first and the pool's own unconfirmed transactions second.

use bitcoin::{OutPoint, Transaction, TxOut, Txid};
use chainkeep_common::CoreError;
use tracing::debug;

use crate::database::ChainDb;
use crate::validate::block::PrevoutLookup;

/// What `chainkeep-mempool`'s pool state exposes to the populate stage. Kept minimal and
/// implemented there so this crate never needs to depend on the mempool crate.
pub trait PendingLookup {
    fn contains(&self, txid: Txid) -> bool;
    fn transaction(&self, txid: Txid) -> Option<Transaction>;
}

pub struct ResolvedTransactionPrevouts {
    resolved: std::collections::HashMap<OutPoint, TxOut>,
    pub missing: Vec<OutPoint>,
}

impl PrevoutLookup for ResolvedTransactionPrevouts {
    fn prevout(&self, outpoint: OutPoint) -> Option<TxOut> {
        self.resolved.get(&outpoint).cloned()
    }
}

pub enum PopulateTransactionError {
    AlreadyInPool,
    Core(CoreError),
}

impl From<CoreError> for PopulateTransactionError {
    fn from(e: CoreError) -> Self {
        Self::Core(e)
    }
}

pub fn populate_transaction(
    db: &ChainDb,
    pool: &impl PendingLookup,
    tx: &Transaction,
) -> Result<ResolvedTransactionPrevouts, PopulateTransactionError> {
    let txid = tx.compute_txid();
    if pool.contains(txid) {
        return Err(PopulateTransactionError::AlreadyInPool);
    }

    let mut resolved = std::collections::HashMap::with_capacity(tx.input.len());
    let mut missing = Vec::new();
    for input in &tx.input {
        let outpoint = input.previous_output;
        if let Some(parent) = pool.transaction(outpoint.txid) {
            if let Some(out) = parent.output.get(outpoint.vout as usize) {
                resolved.insert(outpoint, out.clone());
                continue;
            }
        }
        match db.fetch_transaction(outpoint.txid).map_err(CoreError::from)? {
            Some(record) => match record.transaction.output.get(outpoint.vout as usize) {
                Some(out) => {
                    resolved.insert(outpoint, out.clone());
                }
                None => missing.push(outpoint),
            },
            None => missing.push(outpoint),
        }
    }

    debug!(%txid, resolved = resolved.len(), missing = missing.len(), "transaction inputs populated");
    Ok(ResolvedTransactionPrevouts { resolved, missing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use chainkeep_common::settings::DatabaseSettings;

    struct EmptyPool;
    impl PendingLookup for EmptyPool {
        fn contains(&self, _txid: Txid) -> bool {
            false
        }
        fn transaction(&self, _txid: Txid) -> Option<Transaction> {
            None
        }
    }

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
    fn coinbase_like_transaction_with_no_pool_hit_reports_missing_prevout() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(&dir);
        let db = ChainDb::open(&s).unwrap();

        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        let result = populate_transaction(&db, &EmptyPool, &tx).unwrap();
        assert_eq!(result.missing.len(), tx.input.len());
    }
}
