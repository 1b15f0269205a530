//! An in-memory, unconfirmed-transaction pool sitting in front of [`chainkeep_store`]'s
//! confirmed chain state. Structured the way `chainkeep-store`'s own tables are: a slot table
//! ([`state::TransactionPoolState`]) plus indices, with the DAG-walking concerns (closures,
//! ordering, eviction) factored out into `stack::*` calculators sharing one traversal shape.

pub mod entry;
pub mod error;
pub mod stack;
pub mod state;
pub mod template;

use std::sync::{Arc, Mutex};

use bitcoin::{OutPoint, Transaction, Txid};
use chainkeep_common::CoreError;
use chainkeep_store::database::ChainDb;
use chainkeep_store::organize::{MempoolSink, PrioritizedRwLock};
use tracing::warn;

use entry::EntryId;
use error::{PoolError, PoolResult};
use stack::anchor_converter::AnchorConverter;
use stack::conflicting_spend_remover::ConflictingSpendRemover;
use stack::priority::PriorityCalculator;
use state::TransactionPoolState;

/// Default budgets: a single block's worth of weight, translated to the legacy byte/sigop units
/// this pool's simplified cost model tracks, less the coinbase's own reserved share.
const DEFAULT_BYTE_BUDGET: usize = 1_000_000;
const DEFAULT_SIGOP_BUDGET: usize = 80_000;
const COINBASE_RESERVE_BYTES: usize = 1_000;
const COINBASE_RESERVE_SIGOPS: usize = 400;

pub struct Mempool {
    db: Arc<PrioritizedRwLock<ChainDb>>,
    state: Mutex<TransactionPoolState>,
}

impl Mempool {
    pub fn new(db: Arc<PrioritizedRwLock<ChainDb>>) -> Self {
        Self {
            db,
            state: Mutex::new(TransactionPoolState::new(
                DEFAULT_BYTE_BUDGET,
                DEFAULT_SIGOP_BUDGET,
                COINBASE_RESERVE_BYTES,
                COINBASE_RESERVE_SIGOPS,
            )),
        }
    }

    /// Resolves the absolute fee of `tx` by summing its input values (looked up from an in-pool
    /// parent first, the confirmed store otherwise) and subtracting its output total.
    pub fn compute_fee(&self, tx: &Transaction) -> Result<u64, CoreError> {
        let state = self.state.lock().expect("pool state poisoned");
        let mut input_total = 0u64;
        for input in &tx.input {
            input_total += self.resolve_value(&state, input.previous_output)?;
        }
        drop(state);

        let output_total: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        Ok(input_total.saturating_sub(output_total))
    }

    fn resolve_value(&self, state: &TransactionPoolState, outpoint: OutPoint) -> Result<u64, CoreError> {
        if let Some(id) = state.id_of(outpoint.txid) {
            let entry = state.entry(id).expect("id_of and entry disagree");
            return entry
                .tx
                .output
                .get(outpoint.vout as usize)
                .map(|o| o.value.to_sat())
                .ok_or(CoreError::MissingPrevout(outpoint));
        }

        let db = self.db.background_read();
        let record = db
            .fetch_transaction(outpoint.txid)
            .map_err(CoreError::from)?
            .ok_or(CoreError::MissingPrevout(outpoint))?;
        record
            .transaction
            .output
            .get(outpoint.vout as usize)
            .map(|o| o.value.to_sat())
            .ok_or(CoreError::MissingPrevout(outpoint))
    }

    /// A transaction's fee-per-kilobyte including its whole unconfirmed descendant chain, for
    /// callers ranking pool contents outside of template assembly (e.g. RPC `getmempoolentry`).
    pub fn combined_priority(&self, txid: Txid) -> Option<u64> {
        let state = self.state.lock().expect("pool state poisoned");
        let id = state.id_of(txid)?;
        Some(PriorityCalculator::new(state.entries()).combined_priority(id))
    }

    /// Evicts `txid` and its whole in-pool descendant chain (a block confirmed a conflicting
    /// spend). Returns the highest priority among the evicted entries, if anything was removed.
    pub fn remove_conflicting(&self, txid: Txid) -> Option<u64> {
        let mut state = self.state.lock().expect("pool state poisoned");
        let id = state.id_of(txid)?;
        Some(ConflictingSpendRemover::new(&mut state).remove(id))
    }

    /// Demotes template entries whose priority has fallen below `min_priority`, freeing their
    /// budget share for the next `assemble_template` pass.
    pub fn demote_below(&self, min_priority: u64) -> Vec<EntryId> {
        let mut state = self.state.lock().expect("pool state poisoned");
        AnchorConverter::new(&mut state).convert(min_priority)
    }

    /// Rebuilds and returns the current block template, in mining order.
    pub fn assemble_template(&self) -> Vec<EntryId> {
        let mut state = self.state.lock().expect("pool state poisoned");
        template::assemble(&mut state)
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("pool state poisoned").pool_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MempoolSink for Mempool {
    fn contains(&self, txid: Txid) -> bool {
        self.state.lock().expect("pool state poisoned").contains(txid)
    }

    fn transaction(&self, txid: Txid) -> Option<Transaction> {
        let state = self.state.lock().expect("pool state poisoned");
        let id = state.id_of(txid)?;
        state.entry(id).map(|e| e.tx.clone())
    }

    fn insert(&self, tx: Transaction) -> Result<(), CoreError> {
        let txid = tx.compute_txid();
        let fee = self.compute_fee(&tx)?;
        let mut state = self.state.lock().expect("pool state poisoned");
        state.insert(tx, fee).map_err(|e| match e {
            PoolError::Core(core) => core,
            PoolError::AlreadyPresent(txid) => CoreError::Duplicate(txid.to_string()),
            PoolError::BudgetExceeded => {
                warn!(%txid, "rejecting transaction, mempool budget exceeded");
                CoreError::Consensus("mempool budget exceeded".into())
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use chainkeep_common::settings::DatabaseSettings;

    fn setup(dir: &tempfile::TempDir) -> Mempool {
        let db_settings = DatabaseSettings {
            directory: dir.path().to_string_lossy().into_owned(),
            history_start_height: 0,
            stealth_start_height: 0,
            block_table_buckets: 16,
            transaction_table_buckets: 16,
            spend_table_buckets: 16,
            history_table_buckets: 16,
            file_growth_rate: 1.5,
        };
        let mut db = ChainDb::open(&db_settings).unwrap();
        db.create(&db_settings).unwrap();
        Mempool::new(Arc::new(PrioritizedRwLock::new(db)))
    }

    #[test]
    fn a_transaction_with_no_resolvable_prevout_cannot_be_inserted() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir);
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        assert!(MempoolSink::insert(&pool, tx).is_err());
    }

    #[test]
    fn empty_pool_reports_no_template() {
        let dir = tempfile::tempdir().unwrap();
        let pool = setup(&dir);
        assert!(pool.assemble_template().is_empty());
        assert!(pool.is_empty());
    }
}
