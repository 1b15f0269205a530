//! `TransactionOrganizer`: the mempool-facing counterpart of `BlockOrganizer` — validates an
//! incoming transaction against the confirmed store and whatever else is already pooled, then
//! inserts it through the caller-supplied `MempoolSink` and publishes it to subscribers.
//!
//! Kept generic over the pool implementation (rather than depending on `chainkeep-mempool`
//! directly) so the dependency points the other way: the mempool crate depends on this one, not
//! the reverse.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::{Transaction, Txid};
use chainkeep_common::{CoreError, Settings};
use tracing::{debug, info, warn};

use crate::database::ChainDb;
use crate::populate::transaction::{populate_transaction, PendingLookup, PopulateTransactionError};
use crate::validate::input::ScriptVerifier;
use crate::validate::transaction::validate_transaction;

use super::prioritized_mutex::PrioritizedRwLock;
use super::{OrganizeError, OrganizeResult};

/// What a mempool implementation must expose for the organizer to check for in-pool duplicates,
/// resolve unconfirmed prevouts, and admit a newly-accepted transaction.
pub trait MempoolSink: Send + Sync {
    fn contains(&self, txid: Txid) -> bool;
    fn transaction(&self, txid: Txid) -> Option<Transaction>;
    fn insert(&self, tx: Transaction) -> Result<(), CoreError>;
}

struct PoolAdapter<'a>(&'a dyn MempoolSink);

impl PendingLookup for PoolAdapter<'_> {
    fn contains(&self, txid: Txid) -> bool {
        self.0.contains(txid)
    }

    fn transaction(&self, txid: Txid) -> Option<Transaction> {
        self.0.transaction(txid)
    }
}

type TransactionSubscriber = Box<dyn Fn(&Transaction) + Send + Sync>;

pub struct TransactionOrganizer {
    db: Arc<PrioritizedRwLock<ChainDb>>,
    pool: Arc<dyn MempoolSink>,
    verifier: Box<dyn ScriptVerifier>,
    settings: Settings,
    subscribers: Mutex<Vec<TransactionSubscriber>>,
    stopped: AtomicBool,
}

impl TransactionOrganizer {
    pub fn new(
        db: Arc<PrioritizedRwLock<ChainDb>>,
        pool: Arc<dyn MempoolSink>,
        verifier: Box<dyn ScriptVerifier>,
        settings: Settings,
    ) -> Self {
        Self {
            db,
            pool,
            verifier,
            settings,
            subscribers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn subscribe_transaction(&self, callback: impl Fn(&Transaction) + Send + Sync + 'static) {
        self.subscribers.lock().expect("subscriber list poisoned").push(Box::new(callback));
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn notify(&self, tx: &Transaction) {
        for subscriber in self.subscribers.lock().expect("subscriber list poisoned").iter() {
            subscriber(tx);
        }
    }

    /// Checks for an in-pool duplicate, resolves prevouts (confirmed store first, then the
    /// pool), validates, then admits the transaction and publishes it.
    pub fn organize(&self, tx: Transaction) -> OrganizeResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(OrganizeError::Core(CoreError::ServiceStopped));
        }

        let txid = tx.compute_txid();

        // Mempool admission is background work relative to block connection: it yields to a
        // writer that's actively reorganizing the chain instead of holding a reader across it.
        let db = self.db.background_read();
        let resolved = match populate_transaction(&db, &PoolAdapter(self.pool.as_ref()), &tx) {
            Ok(resolved) => resolved,
            Err(PopulateTransactionError::AlreadyInPool) => {
                warn!(%txid, "rejecting transaction already in the pool");
                return Err(OrganizeError::Rejected("already in the pool".into()));
            }
            Err(PopulateTransactionError::Core(e)) => return Err(OrganizeError::Core(e)),
        };
        drop(db);

        if let Some(missing) = resolved.missing.first() {
            warn!(%txid, outpoint = %missing, "transaction references a missing prevout");
            return Err(OrganizeError::Core(CoreError::MissingPrevout(*missing)));
        }
        debug!(%txid, "transaction inputs populated");

        validate_transaction(&tx, &resolved, false, self.verifier.as_ref(), &self.settings)?;
        debug!(%txid, "transaction passed validation");

        self.pool.insert(tx.clone())?;
        info!(%txid, "admitted transaction to the pool");
        self.notify(&tx);
        Ok(())
    }
}
