//! `BlockOrganizer`: validates an incoming block against the current tip, either extends the
//! indexed chain directly or accumulates it into a competing fork, and promotes a fork over the
//! indexed chain once it out-works it — the same check → populate → accept → connect →
//! (push | fork) → publish sequence libbitcoin-blockchain's `block_organizer` runs, expressed
//! over `ChainDb` and `Fork` instead of that design's `fork`/`block_detail` pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::hashes::Hash as _;
use bitcoin::{Block, BlockHash};
use chainkeep_common::{Checkpoints, CoreError, Settings};
use tracing::{debug, info, warn};

use crate::database::ChainDb;
use crate::populate::populate_block;
use crate::pools::{Fork, ForkItem};
use crate::validate::block::{connect_block, validate_block};
use crate::validate::input::ScriptVerifier;

use super::dispatcher::Dispatcher;
use super::prioritized_mutex::PrioritizedRwLock;
use super::{OrganizeError, OrganizeResult};

#[derive(Clone)]
struct BlockEntry {
    block: Block,
    height: u32,
}

impl ForkItem for BlockEntry {
    fn hash(&self) -> BlockHash {
        self.block.block_hash()
    }

    fn prev_hash(&self) -> BlockHash {
        self.block.header.prev_blockhash
    }

    fn work(&self) -> u128 {
        u128::from(u32::MAX - self.block.header.bits.to_consensus())
    }
}

fn tip_hash(chain: &Fork<BlockEntry>) -> BlockHash {
    chain.items().last().map(ForkItem::hash).unwrap_or_else(|| chain.fork_point())
}

/// One candidate chain still below the indexed tip's accumulated work, keyed by its fork point's
/// height so a promotion knows exactly how far back to pop.
struct PendingFork {
    fork_point_height: u32,
    chain: Fork<BlockEntry>,
}

type BlockSubscriber = Box<dyn Fn(&Block, u32) + Send + Sync>;

pub struct BlockOrganizer {
    db: Arc<PrioritizedRwLock<ChainDb>>,
    dispatcher: Dispatcher,
    settings: Settings,
    checkpoints: Checkpoints,
    verifier: Box<dyn ScriptVerifier>,
    forks: Mutex<HashMap<BlockHash, PendingFork>>,
    subscribers: Mutex<Vec<BlockSubscriber>>,
    stopped: AtomicBool,
}

impl BlockOrganizer {
    pub fn new(
        db: Arc<PrioritizedRwLock<ChainDb>>,
        settings: Settings,
        checkpoints: Checkpoints,
        verifier: Box<dyn ScriptVerifier>,
    ) -> Self {
        let dispatcher = Dispatcher::new(settings.cores);
        Self {
            db,
            dispatcher,
            settings,
            checkpoints,
            verifier,
            forks: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&Block, u32) + Send + Sync + 'static) {
        self.subscribers.lock().expect("subscriber list poisoned").push(Box::new(callback));
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn notify(&self, block: &Block, height: u32) {
        for subscriber in self.subscribers.lock().expect("subscriber list poisoned").iter() {
            subscriber(block, height);
        }
    }

    pub fn organize(&self, block: Block) -> OrganizeResult<u32> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(OrganizeError::Core(CoreError::ServiceStopped));
        }

        let block_hash = block.block_hash();
        validate_block(&block, self.settings.block_sigop_limit)?;
        debug!(%block_hash, "block passed standalone validation");

        let resolved = {
            let db = self.db.read();
            populate_block(&db, &[], &block, self.dispatcher_cores())?
        };
        if !resolved.duplicate_inputs.is_empty() {
            warn!(%block_hash, "rejecting block with a duplicate input");
            return Err(OrganizeError::Rejected("duplicate input within block".into()));
        }
        if let Some(missing) = resolved.missing.first() {
            warn!(%block_hash, outpoint = %missing, "block references a missing prevout");
            return Err(OrganizeError::Core(CoreError::MissingPrevout(*missing)));
        }
        debug!(%block_hash, "block inputs populated");

        connect_block(&block, &resolved, self.verifier.as_ref(), &self.settings)?;
        debug!(%block_hash, "block inputs connected");

        let mut db = self.db.write();
        let current_tip = match db.top_height() {
            Some(h) => db.fetch_block(h).map_err(CoreError::from)?,
            None => None,
        };
        let extends_tip = match &current_tip {
            Some(tip) => block.header.prev_blockhash == tip.header.block_hash(),
            None => block.header.prev_blockhash == BlockHash::all_zeros(),
        };

        if extends_tip {
            let height = current_tip.as_ref().map_or(0, |t| t.height + 1);
            if let Err((expected, height)) = self.checkpoints.verify(height, block.block_hash()) {
                return Err(OrganizeError::Core(CoreError::CheckpointMismatch {
                    height,
                    expected,
                    found: block.block_hash(),
                }));
            }
            db.push(&block, height).map_err(CoreError::from)?;
            db.synchronize().map_err(CoreError::from)?;
            drop(db);
            info!(%block_hash, height, "committed block to the indexed chain");
            self.notify(&block, height);
            return Ok(height);
        }
        drop(db);

        self.accumulate_fork(block)
    }

    fn dispatcher_cores(&self) -> usize {
        self.settings.cores.max(1) as usize
    }

    /// Folds `block` into whichever pending fork its parent already heads, or starts a new one
    /// rooted at an ancestor already in the store. Promotes (pops the indexed chain to the fork
    /// point and replays the fork) once the fork's accumulated work exceeds the indexed chain's
    /// work over the same range.
    fn accumulate_fork(&self, block: Block) -> OrganizeResult<u32> {
        let prev_hash = block.header.prev_blockhash;
        let block_hash = block.block_hash();

        let mut forks = self.forks.lock().expect("fork table poisoned");
        let mut pending = match forks.remove(&prev_hash) {
            Some(pending) => pending,
            None => {
                let db = self.db.read();
                let parent = db
                    .fetch_block_by_hash(prev_hash)
                    .map_err(CoreError::from)?
                    .ok_or(CoreError::MissingAncestor(block_hash))?;
                PendingFork {
                    fork_point_height: parent.height,
                    chain: Fork::new(parent.header.block_hash()),
                }
            }
        };

        let height = pending.fork_point_height + pending.chain.len() as u32 + 1;
        pending.chain.push(BlockEntry { block, height }).map_err(OrganizeError::Core)?;

        let promote = {
            let db = self.db.read();
            pending.chain.difficulty() > self.work_since(&db, pending.fork_point_height)?
        };

        if !promote {
            warn!(%block_hash, height, "block deferred to a pending fork below the indexed chain's work");
            forks.insert(tip_hash(&pending.chain), pending);
            return Err(OrganizeError::Deferred { height });
        }
        drop(forks);

        info!(
            fork_point_height = pending.fork_point_height,
            fork_len = pending.chain.len(),
            "fork out-works the indexed chain, reorganizing"
        );

        let mut db = self.db.write();
        db.pop(pending.fork_point_height).map_err(CoreError::from)?;
        let mut connected_height = pending.fork_point_height;
        for entry in pending.chain.items() {
            db.push(&entry.block, entry.height).map_err(CoreError::from)?;
            connected_height = entry.height;
        }
        db.synchronize().map_err(CoreError::from)?;
        drop(db);

        info!(new_height = connected_height, "reorganization complete");
        for entry in pending.chain.items() {
            self.notify(&entry.block, entry.height);
        }
        Ok(connected_height)
    }

    fn work_since(&self, db: &ChainDb, fork_point_height: u32) -> Result<u128, OrganizeError> {
        let Some(top) = db.top_height() else {
            return Ok(0);
        };
        let mut total = 0u128;
        for height in (fork_point_height + 1)..=top {
            if let Some(record) = db.fetch_block(height).map_err(CoreError::from)? {
                total += u128::from(u32::MAX - record.header.bits.to_consensus());
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::input::NullVerifier;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use chainkeep_common::settings::DatabaseSettings;

    fn organizer(dir: &tempfile::TempDir) -> BlockOrganizer {
        let settings = Settings::default();
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
        BlockOrganizer::new(
            Arc::new(PrioritizedRwLock::new(db)),
            settings,
            Checkpoints::default(),
            Box::new(NullVerifier),
        )
    }

    #[test]
    fn organizing_the_genesis_block_extends_an_empty_chain() {
        let dir = tempfile::tempdir().unwrap();
        let organizer = organizer(&dir);
        let block = genesis_block(Network::Bitcoin);
        let height = organizer.organize(block).unwrap();
        assert_eq!(height, 0);
    }

    #[test]
    fn stopped_organizer_rejects_further_work() {
        let dir = tempfile::tempdir().unwrap();
        let organizer = organizer(&dir);
        organizer.stop();
        let block = genesis_block(Network::Bitcoin);
        assert!(organizer.organize(block).is_err());
    }
}
