//! `HeaderOrganizer`: validates incoming headers against the branch they extend (the indexed
//! chain itself, or an already-pooled candidate) and keeps them in a `HeaderPool` until the
//! block organizer is ready to fetch and connect the blocks behind the best branch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitcoin::block::Header as BlockHeader;
use bitcoin::BlockHash;
use chainkeep_common::{Checkpoints, CoreError, Settings};
use tracing::debug;

use crate::database::ChainDb;
use crate::populate::header::{expected_bits, median_time_past};
use crate::pools::{HeaderBranch, HeaderEntry, HeaderPool};
use crate::validate::header::{validate_header, HeaderContext};

use super::prioritized_mutex::PrioritizedRwLock;
use super::{OrganizeError, OrganizeResult};

pub struct HeaderOrganizer {
    db: Arc<PrioritizedRwLock<ChainDb>>,
    settings: Settings,
    checkpoints: Checkpoints,
    pool: Mutex<HeaderPool>,
    stopped: AtomicBool,
}

impl HeaderOrganizer {
    pub fn new(db: Arc<PrioritizedRwLock<ChainDb>>, settings: Settings, checkpoints: Checkpoints) -> OrganizeResult<Self> {
        let indexed_top = {
            let guard = db.read();
            match guard.top_height() {
                Some(h) => guard
                    .fetch_block(h)
                    .map_err(CoreError::from)?
                    .map(|r| r.header.block_hash())
                    .ok_or_else(|| CoreError::Corruption("indexed top height has no block record".into()))?,
                None => bitcoin::hashes::Hash::all_zeros(),
            }
        };
        Ok(Self {
            db,
            settings,
            checkpoints,
            pool: Mutex::new(HeaderPool::new(indexed_top)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Validates `header` against the context of whatever it extends, then adds it to the pool.
    /// Returns the height it would occupy once connected.
    pub fn organize(&self, header: BlockHeader) -> OrganizeResult<u32> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(OrganizeError::Core(CoreError::ServiceStopped));
        }

        let mut pool = self.pool.lock().expect("header pool poisoned");
        let db = self.db.read();
        let context = self.context_for(&pool, &db, header.prev_blockhash, header.bits)?;
        validate_header(&header, &context, &self.settings, &self.checkpoints)?;
        drop(db);
        debug!(height = context.height, "header passed validation, pooling");

        pool.insert(HeaderEntry { header, height: context.height }).map_err(OrganizeError::Core)?;
        Ok(context.height)
    }

    /// The pooled branch with the greatest accumulated work, the one the block organizer should
    /// fetch blocks for.
    pub fn best_branch(&self) -> Option<HeaderBranch> {
        self.pool
            .lock()
            .expect("header pool poisoned")
            .branches()
            .into_iter()
            .max_by(|a, b| a.difficulty().cmp(&b.difficulty()))
    }

    fn context_for(
        &self,
        pool: &HeaderPool,
        db: &ChainDb,
        prev_hash: BlockHash,
        fallback_bits: bitcoin::CompactTarget,
    ) -> Result<HeaderContext, CoreError> {
        if prev_hash == pool.indexed_top() {
            let height = db.top_height().map(|h| h + 1).unwrap_or(0);
            return Ok(HeaderContext {
                height,
                median_time_past: median_time_past(db, height.saturating_sub(1))?,
                expected_bits: expected_bits(db, height, fallback_bits)?,
            });
        }

        let branch = pool
            .branch_to(prev_hash)
            .ok_or(CoreError::MissingAncestor(prev_hash))?;
        let parent = branch
            .items()
            .last()
            .expect("branch_to never returns an empty branch for a pooled hash");

        let mut times: Vec<u32> = branch.items().iter().rev().take(11).map(|e| e.header.time).collect();
        if times.len() < 11 {
            if let Some(top) = db.top_height() {
                if let Some(record) = db.fetch_block(top).map_err(CoreError::from)? {
                    times.push(record.header.time);
                }
            }
        }
        times.sort_unstable();
        let mtp = times[times.len() / 2];

        Ok(HeaderContext {
            height: parent.height + 1,
            median_time_past: mtp,
            // Retarget recompute is only attempted at the indexed chain's own boundary; headers
            // deeper into a pending branch inherit their parent's bits outside a retarget point.
            expected_bits: parent.header.bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;
    use chainkeep_common::settings::DatabaseSettings;

    fn organizer(dir: &tempfile::TempDir) -> HeaderOrganizer {
        let mut settings = Settings::default();
        settings.retarget = false;
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
        HeaderOrganizer::new(Arc::new(PrioritizedRwLock::new(db)), settings, Checkpoints::default()).unwrap()
    }

    #[test]
    fn genesis_header_is_accepted_above_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let organizer = organizer(&dir);
        let header = genesis_block(Network::Bitcoin).header;
        assert_eq!(organizer.organize(header).unwrap(), 0);
    }

    #[test]
    fn stopped_organizer_rejects_further_headers() {
        let dir = tempfile::tempdir().unwrap();
        let organizer = organizer(&dir);
        organizer.stop();
        let header = genesis_block(Network::Bitcoin).header;
        assert!(organizer.organize(header).is_err());
    }
}
