//! Stealth table: a row file of fixed-size records (sequential, append-only) plus an index file
//! that checkpoints `height -> first row index at that height`, letting `pop_above` truncate the
//! row file back to a height boundary without walking a chain.

use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::key::{Hash20, Hash32};
use crate::primitives::record::RecordAllocator;

const PREFIX_LEN: usize = 4;
const EPHEMERAL_KEY_LEN: usize = 33;
const ADDRESS_HASH_LEN: usize = 20;
const TX_HASH_LEN: usize = 32;
pub const STEALTH_ROW_LEN: usize = PREFIX_LEN + EPHEMERAL_KEY_LEN + ADDRESS_HASH_LEN + TX_HASH_LEN;

const CHECKPOINT_HEIGHT_LEN: usize = 4;
const CHECKPOINT_ROW_INDEX_LEN: usize = 4;
pub const CHECKPOINT_RECORD_LEN: usize = CHECKPOINT_HEIGHT_LEN + CHECKPOINT_ROW_INDEX_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthRow {
    pub prefix: u32,
    pub ephemeral_key: [u8; EPHEMERAL_KEY_LEN],
    pub address_hash: Hash20,
    pub tx_hash: Hash32,
}

pub struct StealthTable {
    rows: RecordAllocator,
    checkpoints: RecordAllocator,
}

impl StealthTable {
    pub fn new(rows: RecordAllocator, checkpoints: RecordAllocator) -> Self {
        Self { rows, checkpoints }
    }

    pub fn create(&mut self) -> StoreResult<()> {
        self.rows.create()?;
        self.checkpoints.create()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.rows.start()?;
        self.checkpoints.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.rows.sync()?;
        self.checkpoints.sync()
    }

    pub fn add_row(&mut self, row: StealthRow) -> StoreResult<u32> {
        let idx = self.rows.allocate()?;
        let rec = self.rows.get_mut(idx)?;
        rec[..PREFIX_LEN].copy_from_slice(&row.prefix.to_le_bytes());
        rec[PREFIX_LEN..PREFIX_LEN + EPHEMERAL_KEY_LEN].copy_from_slice(&row.ephemeral_key);
        let addr_off = PREFIX_LEN + EPHEMERAL_KEY_LEN;
        rec[addr_off..addr_off + ADDRESS_HASH_LEN].copy_from_slice(&row.address_hash.0);
        let tx_off = addr_off + ADDRESS_HASH_LEN;
        rec[tx_off..tx_off + TX_HASH_LEN].copy_from_slice(&row.tx_hash.0);
        Ok(idx)
    }

    /// Records that `rows.count()` is the first row index belonging to `height + 1` (i.e. every
    /// row added so far belongs to `height` or earlier). Called once per block, after all of
    /// that block's stealth rows have been added.
    pub fn checkpoint(&mut self, height: u32) -> StoreResult<()> {
        let idx = self.checkpoints.allocate()?;
        let rec = self.checkpoints.get_mut(idx)?;
        rec[..CHECKPOINT_HEIGHT_LEN].copy_from_slice(&height.to_le_bytes());
        rec[CHECKPOINT_HEIGHT_LEN..].copy_from_slice(&self.rows.count().to_le_bytes());
        Ok(())
    }

    pub fn row(&self, index: u32) -> StoreResult<StealthRow> {
        decode(self.rows.get(index)?)
    }

    pub fn row_count(&self) -> u32 {
        self.rows.count()
    }

    /// Row count recorded at the highest checkpoint at or below `height` — the boundary past
    /// which rows belong to a height greater than `height`. `None` if no checkpoint is that
    /// old, meaning every row must be dropped.
    fn boundary_for_height(&self, height: u32) -> StoreResult<Option<u32>> {
        let n = self.checkpoints.count();
        for i in (0..n).rev() {
            let rec = self.checkpoints.get(i)?;
            let h = u32::from_le_bytes(rec[..CHECKPOINT_HEIGHT_LEN].try_into().unwrap());
            if h <= height {
                return Ok(Some(u32::from_le_bytes(
                    rec[CHECKPOINT_HEIGHT_LEN..].try_into().unwrap(),
                )));
            }
        }
        Ok(None)
    }

    /// Truncates the row file back to the boundary recorded for `height`, and drops checkpoints
    /// past it. Implements invariant 4 for the stealth table.
    pub fn pop_above(&mut self, height: u32) -> StoreResult<()> {
        let boundary = self.boundary_for_height(height)?.unwrap_or(0);
        self.rows.truncate(boundary)?;
        let n = self.checkpoints.count();
        let mut keep = n;
        for i in (0..n).rev() {
            let rec = self.checkpoints.get(i)?;
            let h = u32::from_le_bytes(rec[..CHECKPOINT_HEIGHT_LEN].try_into().unwrap());
            if h > height {
                keep = i;
            } else {
                break;
            }
        }
        self.checkpoints.truncate(keep)
    }
}

fn decode(bytes: &[u8]) -> StoreResult<StealthRow> {
    if bytes.len() < STEALTH_ROW_LEN {
        error!(len = bytes.len(), "stealth row too short");
        return Err(StoreError::Corruption("stealth row too short".into()));
    }
    let prefix = u32::from_le_bytes(bytes[..PREFIX_LEN].try_into().unwrap());
    let mut ephemeral_key = [0u8; EPHEMERAL_KEY_LEN];
    ephemeral_key.copy_from_slice(&bytes[PREFIX_LEN..PREFIX_LEN + EPHEMERAL_KEY_LEN]);
    let addr_off = PREFIX_LEN + EPHEMERAL_KEY_LEN;
    let address_hash = Hash20::from_slice(&bytes[addr_off..addr_off + ADDRESS_HASH_LEN]).ok_or_else(|| {
        error!("bad address hash width");
        StoreError::Corruption("bad address hash width".into())
    })?;
    let tx_off = addr_off + ADDRESS_HASH_LEN;
    let tx_hash = Hash32::from_slice(&bytes[tx_off..tx_off + TX_HASH_LEN]).ok_or_else(|| {
        error!("bad tx hash width");
        StoreError::Corruption("bad tx hash width".into())
    })?;
    Ok(StealthRow {
        prefix,
        ephemeral_key,
        address_hash,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::mmfile::Mmfile;

    fn table(dir: &tempfile::TempDir) -> StealthTable {
        let rows = RecordAllocator::new(
            Mmfile::open(dir.path().join("st_rows.dat")).unwrap(),
            0,
            STEALTH_ROW_LEN,
        );
        let checkpoints = RecordAllocator::new(
            Mmfile::open(dir.path().join("st_idx.dat")).unwrap(),
            0,
            CHECKPOINT_RECORD_LEN,
        );
        StealthTable::new(rows, checkpoints)
    }

    fn row(tag: u8) -> StealthRow {
        StealthRow {
            prefix: 0x0F0F_0F0F,
            ephemeral_key: [tag; 33],
            address_hash: Hash20([tag; 20]),
            tx_hash: Hash32([tag; 32]),
        }
    }

    #[test]
    fn pop_above_truncates_to_checkpoint_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create().unwrap();

        t.add_row(row(1)).unwrap();
        t.add_row(row(2)).unwrap();
        t.checkpoint(0).unwrap();

        t.add_row(row(3)).unwrap();
        t.checkpoint(1).unwrap();

        assert_eq!(t.row_count(), 3);
        t.pop_above(0).unwrap();
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.row(0).unwrap().ephemeral_key[0], 1);
        assert_eq!(t.row(1).unwrap().ephemeral_key[0], 2);
    }
}
