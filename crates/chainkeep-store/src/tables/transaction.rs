//! Transaction table: `htdb_slab<Hash32>` keyed by txid, storing the confirming height, its
//! index within that block, and the full serialized transaction.

use bitcoin::consensus::{deserialize, serialize};
use bitcoin::{Transaction, Txid};
use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::key::Hash32;
use crate::primitives::htdb::HtdbSlab;

const HEIGHT_LEN: usize = 4;
const INDEX_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub height: u32,
    pub index_in_block: u32,
    pub transaction: Transaction,
}

pub struct TransactionTable {
    slab: HtdbSlab<Hash32>,
}

impl TransactionTable {
    pub fn new(slab: HtdbSlab<Hash32>) -> Self {
        Self { slab }
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.slab.create(buckets)
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.slab.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.slab.sync()
    }

    pub fn store(&mut self, tx: &Transaction, height: u32, index_in_block: u32) -> StoreResult<()> {
        let key = Hash32::from(tx.compute_txid());
        let tx_bytes = serialize(tx);
        let value_size = HEIGHT_LEN + INDEX_LEN + tx_bytes.len();
        self.slab.store(key, value_size, |buf| {
            buf[..HEIGHT_LEN].copy_from_slice(&height.to_le_bytes());
            buf[HEIGHT_LEN..HEIGHT_LEN + INDEX_LEN].copy_from_slice(&index_in_block.to_le_bytes());
            buf[HEIGHT_LEN + INDEX_LEN..HEIGHT_LEN + INDEX_LEN + tx_bytes.len()]
                .copy_from_slice(&tx_bytes);
        })?;
        Ok(())
    }

    pub fn fetch(&self, txid: Txid) -> StoreResult<Option<TransactionRecord>> {
        let key = Hash32::from(txid);
        match self.slab.get(&key)? {
            Some((_, bytes)) => Ok(Some(decode_record(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, txid: Txid) -> StoreResult<bool> {
        Ok(self.fetch(txid)?.is_some())
    }

    /// Tombstones `txid`'s row. Only called while reverting a `pop` back past the block that
    /// confirmed it.
    pub fn remove(&mut self, txid: Txid) -> StoreResult<bool> {
        let key = Hash32::from(txid);
        self.slab.remove(&key)
    }
}

fn decode_record(bytes: &[u8]) -> StoreResult<TransactionRecord> {
    if bytes.len() < HEIGHT_LEN + INDEX_LEN {
        error!(len = bytes.len(), "transaction record too short");
        return Err(StoreError::Corruption("transaction record too short".into()));
    }
    let height = u32::from_le_bytes(bytes[..HEIGHT_LEN].try_into().unwrap());
    let index_in_block =
        u32::from_le_bytes(bytes[HEIGHT_LEN..HEIGHT_LEN + INDEX_LEN].try_into().unwrap());
    let transaction: Transaction = deserialize(&bytes[HEIGHT_LEN + INDEX_LEN..]).map_err(|e| {
        error!(%e, "transaction decode failed");
        StoreError::Corruption(format!("transaction decode: {e}"))
    })?;
    Ok(TransactionRecord {
        height,
        index_in_block,
        transaction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::disk_array::DiskArray64;
    use crate::primitives::mmfile::Mmfile;
    use crate::primitives::slab::SlabAllocator;

    fn table(dir: &tempfile::TempDir) -> TransactionTable {
        let header = DiskArray64::new(Mmfile::open(dir.path().join("tt_hdr.dat")).unwrap(), 0);
        let alloc = SlabAllocator::new(Mmfile::open(dir.path().join("tt_rows.dat")).unwrap(), 0);
        TransactionTable::new(HtdbSlab::new(header, alloc))
    }

    fn coinbase() -> Transaction {
        bitcoin::blockdata::constants::genesis_block(bitcoin::Network::Bitcoin)
            .txdata
            .into_iter()
            .next()
            .unwrap()
    }

    #[test]
    fn store_and_fetch_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(8).unwrap();
        let tx = coinbase();
        t.store(&tx, 0, 0).unwrap();

        let record = t.fetch(tx.compute_txid()).unwrap().unwrap();
        assert_eq!(record.height, 0);
        assert_eq!(record.transaction.compute_txid(), tx.compute_txid());
    }

    #[test]
    fn remove_hides_the_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(8).unwrap();
        let tx = coinbase();
        t.store(&tx, 0, 0).unwrap();
        assert!(t.remove(tx.compute_txid()).unwrap());
        assert!(!t.contains(tx.compute_txid()).unwrap());
    }
}
