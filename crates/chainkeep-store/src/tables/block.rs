//! Block table: `htdb_slab<Hash32>` keyed by block hash, plus a secondary `disk_array`
//! height → slab-offset index (the "block-index"). Grounded on spec.md §3's Block table
//! description and on Floresta's `ChainStore::save_header`/`update_block_index` pair, which
//! keeps the same two-sided (by-hash, by-height) lookup shape.

use bitcoin::block::Header as BlockHeader;
use bitcoin::consensus::{deserialize, serialize, Decodable};
use bitcoin::{BlockHash, Txid};

use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::key::Hash32;
use crate::primitives::disk_array::DiskArray64;
use crate::primitives::htdb::HtdbSlab;

const HEADER_LEN: usize = 80;
const HEIGHT_LEN: usize = 4;
const TX_COUNT_LEN: usize = 4;
const TXID_LEN: usize = 32;

/// A decoded block-table row: enough to reconstruct the header and locate its transactions in
/// the transaction table.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub header: BlockHeader,
    pub height: u32,
    pub txids: Vec<Txid>,
}

pub struct BlockTable {
    slab: HtdbSlab<Hash32>,
    index: DiskArray64<u64>,
    top_height: Option<u32>,
}

impl BlockTable {
    pub fn new(slab: HtdbSlab<Hash32>, index: DiskArray64<u64>) -> Self {
        Self {
            slab,
            index,
            top_height: None,
        }
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.slab.create(buckets)?;
        self.index.initialize_new(0)?;
        self.top_height = None;
        Ok(())
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.slab.start()?;
        self.index.start()?;
        self.top_height = self.recompute_top_height()?;
        Ok(())
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.slab.sync()
    }

    pub fn top_height(&self) -> Option<u32> {
        self.top_height
    }

    fn recompute_top_height(&self) -> StoreResult<Option<u32>> {
        for height in (0..self.index.len()).rev() {
            if self.index.read(height)? != u64::MAX {
                return Ok(Some(height));
            }
        }
        Ok(None)
    }

    /// Stores a block's header and the ids of its transactions, and records the block-index
    /// entry at `height`. Any heights below `height` that have never been populated are left as
    /// `empty` holes, per invariant 1.
    pub fn store(&mut self, header: &BlockHeader, height: u32, txids: &[Txid]) -> StoreResult<()> {
        let key = Hash32::from(header.block_hash());
        let value_size = HEADER_LEN + HEIGHT_LEN + TX_COUNT_LEN + txids.len() * TXID_LEN;
        let header_bytes = serialize(header);
        self.slab.store(key, value_size, |buf| {
            buf[..HEADER_LEN].copy_from_slice(&header_bytes);
            buf[HEADER_LEN..HEADER_LEN + HEIGHT_LEN].copy_from_slice(&height.to_le_bytes());
            buf[HEADER_LEN + HEIGHT_LEN..HEADER_LEN + HEIGHT_LEN + TX_COUNT_LEN]
                .copy_from_slice(&(txids.len() as u32).to_le_bytes());
            let mut offset = HEADER_LEN + HEIGHT_LEN + TX_COUNT_LEN;
            for txid in txids {
                buf[offset..offset + TXID_LEN].copy_from_slice(txid.as_ref());
                offset += TXID_LEN;
            }
        })?;

        self.index.grow_to(height + 1)?;
        let offset = self
            .slab
            .get(&key)?
            .map(|(offset, _)| offset)
            .expect("just-stored key must be found");
        self.index.write(height, offset)?;
        self.top_height = Some(self.top_height.map_or(height, |h| h.max(height)));
        Ok(())
    }

    pub fn fetch_by_hash(&self, hash: BlockHash) -> StoreResult<Option<BlockRecord>> {
        let key = Hash32::from(hash);
        match self.slab.get(&key)? {
            Some((_, bytes)) => Ok(Some(decode_record(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn fetch_by_height(&self, height: u32) -> StoreResult<Option<BlockRecord>> {
        if height >= self.index.len() {
            return Ok(None);
        }
        let offset = self.index.read(height)?;
        if offset == u64::MAX {
            return Ok(None);
        }
        let bytes = self.slab.value_bytes_from(offset)?;
        Ok(Some(decode_record(bytes)?))
    }

    /// Clears the block-index entries for every height `>= height`, part of `pop`'s inversion
    /// of `push`. The slab rows themselves are left in place (slabs never reclaim); only the
    /// by-height pointer is forgotten, matching htdb_slab's append-only nature.
    pub fn pop_above(&mut self, height: u32) -> StoreResult<()> {
        for h in height..self.index.len() {
            self.index.write(h, u64::MAX)?;
        }
        self.top_height = self.recompute_top_height()?;
        Ok(())
    }
}

fn decode_record(bytes: &[u8]) -> StoreResult<BlockRecord> {
    if bytes.len() < HEADER_LEN + HEIGHT_LEN + TX_COUNT_LEN {
        error!(len = bytes.len(), "block record too short");
        return Err(StoreError::Corruption("block record too short".into()));
    }
    let header: BlockHeader = deserialize(&bytes[..HEADER_LEN]).map_err(|e| {
        error!(%e, "block header decode failed");
        StoreError::Corruption(format!("block header decode: {e}"))
    })?;
    let height = u32::from_le_bytes(bytes[HEADER_LEN..HEADER_LEN + HEIGHT_LEN].try_into().unwrap());
    let tx_count_off = HEADER_LEN + HEIGHT_LEN;
    let tx_count = u32::from_le_bytes(
        bytes[tx_count_off..tx_count_off + TX_COUNT_LEN]
            .try_into()
            .unwrap(),
    ) as usize;
    let mut offset = tx_count_off + TX_COUNT_LEN;
    let mut txids = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        let chunk = bytes.get(offset..offset + TXID_LEN).ok_or_else(|| {
            error!(tx_count, "truncated txid list");
            StoreError::Corruption("truncated txid list".into())
        })?;
        txids.push(Txid::consensus_decode(&mut std::io::Cursor::new(chunk)).map_err(|e| {
            error!(%e, "txid decode failed");
            StoreError::Corruption(format!("txid decode: {e}"))
        })?);
        offset += TXID_LEN;
    }
    Ok(BlockRecord {
        header,
        height,
        txids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::mmfile::Mmfile;
    use crate::primitives::slab::SlabAllocator;

    fn table(dir: &tempfile::TempDir) -> BlockTable {
        let header = DiskArray64::new(Mmfile::open(dir.path().join("bi.dat")).unwrap(), 0);
        let slab_header = DiskArray64::new(Mmfile::open(dir.path().join("bt_hdr.dat")).unwrap(), 0);
        let slab_alloc = SlabAllocator::new(Mmfile::open(dir.path().join("bt_rows.dat")).unwrap(), 0);
        BlockTable::new(HtdbSlab::new(slab_header, slab_alloc), header)
    }

    fn genesis_header() -> BlockHeader {
        bitcoin::blockdata::constants::genesis_block(bitcoin::Network::Bitcoin).header
    }

    #[test]
    fn store_and_fetch_genesis_by_hash_and_height() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(16).unwrap();
        let header = genesis_header();

        t.store(&header, 0, &[]).unwrap();
        assert_eq!(t.top_height(), Some(0));

        let by_hash = t.fetch_by_hash(header.block_hash()).unwrap().unwrap();
        assert_eq!(by_hash.header.block_hash(), header.block_hash());

        let by_height = t.fetch_by_height(0).unwrap().unwrap();
        assert_eq!(by_height.height, 0);
    }

    #[test]
    fn pop_above_clears_index_but_keeps_top_height_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(16).unwrap();
        let header = genesis_header();
        t.store(&header, 0, &[]).unwrap();

        t.pop_above(0).unwrap();
        assert_eq!(t.top_height(), None);
        assert!(t.fetch_by_height(0).unwrap().is_none());
        // the row is still reachable by hash; only the height pointer was forgotten
        assert!(t.fetch_by_hash(header.block_hash()).unwrap().is_some());
    }
}
