//! Spend table: `htdb_record<OutPointKey>` mapping a spent output to its spender. Absence means
//! unspent. One record per spent output; `htdb_record` never overwrites, so double-spending the
//! same outpoint within validated history would leave two chained entries — callers must check
//! `get` before `store` (the populator does, via `populate_block`).

use bitcoin::{OutPoint, Txid};
use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::key::OutPointKey;
use crate::primitives::htdb::HtdbRecord;

const SPENDER_HASH_LEN: usize = 32;
const SPENDER_INDEX_LEN: usize = 4;
const VALUE_SIZE: usize = SPENDER_HASH_LEN + SPENDER_INDEX_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpenderRef {
    pub txid: Txid,
    pub input_index: u32,
}

pub struct SpendTable {
    table: HtdbRecord<OutPointKey>,
}

impl SpendTable {
    pub fn new(table: HtdbRecord<OutPointKey>) -> Self {
        Self { table }
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.table.create(buckets)
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.table.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.table.sync()
    }

    pub fn record_size() -> usize {
        HtdbRecord::<OutPointKey>::record_size(OutPointKey::SIZE, VALUE_SIZE)
    }

    pub fn mark_spent(&mut self, outpoint: OutPoint, spender: SpenderRef) -> StoreResult<()> {
        let key: OutPointKey = outpoint.into();
        self.table.store(key, |buf| {
            buf[..SPENDER_HASH_LEN].copy_from_slice(spender.txid.as_ref());
            buf[SPENDER_HASH_LEN..].copy_from_slice(&spender.input_index.to_le_bytes());
        })?;
        Ok(())
    }

    pub fn spender_of(&self, outpoint: OutPoint) -> StoreResult<Option<SpenderRef>> {
        let key: OutPointKey = outpoint.into();
        match self.table.get(&key)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_spent(&self, outpoint: OutPoint) -> StoreResult<bool> {
        Ok(self.spender_of(outpoint)?.is_some())
    }

    /// Undoes `mark_spent`, used while popping the block that spent `outpoint`.
    pub fn unmark_spent(&mut self, outpoint: OutPoint) -> StoreResult<bool> {
        let key: OutPointKey = outpoint.into();
        self.table.remove(&key)
    }
}

fn decode(bytes: &[u8]) -> StoreResult<SpenderRef> {
    if bytes.len() < VALUE_SIZE {
        error!(len = bytes.len(), "spend record too short");
        return Err(StoreError::Corruption("spend record too short".into()));
    }
    use bitcoin::consensus::Decodable;
    let txid = Txid::consensus_decode(&mut std::io::Cursor::new(&bytes[..SPENDER_HASH_LEN])).map_err(|e| {
        error!(%e, "spender txid decode failed");
        StoreError::Corruption(format!("spender txid decode: {e}"))
    })?;
    let input_index =
        u32::from_le_bytes(bytes[SPENDER_HASH_LEN..VALUE_SIZE].try_into().unwrap());
    Ok(SpenderRef { txid, input_index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::disk_array::DiskArray32;
    use crate::primitives::mmfile::Mmfile;
    use crate::primitives::record::RecordAllocator;

    fn table(dir: &tempfile::TempDir) -> SpendTable {
        let header = DiskArray32::new(Mmfile::open(dir.path().join("sp_hdr.dat")).unwrap(), 0);
        let alloc = RecordAllocator::new(
            Mmfile::open(dir.path().join("sp_rows.dat")).unwrap(),
            0,
            SpendTable::record_size(),
        );
        SpendTable::new(HtdbRecord::new(header, alloc, VALUE_SIZE))
    }

    #[test]
    fn unspent_until_marked() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(8).unwrap();
        let outpoint = OutPoint::new(Txid::from_byte_array([1u8; 32]), 0);
        assert!(!t.is_spent(outpoint).unwrap());

        let spender = SpenderRef {
            txid: Txid::from_byte_array([2u8; 32]),
            input_index: 3,
        };
        t.mark_spent(outpoint, spender).unwrap();
        assert_eq!(t.spender_of(outpoint).unwrap(), Some(spender));
    }

    #[test]
    fn unmark_spent_restores_unspent_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(8).unwrap();
        let outpoint = OutPoint::new(Txid::from_byte_array([5u8; 32]), 1);
        t.mark_spent(
            outpoint,
            SpenderRef {
                txid: Txid::from_byte_array([6u8; 32]),
                input_index: 0,
            },
        )
        .unwrap();
        assert!(t.unmark_spent(outpoint).unwrap());
        assert!(!t.is_spent(outpoint).unwrap());
    }
}
