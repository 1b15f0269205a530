//! Multi-valued table: each key maps to a LIFO chain of rows. The chain head index lives inside
//! an `htdb_record<H>` entry; the chain body is a `linked_records`. Used by the history table
//! (address prefix → spend/receive rows).

use tracing::error;

use crate::error::StoreResult;
use crate::key::FixedKey;
use crate::primitives::htdb::record::HtdbRecord;
use crate::primitives::linked::{LinkedRecords, EMPTY};

pub struct MultimapRecords<H: FixedKey> {
    heads: HtdbRecord<H>,
    chain: LinkedRecords,
}

impl<H: FixedKey> MultimapRecords<H> {
    pub fn new(heads: HtdbRecord<H>, chain: LinkedRecords) -> Self {
        Self { heads, chain }
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.heads.create(buckets)?;
        self.chain.create()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.heads.start()?;
        self.chain.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.heads.sync()?;
        self.chain.sync()
    }

    fn head_of(&self, key: &H) -> StoreResult<u32> {
        match self.heads.get(key)? {
            Some(buf) => Ok(u32::from_le_bytes(buf[..4].try_into().unwrap())),
            None => Ok(EMPTY),
        }
    }

    /// Prepends a new row onto `key`'s chain.
    pub fn add_row(&mut self, key: H, write: impl FnOnce(&mut [u8])) -> StoreResult<()> {
        let head = self.head_of(&key)?;
        let new_head = if head == EMPTY {
            self.chain.create_chain()?
        } else {
            self.chain.insert(head)?
        };
        write(self.chain.get_mut(new_head)?);

        if head == EMPTY {
            self.heads
                .store(key, |buf| buf.copy_from_slice(&new_head.to_le_bytes()))?;
        } else {
            let buf = self
                .heads
                .get_mut(&key)?
                .expect("head entry must exist once a chain has started");
            buf[..4].copy_from_slice(&new_head.to_le_bytes());
        }
        Ok(())
    }

    /// Removes the most recently added row for `key`. If that was the only row, the key's
    /// chain-head entry is unlinked entirely.
    pub fn delete_last_row(&mut self, key: &H) -> StoreResult<()> {
        let head = self.head_of(key)?;
        if head == EMPTY {
            return Ok(());
        }
        let next = self.chain.next(head)?;
        if next == EMPTY {
            self.heads.remove(key)?;
        } else {
            let buf = self
                .heads
                .get_mut(key)?
                .expect("head entry must exist while its chain is non-empty");
            buf[..4].copy_from_slice(&next.to_le_bytes());
        }
        Ok(())
    }

    /// Collects the (bounded, acyclic) chain of row indices for `key`, newest first.
    pub fn chain_indices(&self, key: &H) -> StoreResult<Vec<u32>> {
        const MAX_WALK: usize = 1 << 24;
        let mut indices = Vec::new();
        let mut cur = self.head_of(key)?;
        while cur != EMPTY {
            indices.push(cur);
            cur = self.chain.next(cur)?;
            if indices.len() > MAX_WALK {
                error!(walked = indices.len(), "multimap chain exceeds sanity bound, likely a cycle");
                return Err(crate::error::StoreError::Corruption(
                    "multimap chain exceeds sanity bound; likely a cycle".into(),
                ));
            }
        }
        Ok(indices)
    }

    pub fn row(&self, index: u32) -> StoreResult<&[u8]> {
        self.chain.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Hash20;
    use crate::primitives::disk_array::DiskArray32;
    use crate::primitives::mmfile::Mmfile;
    use crate::primitives::record::RecordAllocator;

    const PAYLOAD: usize = 8;

    fn table(dir: &tempfile::TempDir) -> MultimapRecords<Hash20> {
        let header = DiskArray32::new(Mmfile::open(dir.path().join("hdr.dat")).unwrap(), 0);
        let heads_alloc = RecordAllocator::new(
            Mmfile::open(dir.path().join("heads.dat")).unwrap(),
            0,
            HtdbRecord::<Hash20>::record_size(Hash20::SIZE, 4),
        );
        let heads = HtdbRecord::new(header, heads_alloc, 4);
        let chain_alloc = RecordAllocator::new(
            Mmfile::open(dir.path().join("rows.dat")).unwrap(),
            0,
            4 + PAYLOAD,
        );
        let chain = LinkedRecords::new(chain_alloc, PAYLOAD);
        MultimapRecords::new(heads, chain)
    }

    #[test]
    fn rows_come_back_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut mm = table(&dir);
        mm.create(4).unwrap();
        let key = Hash20([5u8; 20]);

        mm.add_row(key, |buf| buf.copy_from_slice(&1u64.to_le_bytes())).unwrap();
        mm.add_row(key, |buf| buf.copy_from_slice(&2u64.to_le_bytes())).unwrap();
        mm.add_row(key, |buf| buf.copy_from_slice(&3u64.to_le_bytes())).unwrap();

        let values: Vec<u64> = mm
            .chain_indices(&key)
            .unwrap()
            .into_iter()
            .map(|idx| u64::from_le_bytes(mm.row(idx).unwrap().try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![3, 2, 1]);
    }

    #[test]
    fn delete_last_row_drops_head_entry_when_chain_empties() {
        let dir = tempfile::tempdir().unwrap();
        let mut mm = table(&dir);
        mm.create(4).unwrap();
        let key = Hash20([6u8; 20]);
        mm.add_row(key, |buf| buf.copy_from_slice(&1u64.to_le_bytes())).unwrap();

        mm.delete_last_row(&key).unwrap();
        assert!(mm.chain_indices(&key).unwrap().is_empty());
    }
}
