//! Fixed-value hash table: a `disk_array` of bucket heads plus a `RecordAllocator` of
//! `[key: H][next_in_bucket: u32][value]` records, chained within a bucket on collision.
//! `htdb_record` has no general delete; the one removal path (`remove`) exists purely to let
//! `multimap_records` drop a key's chain-head entry once its chain becomes empty.

use std::marker::PhantomData;

use crate::error::StoreResult;
use crate::key::{hash_bucket, FixedKey};
use crate::primitives::disk_array::DiskArray32;
use crate::primitives::record::RecordAllocator;

const NEXT_WIDTH: usize = 4;

pub struct HtdbRecord<H: FixedKey> {
    header: DiskArray32<u32>,
    allocator: RecordAllocator,
    value_size: usize,
    _marker: PhantomData<H>,
}

impl<H: FixedKey> HtdbRecord<H> {
    pub fn new(header: DiskArray32<u32>, allocator: RecordAllocator, value_size: usize) -> Self {
        debug_assert_eq!(allocator.record_size(), H::SIZE + NEXT_WIDTH + value_size);
        Self {
            header,
            allocator,
            value_size,
            _marker: PhantomData,
        }
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.header.initialize_new(buckets)?;
        self.allocator.create()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.header.start()?;
        self.allocator.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.allocator.sync()
    }

    fn bucket_index(&self, key: &H) -> u32 {
        hash_bucket(key, self.header.len() as u64) as u32
    }

    /// Prepends a new entry for `key`, even if one already exists (the original semantics: no
    /// implicit replace).
    pub fn store(
        &mut self,
        key: H,
        write: impl FnOnce(&mut [u8]),
    ) -> StoreResult<u32> {
        let idx = self.bucket_index(&key);
        let head = self.header.read(idx)?;
        let rec_idx = self.allocator.allocate()?;
        let value_size = self.value_size;
        {
            let rec = self.allocator.get_mut(rec_idx)?;
            rec[..H::SIZE].copy_from_slice(key.as_bytes());
            rec[H::SIZE..H::SIZE + NEXT_WIDTH].copy_from_slice(&head.to_le_bytes());
            write(&mut rec[H::SIZE + NEXT_WIDTH..H::SIZE + NEXT_WIDTH + value_size]);
        }
        self.header.write(idx, rec_idx)?;
        Ok(rec_idx)
    }

    pub fn get(&self, key: &H) -> StoreResult<Option<&[u8]>> {
        let idx = self.bucket_index(key);
        let mut cur = self.header.read(idx)?;
        while cur != u32::MAX {
            let rec = self.allocator.get(cur)?;
            if &rec[..H::SIZE] == key.as_bytes() {
                return Ok(Some(&rec[H::SIZE + NEXT_WIDTH..]));
            }
            cur = u32::from_le_bytes(rec[H::SIZE..H::SIZE + NEXT_WIDTH].try_into().unwrap());
        }
        Ok(None)
    }

    pub fn get_mut(&mut self, key: &H) -> StoreResult<Option<&mut [u8]>> {
        let idx = self.bucket_index(key);
        let mut cur = self.header.read(idx)?;
        while cur != u32::MAX {
            let next = {
                let rec = self.allocator.get(cur)?;
                if &rec[..H::SIZE] == key.as_bytes() {
                    None
                } else {
                    Some(u32::from_le_bytes(
                        rec[H::SIZE..H::SIZE + NEXT_WIDTH].try_into().unwrap(),
                    ))
                }
            };
            match next {
                None => {
                    let rec = self.allocator.get_mut(cur)?;
                    return Ok(Some(&mut rec[H::SIZE + NEXT_WIDTH..]));
                }
                Some(n) => cur = n,
            }
        }
        Ok(None)
    }

    /// Unlinks `key`'s entry from its bucket chain. Only called by `multimap_records` when a
    /// key's row chain has just gone empty.
    pub fn remove(&mut self, key: &H) -> StoreResult<bool> {
        let idx = self.bucket_index(key);
        let mut cur = self.header.read(idx)?;
        let mut prev: Option<u32> = None;
        while cur != u32::MAX {
            let (matches, next) = {
                let rec = self.allocator.get(cur)?;
                (
                    &rec[..H::SIZE] == key.as_bytes(),
                    u32::from_le_bytes(rec[H::SIZE..H::SIZE + NEXT_WIDTH].try_into().unwrap()),
                )
            };
            if matches {
                match prev {
                    Some(p) => {
                        let prec = self.allocator.get_mut(p)?;
                        prec[H::SIZE..H::SIZE + NEXT_WIDTH].copy_from_slice(&next.to_le_bytes());
                    }
                    None => self.header.write(idx, next)?,
                }
                return Ok(true);
            }
            prev = Some(cur);
            cur = next;
        }
        Ok(false)
    }
}

impl<H: FixedKey> HtdbRecord<H> {
    pub fn record_size(key_size: usize, value_size: usize) -> usize {
        key_size + NEXT_WIDTH + value_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Hash20;
    use crate::primitives::mmfile::Mmfile;

    fn table(dir: &tempfile::TempDir, value_size: usize) -> HtdbRecord<Hash20> {
        let header = DiskArray32::new(Mmfile::open(dir.path().join("hdr.dat")).unwrap(), 0);
        let allocator = RecordAllocator::new(
            Mmfile::open(dir.path().join("rows.dat")).unwrap(),
            0,
            HtdbRecord::<Hash20>::record_size(Hash20::SIZE, value_size),
        );
        HtdbRecord::new(header, allocator, value_size)
    }

    #[test]
    fn store_and_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir, 4);
        t.create(4).unwrap();

        let key = Hash20([1u8; 20]);
        t.store(key, |buf| buf.copy_from_slice(&7u32.to_le_bytes()))
            .unwrap();

        let value = t.get(&key).unwrap().unwrap();
        assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 7);
        assert!(t.get(&Hash20([2u8; 20])).unwrap().is_none());
    }

    #[test]
    fn colliding_keys_chain_within_a_bucket() {
        let dir = tempfile::tempdir().unwrap();
        // single bucket forces every key into the same chain
        let mut t = table(&dir, 4);
        t.create(1).unwrap();

        let a = Hash20([1u8; 20]);
        let b = Hash20([2u8; 20]);
        t.store(a, |buf| buf.copy_from_slice(&1u32.to_le_bytes())).unwrap();
        t.store(b, |buf| buf.copy_from_slice(&2u32.to_le_bytes())).unwrap();

        assert_eq!(
            u32::from_le_bytes(t.get(&a).unwrap().unwrap().try_into().unwrap()),
            1
        );
        assert_eq!(
            u32::from_le_bytes(t.get(&b).unwrap().unwrap().try_into().unwrap()),
            2
        );
    }

    #[test]
    fn remove_unlinks_from_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir, 4);
        t.create(1).unwrap();
        let a = Hash20([1u8; 20]);
        let b = Hash20([2u8; 20]);
        t.store(a, |buf| buf.copy_from_slice(&1u32.to_le_bytes())).unwrap();
        t.store(b, |buf| buf.copy_from_slice(&2u32.to_le_bytes())).unwrap();

        assert!(t.remove(&b).unwrap());
        assert!(t.get(&b).unwrap().is_none());
        assert!(t.get(&a).unwrap().is_some());
    }
}
