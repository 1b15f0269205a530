//! Variable-value hash table: a `disk_array` of bucket heads (always the 8-byte `size`/value
//! layout) plus a `SlabAllocator` of `[key: H][next_in_bucket: u64][value]` entries. Values are
//! self-delimiting (consensus-decoded blocks/transactions know their own length), so `get`
//! hands back a slice running to the end of the allocated data rather than a length-bounded one.
//!
//! Unlike `htdb_record`, this table supports `remove`: it tombstones the stored key in place
//! rather than unlinking, since unlinking a variable-size slab entry would require knowing the
//! previous entry's exact byte offset.

use std::marker::PhantomData;

use crate::error::StoreResult;
use crate::key::{hash_bucket, FixedKey};
use crate::primitives::disk_array::DiskArray64;
use crate::primitives::slab::SlabAllocator;

const NEXT_WIDTH: usize = 8;

pub struct HtdbSlab<H: FixedKey> {
    header: DiskArray64<u64>,
    allocator: SlabAllocator,
    _marker: PhantomData<H>,
}

impl<H: FixedKey> HtdbSlab<H> {
    pub fn new(header: DiskArray64<u64>, allocator: SlabAllocator) -> Self {
        Self {
            header,
            allocator,
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

    /// Appends a new entry for `key` and returns the offset of its value area.
    pub fn store(&mut self, key: H, value_size: usize, write: impl FnOnce(&mut [u8])) -> StoreResult<u64> {
        let idx = self.bucket_index(&key);
        let head = self.header.read(idx)?;
        let total = H::SIZE + NEXT_WIDTH + value_size;
        let offset = self.allocator.allocate(total)?;
        {
            let entry = self.allocator.get_mut(offset, total)?;
            entry[..H::SIZE].copy_from_slice(key.as_bytes());
            entry[H::SIZE..H::SIZE + NEXT_WIDTH].copy_from_slice(&head.to_le_bytes());
            write(&mut entry[H::SIZE + NEXT_WIDTH..]);
        }
        self.header.write(idx, offset)?;
        Ok(offset + (H::SIZE + NEXT_WIDTH) as u64)
    }

    /// Returns `(value_offset, bytes from there to the current end of the slab)`.
    pub fn get(&self, key: &H) -> StoreResult<Option<(u64, &[u8])>> {
        let idx = self.bucket_index(key);
        let mut cur = self.header.read(idx)?;
        while cur != u64::MAX {
            let prefix = self.allocator.get(cur, H::SIZE + NEXT_WIDTH)?;
            let stored_key = &prefix[..H::SIZE];
            let next = u64::from_le_bytes(prefix[H::SIZE..H::SIZE + NEXT_WIDTH].try_into().unwrap());
            if stored_key == key.as_bytes() && !key_bytes_are_tombstone::<H>(stored_key) {
                let value_offset = cur + (H::SIZE + NEXT_WIDTH) as u64;
                return Ok(Some((value_offset, self.allocator.get_from(value_offset)?)));
            }
            cur = next;
        }
        Ok(None)
    }

    /// Tombstones `key`'s entry so it's skipped by future lookups. The slab space itself is
    /// never reclaimed.
    pub fn remove(&mut self, key: &H) -> StoreResult<bool> {
        let idx = self.bucket_index(key);
        let mut cur = self.header.read(idx)?;
        while cur != u64::MAX {
            let (matches, next) = {
                let prefix = self.allocator.get(cur, H::SIZE + NEXT_WIDTH)?;
                (
                    &prefix[..H::SIZE] == key.as_bytes(),
                    u64::from_le_bytes(prefix[H::SIZE..H::SIZE + NEXT_WIDTH].try_into().unwrap()),
                )
            };
            if matches {
                let entry = self.allocator.get_mut(cur, H::SIZE)?;
                entry.fill(0xFF);
                return Ok(true);
            }
            cur = next;
        }
        Ok(false)
    }

    pub fn value_bytes_from(&self, offset: u64) -> StoreResult<&[u8]> {
        self.allocator.get_from(offset)
    }
}

fn key_bytes_are_tombstone<H: FixedKey>(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| *b == 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Hash32;
    use crate::primitives::mmfile::Mmfile;

    fn table(dir: &tempfile::TempDir) -> HtdbSlab<Hash32> {
        let header = DiskArray64::new(Mmfile::open(dir.path().join("hdr.dat")).unwrap(), 0);
        let allocator = SlabAllocator::new(Mmfile::open(dir.path().join("rows.dat")).unwrap(), 0);
        HtdbSlab::new(header, allocator)
    }

    #[test]
    fn store_and_get_variable_length_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(8).unwrap();

        let key = Hash32([3u8; 32]);
        t.store(key, 6, |buf| buf.copy_from_slice(b"block!")).unwrap();

        let (_, value) = t.get(&key).unwrap().unwrap();
        assert_eq!(&value[..6], b"block!");
    }

    #[test]
    fn remove_tombstones_and_hides_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(1).unwrap();
        let key = Hash32([9u8; 32]);
        t.store(key, 3, |buf| buf.copy_from_slice(b"abc")).unwrap();
        assert!(t.remove(&key).unwrap());
        assert!(t.get(&key).unwrap().is_none());
    }
}
