//! Fixed-size record allocator: a 4-byte record count followed by `count` records of
//! `record_size` bytes each. Records are append-only; nothing is ever freed individually, which
//! is why `linked_records` and `htdb_record` (both built on this) only ever unlink, never
//! reclaim.

use tracing::{trace, warn};

use crate::error::StoreResult;
use crate::primitives::mmfile::{Mmfile, DEFAULT_GROWTH_RATE};

const COUNT_WIDTH: usize = 4;

pub struct RecordAllocator {
    file: Mmfile,
    base_offset: usize,
    record_size: usize,
    growth_rate: f64,
    count: u32,
}

impl RecordAllocator {
    pub fn new(file: Mmfile, base_offset: usize, record_size: usize) -> Self {
        Self {
            file,
            base_offset,
            record_size,
            growth_rate: DEFAULT_GROWTH_RATE,
            count: 0,
        }
    }

    pub fn with_growth_rate(mut self, growth_rate: f64) -> Self {
        self.growth_rate = growth_rate;
        self
    }

    /// Initializes a fresh (zero-record) allocator, writing the count header.
    pub fn create(&mut self) -> StoreResult<()> {
        self.count = 0;
        self.file
            .reserve(self.base_offset + COUNT_WIDTH, self.growth_rate)?;
        self.write_count()
    }

    /// Loads the record count from an existing file.
    pub fn start(&mut self) -> StoreResult<()> {
        self.file
            .reserve(self.base_offset + COUNT_WIDTH, self.growth_rate)?;
        let bytes = &self.file.data()[self.base_offset..self.base_offset + COUNT_WIDTH];
        self.count = u32::from_le_bytes(bytes.try_into().unwrap());
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    fn record_offset(&self, index: u32) -> usize {
        self.base_offset + COUNT_WIDTH + index as usize * self.record_size
    }

    /// Appends a new record (uninitialized bytes) and returns its index.
    pub fn allocate(&mut self) -> StoreResult<u32> {
        let index = self.count;
        self.count = self
            .count
            .checked_add(1)
            .ok_or_else(|| crate::error::StoreError::Corruption("record_allocator overflow".into()))?;
        let end = self.record_offset(self.count);
        self.file.reserve(end, self.growth_rate)?;
        trace!(index, record_size = self.record_size, "allocated record");
        Ok(index)
    }

    pub fn get(&self, index: u32) -> StoreResult<&[u8]> {
        self.bounds_check(index)?;
        let start = self.record_offset(index);
        Ok(&self.file.data()[start..start + self.record_size])
    }

    pub fn get_mut(&mut self, index: u32) -> StoreResult<&mut [u8]> {
        self.bounds_check(index)?;
        let start = self.record_offset(index);
        let size = self.record_size;
        Ok(&mut self.file.data_mut()[start..start + size])
    }

    fn bounds_check(&self, index: u32) -> StoreResult<()> {
        if index >= self.count {
            warn!(index, count = self.count, "record index out of range");
            return Err(crate::error::StoreError::Corruption(format!(
                "record index {index} out of range (count {})",
                self.count
            )));
        }
        Ok(())
    }

    /// Shrinks the allocator back to `new_count` records. The bytes past `new_count` are left
    /// in the map (never zeroed) but become unreachable; a later `allocate` simply overwrites
    /// them. Used by tables with no chain structure of their own (the stealth row file) to
    /// implement `pop_above`.
    pub fn truncate(&mut self, new_count: u32) -> StoreResult<()> {
        if new_count > self.count {
            return Err(crate::error::StoreError::Corruption(
                "record_allocator truncate would grow the table".into(),
            ));
        }
        self.count = new_count;
        self.write_count()
    }

    /// Persists the record count. Records themselves are written straight into the map and
    /// need no separate flush.
    pub fn sync(&mut self) -> StoreResult<()> {
        self.write_count()
    }

    fn write_count(&mut self) -> StoreResult<()> {
        let off = self.base_offset;
        self.file.data_mut()[off..off + COUNT_WIDTH].copy_from_slice(&self.count.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(dir: &tempfile::TempDir, record_size: usize) -> RecordAllocator {
        let file = Mmfile::open(dir.path().join("records.dat")).unwrap();
        RecordAllocator::new(file, 0, record_size)
    }

    #[test]
    fn allocate_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = allocator(&dir, 8);
        alloc.create().unwrap();

        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!((a, b), (0, 1));

        alloc.get_mut(a).unwrap().copy_from_slice(b"aaaaaaaa");
        alloc.get_mut(b).unwrap().copy_from_slice(b"bbbbbbbb");
        assert_eq!(alloc.get(a).unwrap(), b"aaaaaaaa");
        assert_eq!(alloc.get(b).unwrap(), b"bbbbbbbb");
    }

    #[test]
    fn start_recovers_count_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.dat");
        {
            let mut alloc = RecordAllocator::new(Mmfile::open(&path).unwrap(), 0, 4);
            alloc.create().unwrap();
            alloc.allocate().unwrap();
            alloc.allocate().unwrap();
            alloc.sync().unwrap();
        }
        let mut reopened = RecordAllocator::new(Mmfile::open(&path).unwrap(), 0, 4);
        reopened.start().unwrap();
        assert_eq!(reopened.count(), 2);
    }

    #[test]
    fn out_of_range_get_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = allocator(&dir, 4);
        alloc.create().unwrap();
        assert!(alloc.get(0).is_err());
    }
}
