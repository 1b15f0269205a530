//! Variable-size slab allocator: an 8-byte end-of-data offset followed by a byte blob that
//! callers carve arbitrarily-sized regions out of. Used wherever a record's size isn't known
//! until write time: serialized blocks, serialized transactions, history/stealth rows.

use tracing::{trace, warn};

use crate::error::{StoreError, StoreResult};
use crate::primitives::mmfile::{Mmfile, DEFAULT_GROWTH_RATE};

const END_WIDTH: usize = 8;

pub struct SlabAllocator {
    file: Mmfile,
    base_offset: usize,
    growth_rate: f64,
    end: u64,
}

impl SlabAllocator {
    pub fn new(file: Mmfile, base_offset: usize) -> Self {
        Self {
            file,
            base_offset,
            growth_rate: DEFAULT_GROWTH_RATE,
            end: 0,
        }
    }

    pub fn with_growth_rate(mut self, growth_rate: f64) -> Self {
        self.growth_rate = growth_rate;
        self
    }

    pub fn create(&mut self) -> StoreResult<()> {
        self.end = 0;
        self.file
            .reserve(self.base_offset + END_WIDTH, self.growth_rate)?;
        self.write_end()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.file
            .reserve(self.base_offset + END_WIDTH, self.growth_rate)?;
        let off = self.base_offset;
        self.end = u64::from_le_bytes(self.file.data()[off..off + END_WIDTH].try_into().unwrap());
        Ok(())
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Reserves `len` fresh bytes at the end of the slab and returns their offset.
    pub fn allocate(&mut self, len: usize) -> StoreResult<u64> {
        let offset = self.end;
        let new_end = offset
            .checked_add(len as u64)
            .ok_or_else(|| StoreError::Corruption("slab_allocator overflow".into()))?;
        let needed = self.base_offset + END_WIDTH + new_end as usize;
        self.file.reserve(needed, self.growth_rate)?;
        self.end = new_end;
        trace!(offset, len, "allocated slab region");
        Ok(offset)
    }

    fn data_start(&self) -> usize {
        self.base_offset + END_WIDTH
    }

    pub fn get(&self, offset: u64, len: usize) -> StoreResult<&[u8]> {
        let start = self.data_start() + offset as usize;
        let stop = start + len;
        if offset + len as u64 > self.end {
            warn!(offset, len, end = self.end, "slab read past end");
            return Err(StoreError::Corruption(format!(
                "slab read [{offset}, {}) past end {}",
                offset + len as u64,
                self.end
            )));
        }
        Ok(&self.file.data()[start..stop])
    }

    pub fn get_mut(&mut self, offset: u64, len: usize) -> StoreResult<&mut [u8]> {
        if offset + len as u64 > self.end {
            warn!(offset, len, end = self.end, "slab write past end");
            return Err(StoreError::Corruption(format!(
                "slab write [{offset}, {}) past end {}",
                offset + len as u64,
                self.end
            )));
        }
        let start = self.data_start() + offset as usize;
        Ok(&mut self.file.data_mut()[start..start + len])
    }

    /// Returns everything from `offset` to the current end of allocated data, for callers whose
    /// value format is self-delimiting and doesn't need an explicit stored length.
    pub fn get_from(&self, offset: u64) -> StoreResult<&[u8]> {
        if offset > self.end {
            warn!(offset, end = self.end, "slab offset past end");
            return Err(StoreError::Corruption(format!(
                "slab offset {offset} past end {}",
                self.end
            )));
        }
        let start = self.data_start() + offset as usize;
        let stop = self.data_start() + self.end as usize;
        Ok(&self.file.data()[start..stop])
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.write_end()
    }

    fn write_end(&mut self) -> StoreResult<()> {
        let off = self.base_offset;
        self.file.data_mut()[off..off + END_WIDTH].copy_from_slice(&self.end.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut alloc = SlabAllocator::new(Mmfile::open(dir.path().join("slab.dat")).unwrap(), 0);
        alloc.create().unwrap();

        let a = alloc.allocate(5).unwrap();
        alloc.get_mut(a, 5).unwrap().copy_from_slice(b"hello");
        let b = alloc.allocate(3).unwrap();
        alloc.get_mut(b, 3).unwrap().copy_from_slice(b"abc");

        assert_eq!(alloc.get(a, 5).unwrap(), b"hello");
        assert_eq!(alloc.get(b, 3).unwrap(), b"abc");
        assert_eq!(alloc.get_from(a).unwrap(), b"helloabc");
    }

    #[test]
    fn reopen_preserves_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slab.dat");
        {
            let mut alloc = SlabAllocator::new(Mmfile::open(&path).unwrap(), 0);
            alloc.create().unwrap();
            alloc.allocate(10).unwrap();
            alloc.sync().unwrap();
        }
        let mut reopened = SlabAllocator::new(Mmfile::open(&path).unwrap(), 0);
        reopened.start().unwrap();
        assert_eq!(reopened.end(), 10);
    }
}
