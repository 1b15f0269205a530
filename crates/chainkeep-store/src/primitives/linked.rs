//! LIFO singly-linked chains over a `RecordAllocator`: each record is `[next: u32][payload]`.
//! `multimap_records` builds its per-key chains on top of this; a chain head is an index into
//! the same record allocator, `EMPTY` terminates it.

use crate::error::StoreResult;
use crate::primitives::record::RecordAllocator;

pub const EMPTY: u32 = u32::MAX;
const NEXT_WIDTH: usize = 4;

pub struct LinkedRecords {
    allocator: RecordAllocator,
    value_size: usize,
}

impl LinkedRecords {
    pub fn new(allocator: RecordAllocator, value_size: usize) -> Self {
        debug_assert_eq!(allocator.record_size(), NEXT_WIDTH + value_size);
        Self {
            allocator,
            value_size,
        }
    }

    pub fn create(&mut self) -> StoreResult<()> {
        self.allocator.create()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.allocator.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.allocator.sync()
    }

    /// Starts a brand new chain (a single node whose `next` is `EMPTY`) and returns its index.
    pub fn create_chain(&mut self) -> StoreResult<u32> {
        let index = self.allocator.allocate()?;
        self.write_next(index, EMPTY)?;
        Ok(index)
    }

    /// Prepends a node pointing at `next` (an existing chain head, or `EMPTY`) and returns its
    /// index, the new head.
    pub fn insert(&mut self, next: u32) -> StoreResult<u32> {
        let index = self.allocator.allocate()?;
        self.write_next(index, next)?;
        Ok(index)
    }

    pub fn next(&self, index: u32) -> StoreResult<u32> {
        let rec = self.allocator.get(index)?;
        Ok(u32::from_le_bytes(rec[..NEXT_WIDTH].try_into().unwrap()))
    }

    pub fn get(&self, index: u32) -> StoreResult<&[u8]> {
        let rec = self.allocator.get(index)?;
        Ok(&rec[NEXT_WIDTH..NEXT_WIDTH + self.value_size])
    }

    pub fn get_mut(&mut self, index: u32) -> StoreResult<&mut [u8]> {
        let value_size = self.value_size;
        let rec = self.allocator.get_mut(index)?;
        Ok(&mut rec[NEXT_WIDTH..NEXT_WIDTH + value_size])
    }

    fn write_next(&mut self, index: u32, next: u32) -> StoreResult<()> {
        let rec = self.allocator.get_mut(index)?;
        rec[..NEXT_WIDTH].copy_from_slice(&next.to_le_bytes());
        Ok(())
    }
}
