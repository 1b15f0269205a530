//! HSDB shard: a sharded, bucketed history-scan database. The top `sharded_bitsize` bits of a
//! scan key select a shard (`HsdbRouter`); within a shard the next `bucket_bitsize` bits select
//! a bucket; the remaining bits are stored alongside each row and compared bit-for-bit on scan.
//!
//! `sharded_bitsize` and `bucket_bitsize` are assumed byte-aligned (a multiple of 8) for the
//! *storage* layout — the remainder is byte-sliced rather than bit-packed. Scan prefixes
//! themselves may be any bit length, including ones shorter than a single byte (spec.md's S4
//! scenario scans a 7-bit prefix), which `bits_match`/`bucket_range_for_prefix` handle bit by
//! bit.

use std::collections::HashMap;

use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::primitives::disk_array::DiskArray64;
use crate::primitives::record::RecordAllocator;

/// `version, shard_max_entries, total_key_size, sharded_bitsize, bucket_bitsize,
/// row_value_size` — six `u32` fields, 24 bytes, matching spec.md §6's HSDB control block.
#[derive(Debug, Clone, Copy)]
pub struct HsdbControlBlock {
    pub version: u32,
    pub shard_max_entries: u32,
    pub total_key_size: u32,
    pub sharded_bitsize: u32,
    pub bucket_bitsize: u32,
    pub row_value_size: u32,
}

const NEXT_WIDTH: usize = 8;
const HEIGHT_WIDTH: usize = 4;
const CONTROL_BLOCK_SIZE: usize = 24;

impl HsdbControlBlock {
    /// Reads the 24-byte, six-`u32`-little-endian control block a shard file starts with —
    /// what `chainkeep-tools show-hsdb-settings` inspects directly, without opening a full
    /// `HsdbShard`.
    pub fn read_from(data: &[u8]) -> StoreResult<Self> {
        if data.len() < CONTROL_BLOCK_SIZE {
            error!(len = data.len(), "file too small to hold an HSDB control block");
            return Err(StoreError::Corruption(
                "file too small to hold an HSDB control block".into(),
            ));
        }
        let field = |i: usize| u32::from_le_bytes(data[i * 4..i * 4 + 4].try_into().unwrap());
        Ok(Self {
            version: field(0),
            shard_max_entries: field(1),
            total_key_size: field(2),
            sharded_bitsize: field(3),
            bucket_bitsize: field(4),
            row_value_size: field(5),
        })
    }
}

/// Reads the big-endian bit window `[start_bit, start_bit + len_bits)` out of `data` (bit 0 is
/// the MSB of byte 0), as the low bits of a `u64`.
fn read_bits(data: &[u8], start_bit: usize, len_bits: usize) -> u64 {
    let mut value: u64 = 0;
    for i in 0..len_bits {
        let bit_pos = start_bit + i;
        let byte = data.get(bit_pos / 8).copied().unwrap_or(0);
        let bit = (byte >> (7 - (bit_pos % 8))) & 1;
        value = (value << 1) | bit as u64;
    }
    value
}

fn bits_match(data: &[u8], prefix: &[u8], prefix_bits: usize) -> bool {
    prefix_bits == 0 || read_bits(data, 0, prefix_bits) == read_bits(prefix, 0, prefix_bits)
}

fn u32_bits_match(value: u32, value_width: usize, prefix: &[u8], prefix_bits: usize) -> bool {
    let bits = prefix_bits.min(value_width);
    for i in 0..bits {
        let value_bit = (value >> (value_width - 1 - i)) & 1;
        let byte = prefix.get(i / 8).copied().unwrap_or(0);
        let prefix_bit = ((byte >> (7 - (i % 8))) & 1) as u32;
        if value_bit != prefix_bit {
            return false;
        }
    }
    true
}

pub struct HsdbShard {
    control: HsdbControlBlock,
    heights: DiskArray64<u64>,
    buckets: DiskArray64<u64>,
    rows: RecordAllocator,
    buffer: Vec<(Vec<u8>, u32, Vec<u8>)>,
}

impl HsdbShard {
    pub fn new(
        control: HsdbControlBlock,
        heights: DiskArray64<u64>,
        buckets: DiskArray64<u64>,
        rows: RecordAllocator,
    ) -> Self {
        Self {
            control,
            heights,
            buckets,
            rows,
            buffer: Vec::new(),
        }
    }

    fn remainder_len(&self) -> usize {
        let consumed_bits = self.control.sharded_bitsize as usize + self.control.bucket_bitsize as usize;
        self.control.total_key_size as usize - consumed_bits / 8
    }

    pub fn row_size(&self) -> usize {
        self.remainder_len() + NEXT_WIDTH + HEIGHT_WIDTH + self.control.row_value_size as usize
    }

    pub fn create(&mut self, max_epochs: u32) -> StoreResult<()> {
        self.heights.initialize_new(max_epochs)?;
        self.buckets
            .initialize_new(1u32 << self.control.bucket_bitsize)?;
        self.rows.create()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.heights.start()?;
        self.buckets.start()?;
        self.rows.start()
    }

    /// Buffers a row for the next `sync`. `scan_key` is shard-local: the caller (normally
    /// `HsdbRouter`) has already stripped the shard-selecting bits.
    pub fn add(&mut self, scan_key: &[u8], height: u32, value: &[u8]) {
        self.buffer.push((scan_key.to_vec(), height, value.to_vec()));
    }

    fn bucket_of(&self, scan_key: &[u8]) -> u32 {
        read_bits(scan_key, 0, self.control.bucket_bitsize as usize) as u32
    }

    /// Sorts the buffered rows by `(bucket, scan_key)`, writes them as a contiguous batch,
    /// chains each into its bucket, and records the post-batch row count as the `height`
    /// checkpoint.
    pub fn sync(&mut self, height: u32) -> StoreResult<()> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.sort_by(|a, b| (self.bucket_of(&a.0), &a.0).cmp(&(self.bucket_of(&b.0), &b.0)));

        let remainder_len = self.remainder_len();
        for (key, h, value) in buffer {
            let bucket = self.bucket_of(&key);
            let head = self.buckets.read(bucket)?;
            let idx = self.rows.allocate()?;
            {
                let rec = self.rows.get_mut(idx)?;
                let bucket_bytes = self.control.bucket_bitsize as usize / 8;
                let remainder = key.get(bucket_bytes..).unwrap_or(&[]);
                rec[..remainder_len].copy_from_slice(&pad_or_truncate(remainder, remainder_len));
                rec[remainder_len..remainder_len + NEXT_WIDTH].copy_from_slice(&head.to_le_bytes());
                let height_off = remainder_len + NEXT_WIDTH;
                rec[height_off..height_off + HEIGHT_WIDTH].copy_from_slice(&h.to_le_bytes());
                let value_off = height_off + HEIGHT_WIDTH;
                let value_len = value.len().min(self.control.row_value_size as usize);
                rec[value_off..value_off + value_len].copy_from_slice(&value[..value_len]);
            }
            self.buckets.write(bucket, idx as u64)?;
        }

        self.heights.grow_to(height + 1)?;
        self.heights.write(height, self.rows.count() as u64)?;
        self.rows.sync()
    }

    fn row_boundary_for(&self, height: u32) -> StoreResult<u32> {
        if height == 0 {
            return Ok(0);
        }
        for h in (0..height).rev() {
            let boundary = self.heights.read(h)?;
            if boundary != u64::MAX {
                return Ok(boundary as u32);
            }
        }
        Ok(0)
    }

    /// Splices out every row added at or after `from_height`: walks each bucket chain dropping
    /// any node whose index is past the boundary (rows are allocated in height order, so these
    /// are exactly the rows belonging to `>= from_height`), then truncates the row allocator.
    pub fn unlink(&mut self, from_height: u32) -> StoreResult<()> {
        let boundary = self.row_boundary_for(from_height)?;
        let remainder_len = self.remainder_len();
        for bucket in 0..self.buckets.len() {
            let mut head = self.buckets.read(bucket)?;
            while head != u64::MAX && head as u32 >= boundary {
                let rec = self.rows.get(head as u32)?;
                head = u64::from_le_bytes(rec[remainder_len..remainder_len + NEXT_WIDTH].try_into().unwrap());
            }
            self.buckets.write(bucket, head)?;
        }
        self.rows.truncate(boundary)?;
        for h in from_height..self.heights.len() {
            self.heights.write(h, u64::MAX)?;
        }
        Ok(())
    }

    /// `prefix` and `prefix_bit_len` are shard-local (shard-selecting bits already stripped).
    pub fn scan(
        &self,
        prefix: &[u8],
        prefix_bit_len: usize,
        from_height: u32,
        mut visitor: impl FnMut(&[u8]),
    ) -> StoreResult<()> {
        let bucket_bits = self.control.bucket_bitsize as usize;
        let (lo, hi) = if prefix_bit_len >= bucket_bits {
            let b = read_bits(prefix, 0, bucket_bits) as u32;
            (b, b + 1)
        } else {
            let shift = bucket_bits - prefix_bit_len;
            let base = (read_bits(prefix, 0, prefix_bit_len) as u32) << shift;
            (base, base + (1u32 << shift))
        };
        let remainder_len = self.remainder_len();
        let bucket_bytes = bucket_bits / 8;
        let remainder_prefix = prefix.get(bucket_bytes..).unwrap_or(&[]);
        let remainder_prefix_bits = prefix_bit_len.saturating_sub(bucket_bits);

        for bucket in lo..hi.min(self.buckets.len()) {
            let mut cur = self.buckets.read(bucket)?;
            while cur != u64::MAX {
                let idx = cur as u32;
                let rec = self.rows.get(idx)?;
                let remainder = &rec[..remainder_len];
                let height_off = remainder_len + NEXT_WIDTH;
                let height = u32::from_le_bytes(rec[height_off..height_off + HEIGHT_WIDTH].try_into().unwrap());
                if height >= from_height && bits_match(remainder, remainder_prefix, remainder_prefix_bits) {
                    visitor(&rec[height_off + HEIGHT_WIDTH..]);
                }
                cur = u64::from_le_bytes(rec[remainder_len..remainder_len + NEXT_WIDTH].try_into().unwrap());
            }
        }
        Ok(())
    }
}

fn pad_or_truncate(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let copy_len = bytes.len().min(len);
    out[..copy_len].copy_from_slice(&bytes[..copy_len]);
    out
}

/// Selects shards by the top `sharded_bitsize` bits of a full scan key, lazily holding whichever
/// shard files have been opened. Not itself named as an operation in spec.md's HSDB row, but
/// implied by "the top sharded_bitsize bits ... select a shard file".
pub struct HsdbRouter {
    sharded_bitsize: u32,
    shards: HashMap<u32, HsdbShard>,
}

impl HsdbRouter {
    pub fn new(sharded_bitsize: u32) -> Self {
        Self {
            sharded_bitsize,
            shards: HashMap::new(),
        }
    }

    fn shard_id(&self, key: &[u8]) -> u32 {
        read_bits(key, 0, self.sharded_bitsize as usize) as u32
    }

    pub fn open_shard(&mut self, id: u32, shard: HsdbShard) {
        self.shards.insert(id, shard);
    }

    pub fn is_open(&self, id: u32) -> bool {
        self.shards.contains_key(&id)
    }

    pub fn add(&mut self, key: &[u8], height: u32, value: &[u8]) -> StoreResult<()> {
        let id = self.shard_id(key);
        let shard_bytes = self.sharded_bitsize as usize / 8;
        let shard = self.shards.get_mut(&id).ok_or_else(|| {
            error!(shard_id = id, "hsdb shard is not open");
            StoreError::Corruption(format!("hsdb shard {id} is not open"))
        })?;
        shard.add(&key[shard_bytes..], height, value);
        Ok(())
    }

    pub fn sync(&mut self, height: u32) -> StoreResult<()> {
        for shard in self.shards.values_mut() {
            shard.sync(height)?;
        }
        Ok(())
    }

    pub fn unlink(&mut self, from_height: u32) -> StoreResult<()> {
        for shard in self.shards.values_mut() {
            shard.unlink(from_height)?;
        }
        Ok(())
    }

    pub fn scan(
        &self,
        key_prefix: &[u8],
        prefix_bit_len: usize,
        from_height: u32,
        mut visitor: impl FnMut(&[u8]),
    ) -> StoreResult<()> {
        let shard_bits = self.sharded_bitsize as usize;
        if prefix_bit_len >= shard_bits {
            let id = read_bits(key_prefix, 0, shard_bits) as u32;
            if let Some(shard) = self.shards.get(&id) {
                let shard_bytes = shard_bits / 8;
                shard.scan(
                    key_prefix.get(shard_bytes..).unwrap_or(&[]),
                    prefix_bit_len - shard_bits,
                    from_height,
                    visitor,
                )?;
            }
            return Ok(());
        }
        for (&id, shard) in &self.shards {
            if u32_bits_match(id, shard_bits, key_prefix, prefix_bit_len) {
                shard.scan(&[], 0, from_height, &mut visitor)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::mmfile::Mmfile;

    fn shard(dir: &tempfile::TempDir, tag: &str) -> HsdbShard {
        let control = HsdbControlBlock {
            version: 1,
            shard_max_entries: 1 << 16,
            total_key_size: 2,
            sharded_bitsize: 8,
            bucket_bitsize: 8,
            row_value_size: 4,
        };
        let heights = DiskArray64::new(
            Mmfile::open(dir.path().join(format!("{tag}_heights.dat"))).unwrap(),
            0,
        );
        let buckets = DiskArray64::new(
            Mmfile::open(dir.path().join(format!("{tag}_buckets.dat"))).unwrap(),
            0,
        );
        let control_copy = control;
        let row_size = (control_copy.total_key_size as usize)
            - (control_copy.sharded_bitsize as usize + control_copy.bucket_bitsize as usize) / 8
            + NEXT_WIDTH
            + HEIGHT_WIDTH
            + control_copy.row_value_size as usize;
        let rows = RecordAllocator::new(
            Mmfile::open(dir.path().join(format!("{tag}_rows.dat"))).unwrap(),
            0,
            row_size,
        );
        HsdbShard::new(control, heights, buckets, rows)
    }

    #[test]
    fn scan_after_sync_returns_matching_rows_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = shard(&dir, "a");
        s.create(8).unwrap();

        // shard-local key is a single remainder byte (total_key_size=2, one byte consumed by
        // the (unused in this unit test) shard selector, one by the bucket).
        s.add(&[0b0000_0001], 0, &100u32.to_le_bytes());
        s.add(&[0b0000_0001], 0, &200u32.to_le_bytes());
        s.sync(0).unwrap();

        let mut seen = Vec::new();
        s.scan(&[0b0000_0001], 8, 0, |value| {
            seen.push(u32::from_le_bytes(value[..4].try_into().unwrap()));
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&100));
        assert!(seen.contains(&200));
    }

    #[test]
    fn unlink_removes_rows_from_the_target_height_onward() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = shard(&dir, "b");
        s.create(8).unwrap();

        s.add(&[7], 0, &1u32.to_le_bytes());
        s.sync(0).unwrap();
        s.add(&[7], 1, &2u32.to_le_bytes());
        s.sync(1).unwrap();

        s.unlink(1).unwrap();

        let mut seen = Vec::new();
        s.scan(&[7], 8, 0, |value| {
            seen.push(u32::from_le_bytes(value[..4].try_into().unwrap()));
        })
        .unwrap();
        assert_eq!(seen, vec![1]);
    }
}
