//! Growable memory-mapped file. Built on `memmap2::MmapMut` over a `std::fs::File`, the same
//! pairing Floresta's `flat-chainstore` feature pulls in; the original's raw `mmap`/`mremap`
//! handling is replaced with unmap-and-remap-on-grow, which is what `memmap2` gives us portably.
//!
//! Every allocator built on top of an `Mmfile` funnels its growth through `reserve`, which is
//! only ever called from a method that takes `&mut self`. Read accessors only ever take `&self`
//! and hand back a slice borrowed from it, so the borrow checker itself enforces the invariant
//! the original enforced by convention: a view into the map cannot be outstanding while the map
//! is resized, because resizing requires exclusive access to the `Mmfile`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{StoreError, StoreResult};

/// Growth factor applied when the requested size exceeds the current map: the map grows to
/// `max(requested, current * growth_rate)`, amortizing the cost of repeated small appends.
pub const DEFAULT_GROWTH_RATE: f64 = 1.5;

pub struct Mmfile {
    file: File,
    map: MmapMut,
    path: PathBuf,
}

impl Mmfile {
    /// Opens (creating if absent) the file at `path` and maps it. A brand new file is given a
    /// single byte so `memmap2` has something non-empty to map.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        if file.metadata()?.len() == 0 {
            file.set_len(1)?;
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { file, map, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.map[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    /// Grows the map to exactly `new_size`, if it's currently smaller. No-op otherwise.
    pub fn resize(&mut self, new_size: usize) -> StoreResult<()> {
        if new_size <= self.size() {
            return Ok(());
        }
        self.file.set_len(new_size as u64)?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Ensures the map is at least `needed` bytes, growing by `growth_rate` (never below
    /// `needed`) rather than exactly to `needed`, so repeated small reservations don't each
    /// trigger their own unmap/remap.
    pub fn reserve(&mut self, needed: usize, growth_rate: f64) -> StoreResult<()> {
        if needed <= self.size() {
            return Ok(());
        }
        let grown = ((self.size() as f64) * growth_rate).ceil() as usize;
        self.resize(needed.max(grown).max(1))
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.map.flush().map_err(StoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_grows_and_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut mmfile = Mmfile::open(dir.path().join("test.dat")).unwrap();
        mmfile.reserve(16, DEFAULT_GROWTH_RATE).unwrap();
        mmfile.data_mut()[0..4].copy_from_slice(&42u32.to_le_bytes());
        mmfile.reserve(1024, DEFAULT_GROWTH_RATE).unwrap();
        assert!(mmfile.size() >= 1024);
        assert_eq!(u32::from_le_bytes(mmfile.data()[0..4].try_into().unwrap()), 42);
    }

    #[test]
    fn reserve_is_noop_when_already_big_enough() {
        let dir = tempfile::tempdir().unwrap();
        let mut mmfile = Mmfile::open(dir.path().join("test.dat")).unwrap();
        mmfile.reserve(4096, DEFAULT_GROWTH_RATE).unwrap();
        let size_after_first = mmfile.size();
        mmfile.reserve(16, DEFAULT_GROWTH_RATE).unwrap();
        assert_eq!(mmfile.size(), size_after_first);
    }
}
