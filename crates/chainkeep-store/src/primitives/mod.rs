//! The allocator and hash-table primitives every domain table is built from. Ordered
//! bottom-up: `mmfile` is the only thing that touches a file descriptor directly; everything
//! else is built in terms of it or of another primitive in this module.

pub mod disk_array;
pub mod htdb;
pub mod linked;
pub mod mmfile;
pub mod multimap;
pub mod record;
pub mod slab;

pub use disk_array::{DiskArray32, DiskArray64, DiskValue};
pub use htdb::{HtdbRecord, HtdbSlab};
pub use linked::LinkedRecords;
pub use mmfile::Mmfile;
pub use multimap::MultimapRecords;
pub use record::RecordAllocator;
pub use slab::SlabAllocator;
