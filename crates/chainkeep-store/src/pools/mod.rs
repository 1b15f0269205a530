//! In-memory candidate trees for blocks and headers awaiting confirmation: `OrphanPool` (blocks),
//! `HeaderPool`/`HeaderBranch` (headers), and the shared `Fork` sequence type both build on.
//!
//! spec.md's source carried both `orphan_pool` and `orphans_pool`, and both `fork` and
//! `header_branch`, as if mid-migration between two names for the same thing. This unifies them:
//! one `Fork<T>` generic over what it chains (blocks for the block organizer, `HeaderEntry` for
//! the header pool), one `OrphanPool<T>`.

pub mod block_graph;
pub mod fork;
pub mod header_pool;
pub mod orphan_pool;

pub use block_graph::BlockGraph;
pub use fork::{Fork, ForkItem};
pub use header_pool::{HeaderBranch, HeaderEntry, HeaderPool};
pub use orphan_pool::OrphanPool;
