//! Memory-mapped persistent storage engine and block-organization core for a UTXO-model full
//! node. `primitives` holds the on-disk building blocks (growable mmap, record/slab allocators,
//! disk arrays, hash tables, linked/multimap chains); `tables` composes them into the domain
//! tables (blocks, transactions, spends, history, stealth, the sharded history-scan index);
//! `database` ties every table together behind `ChainDb`; `pools` holds the orphan/header
//! staging areas consulted before a block or header is durably stored; `populate` and `validate`
//! prepare and check blocks/headers/transactions before they reach `ChainDb`; `organize`
//! sequences that work behind a priority-aware lock.

pub mod database;
pub mod error;
pub mod key;
pub mod organize;
pub mod pools;
pub mod populate;
pub mod primitives;
pub mod tables;
pub mod validate;

pub use database::ChainDb;
pub use error::{StoreError, StoreResult};
