//! Domain tables: each wraps one or more primitives (§`primitives`) around a concrete on-disk
//! record format for one piece of blockchain state.

pub mod block;
pub mod history;
pub mod hsdb;
pub mod spend;
pub mod stealth;
pub mod transaction;

pub use block::BlockTable;
pub use history::HistoryTable;
pub use hsdb::{HsdbControlBlock, HsdbRouter, HsdbShard};
pub use spend::SpendTable;
pub use stealth::StealthTable;
pub use transaction::TransactionTable;
