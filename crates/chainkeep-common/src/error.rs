//! The shared error kinds described in the design's error-handling section. Every
//! crate-specific error enum (`StoreError`, `ValidationError`, `OrganizeError`, `PoolError`)
//! composes these through `#[from]`, the same way Floresta's `BlockchainError` composes
//! `BlockValidationErrors` and `TxValidationErrors`.

use bitcoin::BlockHash;
use bitcoin::OutPoint;
use thiserror::Error;

/// Result codes that cross crate boundaries. A single result code is threaded through the
/// populate/validate/organize chain; nothing here retries on its own.
#[derive(Debug, Error)]
pub enum CoreError {
    /// mmap, truncate or open failed. Fatal to the current operation.
    #[error("disk I/O failure: {0}")]
    Disk(#[from] std::io::Error),

    /// An on-disk counter disagrees with file length by more than one record, or a chain
    /// walk hit a cycle or a missing sentinel. Fatal to the current store.
    #[error("on-disk structure is corrupt: {0}")]
    Corruption(String),

    /// A uniqueness constraint was violated (block hash at an existing height, tx hash
    /// already confirmed).
    #[error("duplicate entry: {0}")]
    Duplicate(String),

    /// A transaction input references an outpoint this store and the candidate branch both
    /// fail to resolve.
    #[error("missing previous output: {0}")]
    MissingPrevout(OutPoint),

    /// A header or block references a parent this store doesn't have.
    #[error("missing ancestor: {0}")]
    MissingAncestor(BlockHash),

    /// A block's hash at a checkpoint height doesn't match the configured checkpoint.
    #[error("checkpoint mismatch at height {height}: expected {expected}, found {found}")]
    CheckpointMismatch {
        height: u32,
        expected: BlockHash,
        found: BlockHash,
    },

    /// Script verification or any other context-dependent consensus rule failed.
    #[error("consensus rule violated: {0}")]
    Consensus(String),

    /// The organizer was asked to stop mid-operation.
    #[error("organizer stopped")]
    ServiceStopped,

    /// A code path that is intentionally unimplemented (mirrors the source's own
    /// `not_implemented` stubs, resolved elsewhere per DESIGN.md).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;
