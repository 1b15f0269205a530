//! Store-local error type. Composes the shared [`chainkeep_common::CoreError`] kinds the way
//! Floresta's `BlockchainError` composes its sub-errors with `#[from]`.

use chainkeep_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("on-disk structure is corrupt: {0}")]
    Corruption(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Core(e) => e,
            StoreError::Corruption(msg) => CoreError::Corruption(msg),
            StoreError::Io(e) => CoreError::Disk(e),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
