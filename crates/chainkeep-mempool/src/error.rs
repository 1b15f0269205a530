//! Pool-local error type, composing the shared [`chainkeep_common::CoreError`] kinds the same
//! way `chainkeep-store`'s `StoreError`/`OrganizeError` do.

use chainkeep_common::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("transaction already in the pool: {0}")]
    AlreadyPresent(bitcoin::Txid),

    #[error("byte or sigop budget exceeded")]
    BudgetExceeded,
}

pub type PoolResult<T> = Result<T, PoolError>;
