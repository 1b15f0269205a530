//! Header, block and transaction organizers: the layer above `populate`/`validate` that owns
//! the writer lock on `ChainDb`, fans script checks out across the dispatcher, resolves
//! competing forks, and publishes accepted work to subscribers.

pub mod block_organizer;
pub mod dispatcher;
pub mod header_organizer;
pub mod prioritized_mutex;
pub mod transaction_organizer;

pub use block_organizer::BlockOrganizer;
pub use dispatcher::Dispatcher;
pub use header_organizer::HeaderOrganizer;
pub use prioritized_mutex::PrioritizedRwLock;
pub use transaction_organizer::{MempoolSink, TransactionOrganizer};

use chainkeep_common::CoreError;
use thiserror::Error;

use crate::error::StoreError;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rejected: {0}")]
    Rejected(String),

    /// Accepted into a competing fork that hasn't out-worked the indexed chain yet. Not an
    /// error the caller needs to retry; the organizer will promote the fork on its own once a
    /// later block tips the balance, or drop it once `reorganization_limit` is exceeded.
    #[error("buffered in a competing fork, not yet connected (would land at height {height})")]
    Deferred { height: u32 },
}

pub type OrganizeResult<T> = Result<T, OrganizeError>;
