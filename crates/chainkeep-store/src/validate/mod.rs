//! Context-free and context-dependent validation for headers, blocks and transactions. Script
//! verification is the single boundary to a consensus library (`ScriptVerifier`); nothing in
//! this module implements a script interpreter itself.

pub mod block;
pub mod header;
pub mod input;
pub mod transaction;

pub use block::validate_block;
pub use header::{validate_header, HeaderContext};
pub use input::{NullVerifier, ScriptVerifier};
pub use transaction::validate_transaction;

use chainkeep_common::CoreError;
use thiserror::Error;

#[cfg(feature = "bitcoinconsensus")]
pub use input::BitcoinConsensusVerifier;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("invalid header: {0}")]
    Header(String),

    #[error("invalid block: {0}")]
    Block(String),

    #[error("invalid transaction: {0}")]
    Transaction(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;
