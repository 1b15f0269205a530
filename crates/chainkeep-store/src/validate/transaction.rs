//! `validate_transaction`: standalone (`check`) → context (`accept`) → scripts (`connect`), the
//! same three-stage shape `validate_block` uses, applied to a single mempool-bound transaction.

use bitcoin::{Transaction, TxOut};
use chainkeep_common::Settings;

use super::block::PrevoutLookup;
use super::input::ScriptVerifier;
use super::{ValidationError, ValidationResult};

/// Structural checks requiring no chain context: non-empty, not a second coinbase, outputs
/// above the dust floor.
pub fn check(tx: &Transaction, settings: &Settings) -> ValidationResult<()> {
    if tx.input.is_empty() || tx.output.is_empty() {
        return Err(ValidationError::Transaction("empty input or output list".into()));
    }
    if tx.is_coinbase() {
        return Err(ValidationError::Transaction("coinbase cannot enter the pool".into()));
    }
    for out in &tx.output {
        if out.value.to_sat() < settings.minimum_output_satoshis && !out.script_pubkey.is_op_return() {
            return Err(ValidationError::Transaction(format!(
                "output below minimum of {} satoshis",
                settings.minimum_output_satoshis
            )));
        }
    }
    let mut seen = std::collections::HashSet::with_capacity(tx.input.len());
    for input in &tx.input {
        if !seen.insert(input.previous_output) {
            return Err(ValidationError::Transaction("duplicate input outpoint".into()));
        }
    }
    Ok(())
}

/// Context-dependent checks: every prevout resolves (confirmed or in-pool) and isn't already
/// spent, and the transaction isn't already confirmed.
pub fn accept(
    tx: &Transaction,
    prevouts: &impl PrevoutLookup,
    already_confirmed: bool,
) -> ValidationResult<Vec<TxOut>> {
    if already_confirmed {
        return Err(ValidationError::Transaction("already confirmed".into()));
    }
    tx.input
        .iter()
        .map(|input| {
            prevouts
                .prevout(input.previous_output)
                .ok_or_else(|| ValidationError::Transaction(format!("missing prevout {}", input.previous_output)))
        })
        .collect()
}

/// Script verification, one call per input.
pub fn connect(
    tx: &Transaction,
    resolved_prevouts: &[TxOut],
    verifier: &dyn ScriptVerifier,
    settings: &Settings,
) -> ValidationResult<()> {
    for (index, prevout) in resolved_prevouts.iter().enumerate() {
        verifier
            .verify_script(tx, index, prevout, settings.use_libconsensus)
            .map_err(|e| ValidationError::Transaction(format!("script check failed: {e}")))?;
    }
    Ok(())
}

pub fn validate_transaction(
    tx: &Transaction,
    prevouts: &impl PrevoutLookup,
    already_confirmed: bool,
    verifier: &dyn ScriptVerifier,
    settings: &Settings,
) -> ValidationResult<()> {
    check(tx, settings)?;
    let resolved = accept(tx, prevouts, already_confirmed)?;
    connect(tx, &resolved, verifier, settings)
}
