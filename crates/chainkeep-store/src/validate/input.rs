//! The single boundary between chainkeep and a consensus script-verification library. Chainkeep
//! never implements a script interpreter; `connect_block`/`connect_transaction` call through
//! `ScriptVerifier` once per input, fanned out across the dispatcher's worker pool.

use bitcoin::{Transaction, TxOut};
use chainkeep_common::CoreError;

pub trait ScriptVerifier: Send + Sync {
    fn verify_script(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TxOut,
        use_libconsensus: bool,
    ) -> Result<(), CoreError>;
}

/// Always accepts. Used by callers that validate structure only, and by tests that don't want
/// to pull in `bitcoinconsensus`.
pub struct NullVerifier;

impl ScriptVerifier for NullVerifier {
    fn verify_script(
        &self,
        _tx: &Transaction,
        _input_index: usize,
        _prevout: &TxOut,
        _use_libconsensus: bool,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Delegates to the `bitcoinconsensus` crate, the same optional dependency floresta-chain's
/// `bitcoinconsensus` feature pulls in.
#[cfg(feature = "bitcoinconsensus")]
pub struct BitcoinConsensusVerifier;

#[cfg(feature = "bitcoinconsensus")]
impl ScriptVerifier for BitcoinConsensusVerifier {
    fn verify_script(
        &self,
        tx: &Transaction,
        input_index: usize,
        prevout: &TxOut,
        use_libconsensus: bool,
    ) -> Result<(), CoreError> {
        if !use_libconsensus {
            return Ok(());
        }
        let tx_bytes = bitcoin::consensus::serialize(tx);
        bitcoinconsensus::verify(
            prevout.script_pubkey.as_bytes(),
            prevout.value.to_sat(),
            &tx_bytes,
            input_index,
        )
        .map_err(|e| CoreError::Consensus(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn null_verifier_always_accepts() {
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        let prevout = TxOut {
            value: bitcoin::Amount::ZERO,
            script_pubkey: bitcoin::ScriptBuf::new(),
        };
        assert!(NullVerifier.verify_script(&tx, 0, &prevout, true).is_ok());
    }
}
