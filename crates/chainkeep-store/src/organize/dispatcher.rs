//! `Dispatcher`: fans a block's input script checks out across up to `Settings::cores` threads.
//! Each call blocks until every input is checked (or the first failure short-circuits the rest),
//! so the organizer's validate step stays synchronous from its own point of view.

use std::sync::atomic::{AtomicBool, Ordering};

use bitcoin::{Transaction, TxOut};
use chainkeep_common::CoreError;

use crate::validate::input::ScriptVerifier;

pub struct Dispatcher {
    workers: usize,
}

impl Dispatcher {
    pub fn new(workers: u32) -> Self {
        Self { workers: workers.max(1) as usize }
    }

    /// Verifies every `(transaction, input_index, prevout)` triple, split into `self.workers`
    /// contiguous chunks run on their own threads. Stops issuing further checks in a chunk once
    /// that chunk sees a failure, but other chunks still in flight aren't cancelled early — the
    /// first error observed is what's returned.
    pub fn verify_inputs(
        &self,
        checks: &[(&Transaction, usize, &TxOut)],
        verifier: &dyn ScriptVerifier,
        use_libconsensus: bool,
    ) -> Result<(), CoreError> {
        if checks.is_empty() {
            return Ok(());
        }
        let chunk_size = checks.len().div_ceil(self.workers).max(1);
        let failed = AtomicBool::new(false);

        let result = std::thread::scope(|scope| {
            let handles: Vec<_> = checks
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(|| {
                        for &(tx, index, prevout) in chunk {
                            if failed.load(Ordering::Relaxed) {
                                return Ok(());
                            }
                            if let Err(e) = verifier.verify_script(tx, index, prevout, use_libconsensus) {
                                failed.store(true, Ordering::Relaxed);
                                return Err(e);
                            }
                        }
                        Ok(())
                    })
                })
                .collect();

            let mut first_error = None;
            for handle in handles {
                if let Err(e) = handle.join().unwrap_or(Err(CoreError::ServiceStopped)) {
                    first_error.get_or_insert(e);
                }
            }
            first_error
        });

        match result {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::input::NullVerifier;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn empty_checks_is_a_noop() {
        let dispatcher = Dispatcher::new(4);
        assert!(dispatcher.verify_inputs(&[], &NullVerifier, false).is_ok());
    }

    #[test]
    fn null_verifier_passes_every_chunk() {
        let dispatcher = Dispatcher::new(2);
        let tx = genesis_block(Network::Bitcoin).txdata[0].clone();
        let prevout = TxOut { value: bitcoin::Amount::ZERO, script_pubkey: bitcoin::ScriptBuf::new() };
        let checks: Vec<_> = (0..5).map(|_| (&tx, 0, &prevout)).collect();
        assert!(dispatcher.verify_inputs(&checks, &NullVerifier, false).is_ok());
    }
}
