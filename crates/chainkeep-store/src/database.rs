//! `ChainDb`: composes every domain table behind a single `push`/`pop`/`synchronize` surface,
//! in the fixed dependency order spec.md's invariant 3 requires (transactions, then spends, then
//! history, then stealth, then blocks/block-index on push; the exact reverse on pop).

use std::path::{Path, PathBuf};

use bitcoin::block::Header as BlockHeader;
use bitcoin::hashes::{hash160, Hash as _};
use bitcoin::{Block, OutPoint, ScriptBuf, Transaction, Txid};

use chainkeep_common::settings::DatabaseSettings;

use crate::error::StoreResult;
use crate::key::{Hash20, Hash32, OutPointKey};
use crate::primitives::disk_array::{DiskArray32, DiskArray64};
use crate::primitives::htdb::{HtdbRecord, HtdbSlab};
use crate::primitives::linked::LinkedRecords;
use crate::primitives::mmfile::Mmfile;
use crate::primitives::multimap::MultimapRecords;
use crate::primitives::record::RecordAllocator;
use crate::primitives::slab::SlabAllocator;
use crate::tables::history::{HistoryKind, HistoryRow, HistoryTable};
use crate::tables::spend::{SpendTable, SpenderRef};
use crate::tables::stealth::{StealthRow, StealthTable};
use crate::tables::{BlockTable, TransactionTable};

/// Address-indexing key for the history and stealth tables: `hash160` of the output script,
/// the same "script hash, not address" approach libbitcoin-blockchain's history indexer uses so
/// the table doesn't need to know about any particular address encoding.
fn script_key(script: &ScriptBuf) -> Hash20 {
    Hash20(*hash160::Hash::hash(script.as_bytes()).as_byte_array())
}

/// A stealth payment is carried as an `OP_RETURN <version:1><ephemeral pubkey:33>` output
/// immediately followed by the spendable output it annotates. `None` if `tx` carries no such
/// marker.
fn extract_stealth_row(tx: &Transaction, height: u32) -> Option<StealthRow> {
    let outputs = &tx.output;
    for (i, out) in outputs.iter().enumerate() {
        if !out.script_pubkey.is_op_return() {
            continue;
        }
        let payload = &out.script_pubkey.as_bytes()[2..];
        if payload.len() < 1 + 33 {
            continue;
        }
        let Some(payment) = outputs.get(i + 1) else {
            continue;
        };
        let mut ephemeral_key = [0u8; 33];
        ephemeral_key.copy_from_slice(&payload[1..34]);
        let prefix = u32::from_be_bytes(payload[..4.min(payload.len())].try_into().unwrap_or([0; 4]));
        return Some(StealthRow {
            prefix,
            ephemeral_key,
            address_hash: script_key(&payment.script_pubkey),
            tx_hash: Hash32::from(tx.compute_txid()),
        });
    }
    None
}

pub struct ChainDb {
    transactions: TransactionTable,
    spends: SpendTable,
    history: HistoryTable,
    stealth: StealthTable,
    blocks: BlockTable,
}

impl ChainDb {
    fn path(dir: &Path, name: &str) -> PathBuf {
        dir.join(name)
    }

    /// Opens (without creating) every table's backing files under `settings.directory`.
    pub fn open(settings: &DatabaseSettings) -> StoreResult<Self> {
        let dir = Path::new(&settings.directory);
        let growth = settings.file_growth_rate;

        let tx_header = DiskArray64::new(Mmfile::open(Self::path(dir, "tx_hdr.dat"))?, 0)
            .with_growth_rate(growth);
        let tx_alloc =
            SlabAllocator::new(Mmfile::open(Self::path(dir, "tx_rows.dat"))?, 0).with_growth_rate(growth);
        let transactions = TransactionTable::new(HtdbSlab::new(tx_header, tx_alloc));

        let spend_header = DiskArray32::new(Mmfile::open(Self::path(dir, "spend_hdr.dat"))?, 0)
            .with_growth_rate(growth);
        let spend_value_size = 32 + 4;
        let spend_alloc = RecordAllocator::new(
            Mmfile::open(Self::path(dir, "spend_rows.dat"))?,
            0,
            HtdbRecord::<OutPointKey>::record_size(OutPointKey::SIZE, spend_value_size),
        )
        .with_growth_rate(growth);
        let spends = SpendTable::new(HtdbRecord::new(spend_header, spend_alloc, spend_value_size));

        let history_header = DiskArray32::new(Mmfile::open(Self::path(dir, "history_hdr.dat"))?, 0)
            .with_growth_rate(growth);
        let history_heads_alloc = RecordAllocator::new(
            Mmfile::open(Self::path(dir, "history_heads.dat"))?,
            0,
            HtdbRecord::<Hash20>::record_size(Hash20::SIZE, 4),
        )
        .with_growth_rate(growth);
        let history_heads = HtdbRecord::new(history_header, history_heads_alloc, 4);
        let row_len = HistoryTable::row_payload_size();
        let history_rows_alloc = RecordAllocator::new(
            Mmfile::open(Self::path(dir, "history_rows.dat"))?,
            0,
            4 + row_len,
        )
        .with_growth_rate(growth);
        let history_chain = LinkedRecords::new(history_rows_alloc, row_len);
        let history = HistoryTable::new(MultimapRecords::new(history_heads, history_chain));

        let stealth_rows = RecordAllocator::new(
            Mmfile::open(Self::path(dir, "stealth_rows.dat"))?,
            0,
            crate::tables::stealth::STEALTH_ROW_LEN,
        )
        .with_growth_rate(growth);
        let stealth_checkpoints = RecordAllocator::new(
            Mmfile::open(Self::path(dir, "stealth_checkpoints.dat"))?,
            0,
            crate::tables::stealth::CHECKPOINT_RECORD_LEN,
        )
        .with_growth_rate(growth);
        let stealth = StealthTable::new(stealth_rows, stealth_checkpoints);

        let block_index = DiskArray64::new(Mmfile::open(Self::path(dir, "block_index.dat"))?, 0)
            .with_growth_rate(growth);
        let block_header = DiskArray64::new(Mmfile::open(Self::path(dir, "block_hdr.dat"))?, 0)
            .with_growth_rate(growth);
        let block_alloc = SlabAllocator::new(Mmfile::open(Self::path(dir, "block_rows.dat"))?, 0)
            .with_growth_rate(growth);
        let blocks = BlockTable::new(HtdbSlab::new(block_header, block_alloc), block_index);

        Ok(Self {
            transactions,
            spends,
            history,
            stealth,
            blocks,
        })
    }

    pub fn create(&mut self, settings: &DatabaseSettings) -> StoreResult<()> {
        self.transactions.create(settings.transaction_table_buckets as u32)?;
        self.spends.create(settings.spend_table_buckets)?;
        self.history.create(settings.history_table_buckets)?;
        self.stealth.create()?;
        self.blocks.create(settings.block_table_buckets as u32)?;
        self.synchronize()
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.transactions.start()?;
        self.spends.start()?;
        self.history.start()?;
        self.stealth.start()?;
        self.blocks.start()
    }

    /// Fixed sync order: transactions, spends, history, stealth, blocks/block-index. Matches the
    /// order `push` writes in, so a crash mid-sync never leaves a later table referencing a row
    /// an earlier table hasn't durably committed yet.
    pub fn synchronize(&mut self) -> StoreResult<()> {
        self.transactions.sync()?;
        self.spends.sync()?;
        self.history.sync()?;
        self.stealth.sync()?;
        self.blocks.sync()
    }

    pub fn top_height(&self) -> Option<u32> {
        self.blocks.top_height()
    }

    /// Stores a validated block at `height`: its transactions, the spend marks and history rows
    /// for every input/output, any stealth rows its outputs carry, and finally the block entry
    /// and block-index pointer. Callers are expected to have already validated the block; this
    /// only persists it.
    pub fn push(&mut self, block: &Block, height: u32) -> StoreResult<()> {
        let header: BlockHeader = block.header;
        let mut txids = Vec::with_capacity(block.txdata.len());

        for (index_in_block, tx) in block.txdata.iter().enumerate() {
            let txid = tx.compute_txid();
            txids.push(txid);
            self.transactions.store(tx, height, index_in_block as u32)?;

            let is_coinbase = index_in_block == 0;
            if !is_coinbase {
                for (input_index, input) in tx.input.iter().enumerate() {
                    self.spends.mark_spent(
                        input.previous_output,
                        SpenderRef {
                            txid,
                            input_index: input_index as u32,
                        },
                    )?;
                    if let Some(prev) = self.transactions.fetch(input.previous_output.txid)? {
                        if let Some(spent_out) = prev
                            .transaction
                            .output
                            .get(input.previous_output.vout as usize)
                        {
                            let key = script_key(&spent_out.script_pubkey);
                            self.history.add_row(
                                key,
                                HistoryRow {
                                    kind: HistoryKind::Spend,
                                    point: input.previous_output,
                                    height,
                                    value_or_spender: spent_out.value.to_sat(),
                                },
                            )?;
                        }
                    }
                }
            }

            for (vout, out) in tx.output.iter().enumerate() {
                let key = script_key(&out.script_pubkey);
                self.history.add_row(
                    key,
                    HistoryRow {
                        kind: HistoryKind::Output,
                        point: OutPoint::new(txid, vout as u32),
                        height,
                        value_or_spender: out.value.to_sat(),
                    },
                )?;
            }

            if let Some(row) = extract_stealth_row(tx, height) {
                self.stealth.add_row(row)?;
            }
        }
        self.stealth.checkpoint(height)?;

        self.blocks.store(&header, height, &txids)
    }

    /// Reverts every block above `to_height`, undoing each table's `push` contribution in the
    /// opposite order `synchronize` commits them, then trims the block-index itself.
    pub fn pop(&mut self, to_height: u32) -> StoreResult<()> {
        let Some(top) = self.top_height() else {
            return Ok(());
        };
        for height in (to_height + 1..=top).rev() {
            let Some(record) = self.blocks.fetch_by_height(height)? else {
                continue;
            };
            for txid in &record.txids {
                let Some(tx_record) = self.transactions.fetch(*txid)? else {
                    continue;
                };
                let tx = &tx_record.transaction;
                let is_coinbase = tx_record.index_in_block == 0;

                if !is_coinbase {
                    for input in &tx.input {
                        self.spends.unmark_spent(input.previous_output)?;
                        if let Some(prev) = self.transactions.fetch(input.previous_output.txid)? {
                            if let Some(spent_out) = prev
                                .transaction
                                .output
                                .get(input.previous_output.vout as usize)
                            {
                                let key = script_key(&spent_out.script_pubkey);
                                self.history.pop_above(&key, to_height)?;
                            }
                        }
                    }
                }

                for out in &tx.output {
                    let key = script_key(&out.script_pubkey);
                    self.history.pop_above(&key, to_height)?;
                }

                self.transactions.remove(*txid)?;
            }
        }

        self.stealth.pop_above(to_height)?;
        self.blocks.pop_above(to_height + 1)
    }

    pub fn fetch_block(&self, height: u32) -> StoreResult<Option<crate::tables::block::BlockRecord>> {
        self.blocks.fetch_by_height(height)
    }

    pub fn fetch_block_by_hash(
        &self,
        hash: bitcoin::BlockHash,
    ) -> StoreResult<Option<crate::tables::block::BlockRecord>> {
        self.blocks.fetch_by_hash(hash)
    }

    pub fn fetch_transaction(&self, txid: Txid) -> StoreResult<Option<crate::tables::transaction::TransactionRecord>> {
        self.transactions.fetch(txid)
    }

    pub fn history_for_script(&self, script: &ScriptBuf) -> StoreResult<Vec<HistoryRow>> {
        self.history.rows(&script_key(script))
    }

    pub fn is_spent(&self, outpoint: OutPoint) -> StoreResult<bool> {
        self.spends.is_spent(outpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    fn settings(dir: &tempfile::TempDir) -> DatabaseSettings {
        DatabaseSettings {
            directory: dir.path().to_string_lossy().into_owned(),
            history_start_height: 0,
            stealth_start_height: 0,
            block_table_buckets: 16,
            transaction_table_buckets: 16,
            spend_table_buckets: 16,
            history_table_buckets: 16,
            file_growth_rate: 1.5,
        }
    }

    #[test]
    fn push_then_pop_returns_to_empty_chain() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let mut db = ChainDb::open(&settings).unwrap();
        db.create(&settings).unwrap();

        let block = genesis_block(Network::Bitcoin);
        db.push(&block, 0).unwrap();
        db.synchronize().unwrap();
        assert_eq!(db.top_height(), Some(0));

        let fetched = db.fetch_block(0).unwrap().unwrap();
        assert_eq!(fetched.txids.len(), block.txdata.len());

        // Popping back to the current top is a no-op: nothing above height 0 exists to revert.
        db.pop(0).unwrap();
        db.synchronize().unwrap();
        let coinbase_txid = block.txdata[0].compute_txid();
        assert!(db.fetch_transaction(coinbase_txid).unwrap().is_some());
        assert_eq!(db.top_height(), Some(0));
    }
}
