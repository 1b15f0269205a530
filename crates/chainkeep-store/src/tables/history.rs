//! History table: a `multimap_records<Hash20>` keyed by an address (script-hash/pubkey-hash)
//! prefix. Each row records either a received output or a spend touching that address.

use bitcoin::{OutPoint, Txid};
use tracing::error;

use crate::error::{StoreError, StoreResult};
use crate::key::Hash20;
use crate::primitives::multimap::MultimapRecords;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Output,
    Spend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRow {
    pub kind: HistoryKind,
    pub point: OutPoint,
    pub height: u32,
    /// Output value in satoshis for `Output` rows, or the spending txid's input index for
    /// `Spend` rows (packed the way the source packs "value-or-spender" into one field).
    pub value_or_spender: u64,
}

const KIND_LEN: usize = 1;
const TXID_LEN: usize = 32;
const VOUT_LEN: usize = 4;
const HEIGHT_LEN: usize = 4;
const AMOUNT_LEN: usize = 8;
const ROW_LEN: usize = KIND_LEN + TXID_LEN + VOUT_LEN + HEIGHT_LEN + AMOUNT_LEN;

pub struct HistoryTable {
    multimap: MultimapRecords<Hash20>,
}

impl HistoryTable {
    pub fn new(multimap: MultimapRecords<Hash20>) -> Self {
        Self { multimap }
    }

    pub fn row_payload_size() -> usize {
        ROW_LEN
    }

    pub fn create(&mut self, buckets: u32) -> StoreResult<()> {
        self.multimap.create(buckets)
    }

    pub fn start(&mut self) -> StoreResult<()> {
        self.multimap.start()
    }

    pub fn sync(&mut self) -> StoreResult<()> {
        self.multimap.sync()
    }

    pub fn add_row(&mut self, address_prefix: Hash20, row: HistoryRow) -> StoreResult<()> {
        self.multimap.add_row(address_prefix, |buf| encode_row(buf, &row))
    }

    pub fn delete_last_row(&mut self, address_prefix: &Hash20) -> StoreResult<()> {
        self.multimap.delete_last_row(address_prefix)
    }

    /// All rows for `address_prefix`, most recently added first.
    pub fn rows(&self, address_prefix: &Hash20) -> StoreResult<Vec<HistoryRow>> {
        self.multimap
            .chain_indices(address_prefix)?
            .into_iter()
            .map(|idx| decode_row(self.multimap.row(idx)?))
            .collect()
    }

    /// Drops every row above `height` for `address_prefix`, by repeatedly removing the newest
    /// row until the remaining head is at or below `height` (or the chain is empty). Used by
    /// `pop_above` (invariant 4).
    pub fn pop_above(&mut self, address_prefix: &Hash20, height: u32) -> StoreResult<()> {
        loop {
            let indices = self.multimap.chain_indices(address_prefix)?;
            let Some(&newest) = indices.first() else {
                break;
            };
            let row = decode_row(self.multimap.row(newest)?)?;
            if row.height <= height {
                break;
            }
            self.multimap.delete_last_row(address_prefix)?;
        }
        Ok(())
    }
}

fn encode_row(buf: &mut [u8], row: &HistoryRow) {
    buf[0] = match row.kind {
        HistoryKind::Output => 0,
        HistoryKind::Spend => 1,
    };
    buf[KIND_LEN..KIND_LEN + TXID_LEN].copy_from_slice(row.point.txid.as_ref());
    buf[KIND_LEN + TXID_LEN..KIND_LEN + TXID_LEN + VOUT_LEN]
        .copy_from_slice(&row.point.vout.to_le_bytes());
    let height_off = KIND_LEN + TXID_LEN + VOUT_LEN;
    buf[height_off..height_off + HEIGHT_LEN].copy_from_slice(&row.height.to_le_bytes());
    let amount_off = height_off + HEIGHT_LEN;
    buf[amount_off..amount_off + AMOUNT_LEN].copy_from_slice(&row.value_or_spender.to_le_bytes());
}

fn decode_row(buf: &[u8]) -> StoreResult<HistoryRow> {
    if buf.len() < ROW_LEN {
        error!(len = buf.len(), "history row too short");
        return Err(StoreError::Corruption("history row too short".into()));
    }
    use bitcoin::consensus::Decodable;
    let kind = match buf[0] {
        0 => HistoryKind::Output,
        1 => HistoryKind::Spend,
        other => {
            error!(kind = other, "bad history row kind");
            return Err(StoreError::Corruption(format!("bad history row kind {other}")));
        }
    };
    let txid = Txid::consensus_decode(&mut std::io::Cursor::new(&buf[KIND_LEN..KIND_LEN + TXID_LEN])).map_err(|e| {
        error!(%e, "history txid decode failed");
        StoreError::Corruption(format!("history txid decode: {e}"))
    })?;
    let vout_off = KIND_LEN + TXID_LEN;
    let vout = u32::from_le_bytes(buf[vout_off..vout_off + VOUT_LEN].try_into().unwrap());
    let height_off = vout_off + VOUT_LEN;
    let height = u32::from_le_bytes(buf[height_off..height_off + HEIGHT_LEN].try_into().unwrap());
    let amount_off = height_off + HEIGHT_LEN;
    let value_or_spender =
        u64::from_le_bytes(buf[amount_off..amount_off + AMOUNT_LEN].try_into().unwrap());
    Ok(HistoryRow {
        kind,
        point: OutPoint::new(txid, vout),
        height,
        value_or_spender,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::disk_array::DiskArray32;
    use crate::primitives::htdb::HtdbRecord;
    use crate::primitives::linked::LinkedRecords;
    use crate::primitives::mmfile::Mmfile;
    use crate::primitives::record::RecordAllocator;

    fn table(dir: &tempfile::TempDir) -> HistoryTable {
        let header = DiskArray32::new(Mmfile::open(dir.path().join("h_hdr.dat")).unwrap(), 0);
        let heads_alloc = RecordAllocator::new(
            Mmfile::open(dir.path().join("h_heads.dat")).unwrap(),
            0,
            HtdbRecord::<Hash20>::record_size(Hash20::SIZE, 4),
        );
        let heads = HtdbRecord::new(header, heads_alloc, 4);
        let rows_alloc = RecordAllocator::new(
            Mmfile::open(dir.path().join("h_rows.dat")).unwrap(),
            0,
            4 + ROW_LEN,
        );
        let chain = LinkedRecords::new(rows_alloc, ROW_LEN);
        HistoryTable::new(MultimapRecords::new(heads, chain))
    }

    fn row(height: u32) -> HistoryRow {
        HistoryRow {
            kind: HistoryKind::Output,
            point: OutPoint::new(Txid::from_byte_array([height as u8; 32]), 0),
            height,
            value_or_spender: 5_000,
        }
    }

    #[test]
    fn newest_row_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(4).unwrap();
        let addr = Hash20([9u8; 20]);

        t.add_row(addr, row(1)).unwrap();
        t.add_row(addr, row(2)).unwrap();

        let rows = t.rows(&addr).unwrap();
        assert_eq!(rows[0].height, 2);
        assert_eq!(rows[1].height, 1);
    }

    #[test]
    fn pop_above_trims_rows_past_height() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = table(&dir);
        t.create(4).unwrap();
        let addr = Hash20([3u8; 20]);
        t.add_row(addr, row(1)).unwrap();
        t.add_row(addr, row(2)).unwrap();
        t.add_row(addr, row(3)).unwrap();

        t.pop_above(&addr, 1).unwrap();
        let rows = t.rows(&addr).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].height, 1);
    }
}
