//! Fixed-width key types used as the `H` parameter of the hash-table primitives. Replaces the
//! original's duck-typed templated key (anything with `size()`/`data()`) with a single
//! monomorphic `FixedBytes<N>`, so every table's key type is concrete and its bucket-selection
//! code is shared rather than re-instantiated per key shape.

use bitcoin::{BlockHash, OutPoint, Txid};

/// An on-disk fixed-size key stored inside a hash-table record: the raw bytes, a tombstone
/// sentinel for `htdb_slab::remove`, and the bucket-selection hash.
pub trait FixedKey: Copy + Eq + Send + Sync + 'static {
    const SIZE: usize;

    fn as_bytes(&self) -> &[u8];

    /// First 8 little-endian bytes of the key, used to pick a bucket.
    fn hash_prefix(&self) -> u64;

    fn is_tombstone(&self) -> bool;
}

/// A plain `N`-byte key. `Hash32`, `Hash20` and `OutPointKey` are instances of this.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedBytes<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedBytes<N> {
    pub const SIZE: usize = N;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != N {
            return None;
        }
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        Some(Self(buf))
    }

    pub fn tombstone() -> Self {
        Self([0xFF; N])
    }
}

impl<const N: usize> std::fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FixedBytes<{}>({})", N, hex::encode(self.0))
    }
}

impl<const N: usize> FixedKey for FixedBytes<N> {
    const SIZE: usize = N;

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn hash_prefix(&self) -> u64 {
        let mut buf = [0u8; 8];
        let n = N.min(8);
        buf[..n].copy_from_slice(&self.0[..n]);
        u64::from_le_bytes(buf)
    }

    fn is_tombstone(&self) -> bool {
        self.0 == [0xFF; N]
    }
}

/// 32-byte key: block hashes, transaction ids.
pub type Hash32 = FixedBytes<32>;
/// 20-byte key: history-table address prefixes (script hash / pubkey hash).
pub type Hash20 = FixedBytes<20>;
/// 36-byte key: a spent output's `(txid, vout)`, used by the spend table.
pub type OutPointKey = FixedBytes<36>;

impl From<BlockHash> for Hash32 {
    fn from(hash: BlockHash) -> Self {
        Hash32(hash.to_byte_array())
    }
}

impl From<Txid> for Hash32 {
    fn from(txid: Txid) -> Self {
        Hash32(txid.to_byte_array())
    }
}

impl From<OutPoint> for OutPointKey {
    fn from(outpoint: OutPoint) -> Self {
        let mut buf = [0u8; 36];
        buf[..32].copy_from_slice(&outpoint.txid.to_byte_array());
        buf[32..].copy_from_slice(&outpoint.vout.to_le_bytes());
        OutPointKey(buf)
    }
}

/// Selects a bucket for `key` out of `buckets` slots: a power-of-two mask when possible, an
/// arbitrary remainder otherwise.
pub fn hash_bucket<H: FixedKey>(key: &H, buckets: u64) -> u64 {
    if buckets == 0 {
        return 0;
    }
    let prefix = key.hash_prefix();
    if buckets.is_power_of_two() {
        prefix & (buckets - 1)
    } else {
        prefix % buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_uses_mask() {
        let key = Hash32([0x01; 32]);
        assert_eq!(hash_bucket(&key, 256), 0x01);
    }

    #[test]
    fn tombstone_roundtrip() {
        let t = Hash20::tombstone();
        assert!(t.is_tombstone());
        assert!(!Hash20([0u8; 20]).is_tombstone());
    }

    #[test]
    fn outpoint_key_is_txid_then_vout_le() {
        let txid = Txid::from_byte_array([7u8; 32]);
        let outpoint = OutPoint::new(txid, 42);
        let key: OutPointKey = outpoint.into();
        assert_eq!(&key.0[..32], &[7u8; 32]);
        assert_eq!(&key.0[32..], &42u32.to_le_bytes());
    }
}
