//! Runtime configuration, enumerating every option named in the design's external-interfaces
//! section. Grounded on libbitcoin-blockchain's `settings.hpp` for the field list and on
//! Floresta's `Config`/`ConfigFile` for the Rust shape: a plain struct with a `Default` impl,
//! deserializable from TOML.

use crate::Checkpoints;

/// Consensus- and mining-adjacent knobs. Their *meaning* comes from the consensus library
/// this core treats as an external collaborator; the core only threads the values through.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    /// Number of worker threads for the script-verification dispatcher.
    pub cores: u32,
    /// Prioritize chain processing over other work (mirrors libbitcoin's `priority`).
    pub priority: bool,
    pub use_libconsensus: bool,
    pub byte_fee_satoshis: f32,
    pub sigop_fee_satoshis: f32,
    pub minimum_output_satoshis: u64,
    pub notify_limit_hours: u32,
    pub reorganization_limit: u32,
    pub block_buffer_limit: u32,
    pub difficult: bool,
    pub retarget: bool,

    // BIP activation toggles.
    pub bip16: bool,
    pub bip30: bool,
    pub bip34: bool,
    pub bip42: bool,
    pub bip65: bool,
    pub bip66: bool,
    pub bip68: bool,
    pub bip90: bool,
    pub bip112: bool,
    pub bip113: bool,
    pub bip141: bool,
    pub bip143: bool,
    pub bip147: bool,
    pub bip158: bool,

    pub time_warp_patch: bool,
    pub retarget_overflow_patch: bool,
    pub scrypt_proof_of_work: bool,

    pub block_bytes_limit: usize,
    pub block_sigop_limit: usize,

    #[cfg_attr(feature = "serde", serde(skip))]
    pub checkpoints: Checkpoints,

    // Database-facing settings.
    pub database: DatabaseSettings,
}

/// Table-layout and lifecycle knobs for `chainkeep-store`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DatabaseSettings {
    pub directory: String,
    pub history_start_height: u32,
    pub stealth_start_height: u32,
    /// Bucket count for the block table's `htdb_slab` header.
    pub block_table_buckets: u64,
    /// Bucket count for the transaction table's `htdb_slab` header.
    pub transaction_table_buckets: u64,
    /// Bucket count for the spend table's `htdb_record` header.
    pub spend_table_buckets: u32,
    /// Bucket count for the history table's `htdb_record` (multimap) header.
    pub history_table_buckets: u32,
    /// 1.5x-style growth factor applied by `Mmfile::reserve`.
    pub file_growth_rate: f64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            directory: "chaindata".to_string(),
            history_start_height: 0,
            stealth_start_height: 0,
            block_table_buckets: 1 << 20,
            transaction_table_buckets: 1 << 23,
            spend_table_buckets: 1 << 23,
            history_table_buckets: 1 << 20,
            file_growth_rate: 1.5,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cores: std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
            priority: false,
            use_libconsensus: false,
            byte_fee_satoshis: 0.0,
            sigop_fee_satoshis: 0.0,
            minimum_output_satoshis: 0,
            notify_limit_hours: 24,
            reorganization_limit: 0,
            block_buffer_limit: 50,
            difficult: true,
            retarget: true,
            bip16: true,
            bip30: true,
            bip34: true,
            bip42: true,
            bip65: true,
            bip66: true,
            bip68: true,
            bip90: true,
            bip112: true,
            bip113: true,
            bip141: true,
            bip143: true,
            bip147: true,
            bip158: false,
            time_warp_patch: false,
            retarget_overflow_patch: false,
            scrypt_proof_of_work: false,
            block_bytes_limit: 4_000_000,
            block_sigop_limit: 80_000,
            checkpoints: Checkpoints::default(),
            database: DatabaseSettings::default(),
        }
    }
}
