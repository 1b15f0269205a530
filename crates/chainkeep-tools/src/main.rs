//! Thin inspection CLI over chainkeep's on-disk files, one subcommand per
//! `original_source/tools/*.cpp` utility plus `create`/`push`/`pop` for driving a `ChainDb`
//! directly. Every command maps a file (or a pair of files, where chainkeep-store's tables keep
//! a hash-table header and its record allocator in separate files) straight onto the matching
//! primitive and prints what it finds; nothing here touches consensus rules.

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use bitcoin::blockdata::constants::genesis_block;
use bitcoin::consensus::deserialize;
use bitcoin::{Block, Network};
use clap::{Parser, Subcommand};

use chainkeep_common::settings::{DatabaseSettings, Settings};
use chainkeep_store::database::ChainDb;
use chainkeep_store::key::FixedBytes;
use chainkeep_store::primitives::disk_array::{DiskArray32, DiskArray64};
use chainkeep_store::primitives::htdb::HtdbRecord;
use chainkeep_store::primitives::linked::LinkedRecords;
use chainkeep_store::primitives::mmfile::Mmfile;
use chainkeep_store::primitives::multimap::MultimapRecords;
use chainkeep_store::primitives::record::RecordAllocator;
use chainkeep_store::tables::HsdbControlBlock;

#[derive(Parser)]
#[command(name = "chainkeep-tools", about = "Inspection and maintenance CLI for chainkeep's on-disk files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a fresh chain database at a directory, writing the genesis block.
    Create {
        directory: PathBuf,
        /// Optional TOML settings file; defaults otherwise.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "bitcoin")]
        network: String,
    },
    /// Pushes one raw (consensus-serialized, hex-encoded) block onto an existing database.
    Push {
        directory: PathBuf,
        block_hex_file: PathBuf,
        height: u32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Pops the database back to (and including) `to_height + 1`, leaving `to_height` as tip.
    Pop {
        directory: PathBuf,
        to_height: u32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Dumps every slot of a `disk_array` file: index, value (blank if the empty sentinel).
    ShowArray {
        file: PathBuf,
        /// 4 (disk_array32) or 8 (disk_array64).
        value_size: usize,
    },
    /// Prints the record count of a `record_allocator` file.
    CountRecords { file: PathBuf, record_size: usize },
    /// Looks up one key in an `htdb_record` table, given its header and record-allocator files.
    ReadHtdbRecordValue {
        header_file: PathBuf,
        records_file: PathBuf,
        key_hex: String,
        value_size: usize,
    },
    /// Looks up one key in an `htdb_slab` table, given its header and slab files.
    ReadHtdbSlabValue {
        header_file: PathBuf,
        slab_file: PathBuf,
        key_hex: String,
    },
    /// Initializes a fresh `htdb_record` + `linked_records` multimap pair (a standalone
    /// history/stealth-style index, independent of any `ChainDb`).
    MmrCreate {
        /// 20 or 32.
        key_size: usize,
        value_size: usize,
        header_file: PathBuf,
        heads_file: PathBuf,
        rows_file: PathBuf,
        #[arg(default_value_t = 100)]
        buckets: u32,
    },
    /// Prepends one row onto a key's chain in an existing mmr pair.
    MmrAddRow {
        key_hex: String,
        value_hex: String,
        header_file: PathBuf,
        heads_file: PathBuf,
        rows_file: PathBuf,
    },
    /// Removes the most recently added row for a key in an existing mmr pair.
    MmrDeleteLastRow {
        key_hex: String,
        value_size: usize,
        header_file: PathBuf,
        heads_file: PathBuf,
        rows_file: PathBuf,
    },
    /// Prints an HSDB shard's 24-byte control block.
    ShowHsdbSettings { file: PathBuf },
}

fn load_settings(config: Option<PathBuf>) -> Result<Settings> {
    match config {
        Some(path) => {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(Settings::default()),
    }
}

fn db_settings(directory: &PathBuf, base: &Settings) -> DatabaseSettings {
    let mut settings = base.database.clone();
    settings.directory = directory.to_string_lossy().into_owned();
    settings
}

fn cmd_create(directory: PathBuf, config: Option<PathBuf>, network: String) -> Result<()> {
    let settings = load_settings(config)?;
    let db_settings = db_settings(&directory, &settings);
    fs::create_dir_all(&directory)
        .with_context(|| format!("creating {}", directory.display()))?;

    let network: Network = network.parse().map_err(|_| anyhow!("unknown network: {network}"))?;
    let mut db = ChainDb::open(&db_settings)?;
    db.create(&db_settings)?;
    db.push(&genesis_block(network), 0)?;
    db.synchronize()?;
    println!("created chain database at {}", directory.display());
    Ok(())
}

fn cmd_push(directory: PathBuf, block_hex_file: PathBuf, height: u32, config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;
    let db_settings = db_settings(&directory, &settings);
    let hex_text = fs::read_to_string(&block_hex_file)
        .with_context(|| format!("reading {}", block_hex_file.display()))?;
    let bytes = hex::decode(hex_text.trim()).context("decoding block hex")?;
    let block: Block = deserialize(&bytes).context("deserializing block")?;

    let mut db = ChainDb::open(&db_settings)?;
    db.push(&block, height)?;
    db.synchronize()?;
    println!("pushed block {} at height {height}", block.block_hash());
    Ok(())
}

fn cmd_pop(directory: PathBuf, to_height: u32, config: Option<PathBuf>) -> Result<()> {
    let settings = load_settings(config)?;
    let db_settings = db_settings(&directory, &settings);
    let mut db = ChainDb::open(&db_settings)?;
    db.pop(to_height)?;
    db.synchronize()?;
    println!("popped to height {to_height}");
    Ok(())
}

fn cmd_show_array(file: PathBuf, value_size: usize) -> Result<()> {
    match value_size {
        4 => {
            let mut array: DiskArray32<u32> = DiskArray32::new(Mmfile::open(&file)?, 0);
            array.start()?;
            for i in 0..array.len() {
                let value = array.read(i)?;
                println!("{i}: {}", if value == u32::MAX { String::new() } else { value.to_string() });
            }
        }
        8 => {
            let mut array: DiskArray64<u64> = DiskArray64::new(Mmfile::open(&file)?, 0);
            array.start()?;
            for i in 0..array.len() {
                let value = array.read(i)?;
                println!("{i}: {}", if value == u64::MAX { String::new() } else { value.to_string() });
            }
        }
        other => bail!("unsupported value size: {other} (expected 4 or 8)"),
    }
    Ok(())
}

fn cmd_count_records(file: PathBuf, record_size: usize) -> Result<()> {
    let mut allocator = RecordAllocator::new(Mmfile::open(&file)?, 0, record_size);
    allocator.start()?;
    println!("{}", allocator.count());
    Ok(())
}

/// Builds an `htdb_record<H>` over an already-started header/allocator pair, dispatching the
/// key width to a concrete `FixedBytes<N>` the same way the original dispatches on `KEY_SIZE`.
fn with_htdb_record<R>(
    header_file: &PathBuf,
    records_file: &PathBuf,
    key_len: usize,
    value_size: usize,
    f: impl FnOnce(&dyn Fn(&[u8]) -> Result<Option<Vec<u8>>>) -> Result<R>,
) -> Result<R> {
    macro_rules! dispatch {
        ($n:expr) => {{
            let header = DiskArray32::<u32>::new(Mmfile::open(header_file)?, 0);
            let alloc = RecordAllocator::new(
                Mmfile::open(records_file)?,
                0,
                HtdbRecord::<FixedBytes<$n>>::record_size($n, value_size),
            );
            let mut table = HtdbRecord::new(header, alloc, value_size);
            table.start()?;
            let lookup = |key_bytes: &[u8]| -> Result<Option<Vec<u8>>> {
                let key = FixedBytes::<$n>::from_slice(key_bytes)
                    .ok_or_else(|| anyhow!("key must be {} bytes", $n))?;
                Ok(table.get(&key)?.map(|v| v.to_vec()))
            };
            f(&lookup)
        }};
    }
    match key_len {
        20 => dispatch!(20),
        32 => dispatch!(32),
        36 => dispatch!(36),
        other => bail!("unsupported key size: {other} (expected 20, 32 or 36 bytes)"),
    }
}

fn cmd_read_htdb_record_value(
    header_file: PathBuf,
    records_file: PathBuf,
    key_hex: String,
    value_size: usize,
) -> Result<()> {
    let key_bytes = hex::decode(&key_hex).context("decoding key hex")?;
    let key_len = key_bytes.len();
    let found = with_htdb_record(&header_file, &records_file, key_len, value_size, |lookup| {
        lookup(&key_bytes)
    })?;
    match found {
        Some(value) => println!("{}", hex::encode(value)),
        None => bail!("no record found"),
    }
    Ok(())
}

fn cmd_read_htdb_slab_value(header_file: PathBuf, slab_file: PathBuf, key_hex: String) -> Result<()> {
    let key_bytes = hex::decode(&key_hex).context("decoding key hex")?;
    let header = DiskArray64::<u64>::new(Mmfile::open(&header_file)?, 0);
    let allocator = chainkeep_store::primitives::slab::SlabAllocator::new(Mmfile::open(&slab_file)?, 0);

    macro_rules! dispatch {
        ($n:expr) => {{
            let mut table = chainkeep_store::primitives::htdb::HtdbSlab::<FixedBytes<$n>>::new(header, allocator);
            table.start()?;
            let key = FixedBytes::<$n>::from_slice(&key_bytes)
                .ok_or_else(|| anyhow!("key must be {} bytes", $n))?;
            table.get(&key)?.map(|(_, value)| value.to_vec())
        }};
    }
    let found = match key_bytes.len() {
        20 => dispatch!(20),
        32 => dispatch!(32),
        36 => dispatch!(36),
        other => bail!("unsupported key size: {other} (expected 20, 32 or 36 bytes)"),
    };
    match found {
        Some(value) => println!("{}", hex::encode(value)),
        None => bail!("no record found"),
    }
    Ok(())
}

fn cmd_mmr_create(
    key_size: usize,
    value_size: usize,
    header_file: PathBuf,
    heads_file: PathBuf,
    rows_file: PathBuf,
    buckets: u32,
) -> Result<()> {
    macro_rules! dispatch {
        ($n:expr) => {{
            let header = DiskArray32::<u32>::new(Mmfile::open(&header_file)?, 0);
            let heads_alloc = RecordAllocator::new(
                Mmfile::open(&heads_file)?,
                0,
                HtdbRecord::<FixedBytes<$n>>::record_size($n, 4),
            );
            let heads = HtdbRecord::new(header, heads_alloc, 4);
            let rows_alloc = RecordAllocator::new(Mmfile::open(&rows_file)?, 0, 4 + value_size);
            let chain = LinkedRecords::new(rows_alloc, value_size);
            let mut mm: MultimapRecords<FixedBytes<$n>> = MultimapRecords::new(heads, chain);
            mm.create(buckets)?;
        }};
    }
    match key_size {
        20 => dispatch!(20),
        32 => dispatch!(32),
        other => bail!("unsupported key size: {other} (expected 20 or 32)"),
    }
    println!("created multimap pair with {buckets} buckets");
    Ok(())
}

fn cmd_mmr_add_row(
    key_hex: String,
    value_hex: String,
    header_file: PathBuf,
    heads_file: PathBuf,
    rows_file: PathBuf,
) -> Result<()> {
    let key_bytes = hex::decode(&key_hex).context("decoding key hex")?;
    let value_bytes = hex::decode(&value_hex).context("decoding value hex")?;
    let value_size = value_bytes.len();

    macro_rules! dispatch {
        ($n:expr) => {{
            let header = DiskArray32::<u32>::new(Mmfile::open(&header_file)?, 0);
            let heads_alloc = RecordAllocator::new(
                Mmfile::open(&heads_file)?,
                0,
                HtdbRecord::<FixedBytes<$n>>::record_size($n, 4),
            );
            let mut heads = HtdbRecord::new(header, heads_alloc, 4);
            heads.start()?;
            let rows_alloc = RecordAllocator::new(Mmfile::open(&rows_file)?, 0, 4 + value_size);
            let mut chain = LinkedRecords::new(rows_alloc, value_size);
            chain.start()?;
            let mut mm: MultimapRecords<FixedBytes<$n>> = MultimapRecords::new(heads, chain);
            let key = FixedBytes::<$n>::from_slice(&key_bytes)
                .ok_or_else(|| anyhow!("key must be {} bytes", $n))?;
            mm.add_row(key, |buf| buf.copy_from_slice(&value_bytes))?;
            mm.sync()?;
        }};
    }
    match key_bytes.len() {
        20 => dispatch!(20),
        32 => dispatch!(32),
        other => bail!("unsupported key size: {other} (expected 20 or 32)"),
    }
    println!("added row");
    Ok(())
}

fn cmd_mmr_delete_last_row(
    key_hex: String,
    value_size: usize,
    header_file: PathBuf,
    heads_file: PathBuf,
    rows_file: PathBuf,
) -> Result<()> {
    let key_bytes = hex::decode(&key_hex).context("decoding key hex")?;

    macro_rules! dispatch {
        ($n:expr) => {{
            let header = DiskArray32::<u32>::new(Mmfile::open(&header_file)?, 0);
            let heads_alloc = RecordAllocator::new(
                Mmfile::open(&heads_file)?,
                0,
                HtdbRecord::<FixedBytes<$n>>::record_size($n, 4),
            );
            let mut heads = HtdbRecord::new(header, heads_alloc, 4);
            heads.start()?;
            let rows_alloc = RecordAllocator::new(Mmfile::open(&rows_file)?, 0, 4 + value_size);
            let mut chain = LinkedRecords::new(rows_alloc, value_size);
            chain.start()?;
            let mut mm: MultimapRecords<FixedBytes<$n>> = MultimapRecords::new(heads, chain);
            let key = FixedBytes::<$n>::from_slice(&key_bytes)
                .ok_or_else(|| anyhow!("key must be {} bytes", $n))?;
            mm.delete_last_row(&key)?;
            mm.sync()?;
        }};
    }
    match key_bytes.len() {
        20 => dispatch!(20),
        32 => dispatch!(32),
        other => bail!("unsupported key size: {other} (expected 20 or 32)"),
    }
    println!("deleted last row");
    Ok(())
}

fn cmd_show_hsdb_settings(file: PathBuf) -> Result<()> {
    let file = Mmfile::open(&file)?;
    let control = HsdbControlBlock::read_from(file.data())?;
    println!("version: {}", control.version);
    println!("shard_max_entries: {}", control.shard_max_entries);
    println!("total_key_size: {}", control.total_key_size);
    println!("sharded_bitsize: {}", control.sharded_bitsize);
    println!("bucket_bitsize: {}", control.bucket_bitsize);
    println!("row_value_size: {}", control.row_value_size);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Create { directory, config, network } => cmd_create(directory, config, network),
        Command::Push { directory, block_hex_file, height, config } => {
            cmd_push(directory, block_hex_file, height, config)
        }
        Command::Pop { directory, to_height, config } => cmd_pop(directory, to_height, config),
        Command::ShowArray { file, value_size } => cmd_show_array(file, value_size),
        Command::CountRecords { file, record_size } => cmd_count_records(file, record_size),
        Command::ReadHtdbRecordValue { header_file, records_file, key_hex, value_size } => {
            cmd_read_htdb_record_value(header_file, records_file, key_hex, value_size)
        }
        Command::ReadHtdbSlabValue { header_file, slab_file, key_hex } => {
            cmd_read_htdb_slab_value(header_file, slab_file, key_hex)
        }
        Command::MmrCreate { key_size, value_size, header_file, heads_file, rows_file, buckets } => {
            cmd_mmr_create(key_size, value_size, header_file, heads_file, rows_file, buckets)
        }
        Command::MmrAddRow { key_hex, value_hex, header_file, heads_file, rows_file } => {
            cmd_mmr_add_row(key_hex, value_hex, header_file, heads_file, rows_file)
        }
        Command::MmrDeleteLastRow { key_hex, value_size, header_file, heads_file, rows_file } => {
            cmd_mmr_delete_last_row(key_hex, value_size, header_file, heads_file, rows_file)
        }
        Command::ShowHsdbSettings { file } => cmd_show_hsdb_settings(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_push_roundtrip_through_a_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let directory = dir.path().join("chain");
        cmd_create(directory.clone(), None, "regtest".to_string()).unwrap();

        let settings = Settings::default();
        let db_settings = db_settings(&directory, &settings);
        let db = ChainDb::open(&db_settings).unwrap();
        assert_eq!(db.top_height(), Some(0));
    }

    #[test]
    fn mmr_create_then_add_then_delete_row() {
        let dir = tempfile::tempdir().unwrap();
        let header_file = dir.path().join("hdr.dat");
        let heads_file = dir.path().join("heads.dat");
        let rows_file = dir.path().join("rows.dat");

        cmd_mmr_create(20, 8, header_file.clone(), heads_file.clone(), rows_file.clone(), 16).unwrap();

        let key_hex = hex::encode([7u8; 20]);
        let value_hex = hex::encode(42u64.to_le_bytes());
        cmd_mmr_add_row(
            key_hex.clone(),
            value_hex,
            header_file.clone(),
            heads_file.clone(),
            rows_file.clone(),
        )
        .unwrap();

        cmd_mmr_delete_last_row(key_hex, 8, header_file, heads_file, rows_file).unwrap();
    }

    #[test]
    fn count_records_reports_zero_on_a_fresh_allocator() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("recs.dat");
        let mut allocator = RecordAllocator::new(Mmfile::open(&file).unwrap(), 0, 16);
        allocator.create().unwrap();
        cmd_count_records(file, 16).unwrap();
    }
}
