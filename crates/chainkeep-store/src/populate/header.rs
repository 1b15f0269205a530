//! `populate_header`: resolves the store's header context for a branch's base, then propagates
//! it through the branch in memory so every header gets its own `HeaderContext` without
//! re-reading the store per header.

use bitcoin::pow::CompactTarget;
use bitcoin::Target;
use chainkeep_common::CoreError;

use crate::database::ChainDb;
use crate::pools::HeaderBranch;
use crate::validate::header::HeaderContext;

const POW_TARGET_TIMESPAN: u32 = 14 * 24 * 60 * 60;
const POW_TARGET_SPACING: u32 = 10 * 60;
const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = POW_TARGET_TIMESPAN / POW_TARGET_SPACING;

/// Median of the (up to) 11 indexed blocks ending at `height`, the way `GetMedianTimePast` is
/// defined.
pub(crate) fn median_time_past(db: &ChainDb, height: u32) -> Result<u32, CoreError> {
    let mut times = Vec::with_capacity(11);
    let mut h = height;
    loop {
        match db.fetch_block(h).map_err(CoreError::from)? {
            Some(record) => times.push(record.header.time),
            None => break,
        }
        if h == 0 || times.len() == 11 {
            break;
        }
        h -= 1;
    }
    if times.is_empty() {
        return Ok(0);
    }
    times.sort_unstable();
    Ok(times[times.len() / 2])
}

/// Bits expected at `height`: unchanged outside a retarget boundary, otherwise recomputed from
/// the actual timespan of the last adjustment period, clamped to a 4x band either way.
pub(crate) fn expected_bits(db: &ChainDb, height: u32, fallback: CompactTarget) -> Result<CompactTarget, CoreError> {
    if height == 0 || height % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
        return Ok(fallback);
    }
    let period_start = height - DIFFICULTY_ADJUSTMENT_INTERVAL;
    let (Some(first), Some(last)) = (
        db.fetch_block(period_start).map_err(CoreError::from)?,
        db.fetch_block(height - 1).map_err(CoreError::from)?,
    ) else {
        return Ok(fallback);
    };

    let actual_timespan = last
        .header
        .time
        .saturating_sub(first.header.time)
        .clamp(POW_TARGET_TIMESPAN / 4, POW_TARGET_TIMESPAN * 4);

    let old_target = Target::from_compact(last.header.bits);
    let new_target = old_target * u64::from(actual_timespan) / u64::from(POW_TARGET_TIMESPAN);
    Ok(new_target.to_compact_lossy())
}

pub fn populate_header(db: &ChainDb, branch: &HeaderBranch) -> Result<Vec<HeaderContext>, CoreError> {
    let base_height = db.top_height().map(|h| h + 1).unwrap_or(0);
    let mut contexts = Vec::with_capacity(branch.len());
    for (i, entry) in branch.items().iter().enumerate() {
        let height = base_height + i as u32;
        contexts.push(HeaderContext {
            height,
            median_time_past: median_time_past(db, height.saturating_sub(1))?,
            expected_bits: expected_bits(db, height, entry.header.bits)?,
        });
    }
    Ok(contexts)
}
