//! `validate_header`: proof-of-work, timestamp bounds, retarget, checkpoint equality.

use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::block::Header as BlockHeader;
use bitcoin::CompactTarget;
use chainkeep_common::{CoreError, Checkpoints, Settings};

use super::{ValidationError, ValidationResult};

/// Everything `validate_header` needs about the chain it extends. Built by `populate_header`
/// from the store's header context (for the branch base) or propagated in memory (for
/// subsequent headers in the same branch).
pub struct HeaderContext {
    pub height: u32,
    pub median_time_past: u32,
    pub expected_bits: CompactTarget,
}

const MAX_FUTURE_BLOCK_TIME_SECS: u64 = 2 * 60 * 60;

pub fn validate_header(
    header: &BlockHeader,
    context: &HeaderContext,
    settings: &Settings,
    checkpoints: &Checkpoints,
) -> ValidationResult<()> {
    if !header.target().is_met_by(header.block_hash()) {
        return Err(ValidationError::Header("proof of work target not met".into()));
    }

    if header.time <= context.median_time_past {
        return Err(ValidationError::Header(
            "timestamp does not exceed median time past".into(),
        ));
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    if u64::from(header.time) > now + MAX_FUTURE_BLOCK_TIME_SECS {
        return Err(ValidationError::Header("timestamp too far in the future".into()));
    }

    if settings.retarget && header.bits != context.expected_bits {
        return Err(ValidationError::Header(format!(
            "bits {:?} do not match expected retarget {:?}",
            header.bits, context.expected_bits
        )));
    }

    checkpoints
        .verify(context.height, header.block_hash())
        .map_err(|(expected, height)| {
            ValidationError::Core(CoreError::CheckpointMismatch {
                height,
                expected,
                found: header.block_hash(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::constants::genesis_block;
    use bitcoin::Network;

    #[test]
    fn genesis_header_passes_with_no_checkpoints_and_no_retarget_requirement() {
        let header = genesis_block(Network::Bitcoin).header;
        let context = HeaderContext {
            height: 0,
            median_time_past: 0,
            expected_bits: header.bits,
        };
        let mut settings = Settings::default();
        settings.retarget = false;
        let result = validate_header(&header, &context, &settings, &Checkpoints::default());
        assert!(result.is_ok());
    }

    #[test]
    fn checkpoint_mismatch_is_rejected() {
        let header = genesis_block(Network::Bitcoin).header;
        let context = HeaderContext {
            height: 0,
            median_time_past: 0,
            expected_bits: header.bits,
        };
        let mut settings = Settings::default();
        settings.retarget = false;
        let wrong = genesis_block(Network::Testnet).block_hash();
        let checkpoints = Checkpoints::new(vec![(0, wrong)]);
        let result = validate_header(&header, &context, &settings, &checkpoints);
        assert!(result.is_err());
    }
}
