//! Share validator (C3): cheap verification, contextual verification, and
//! per-share difficulty retargeting (spec.md §4.3).

use std::collections::HashSet;

use log::debug;
use thiserror::Error;

use p2pool_core::share::Share;
use p2pool_core::target::{bits_to_target, clamp_retarget, target_to_bits, U256};
use p2pool_core::Hash;
use p2pool_pplns::{compute_payout_map, PayoutEntry, WindowShare};

use crate::params::NetworkParams;
use crate::pow::ParentPow;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed share: {0}")]
    Malformed(String),
    #[error("proof of work does not meet the share's target")]
    PoWInsufficient,
    #[error("coinbase does not commit to the share's reference hash")]
    BadCoinbase,
    #[error("coinbase payouts do not match the predecessor's computed PPLNS map")]
    BadPayouts,
    #[error("timestamp outside the permitted window")]
    TimestampWindow,
    #[error("predecessor {0:x?} is unknown")]
    UnknownPredecessor(Hash),
    #[error("difficulty bits do not match the retargeted value")]
    BadDifficulty,
    #[error("far predecessor does not match the checkpoint at the configured offset")]
    BadFarPredecessor,
    #[error("share declares an unsupported protocol version {0}")]
    UnsupportedVersion(u16),
}

/// Phase one (spec.md §4.3: "must pass before any network amplification").
/// Does not require the predecessor to be present in the chain store.
pub fn cheap_verify(
    share: &Share,
    params: &NetworkParams,
    pow: &dyn ParentPow,
    accepted_versions: &HashSet<u16>,
    predecessor_timestamp: Option<u32>,
) -> Result<(), ValidationError> {
    let info = share.info.info();

    let target = bits_to_target(info.bits);
    let min_target = params.min_target();
    let max_target = params.max_target();
    if target.cmp(&min_target) == std::cmp::Ordering::Less
        || target.cmp(&max_target) == std::cmp::Ordering::Greater
    {
        return Err(ValidationError::Malformed(
            "target bits outside network bounds".to_string(),
        ));
    }

    if !accepted_versions.contains(&share.info.protocol_version()) {
        return Err(ValidationError::UnsupportedVersion(share.info.protocol_version()));
    }

    let pow_hash = pow.hash_header(&share.parent_header);
    let pow_value = U256::from_be_bytes(&reverse(&pow_hash));
    if pow_value.cmp(&target) == std::cmp::Ordering::Greater {
        return Err(ValidationError::PoWInsufficient);
    }

    if share.reference_hash() != commitment_from_coinbase(share) {
        return Err(ValidationError::BadCoinbase);
    }

    if let Some(pred_ts) = predecessor_timestamp {
        let lower = pred_ts.saturating_sub(60);
        let upper = pred_ts as i64 + params.max_future_drift;
        if (info.timestamp as i64) < lower as i64 || (info.timestamp as i64) > upper {
            return Err(ValidationError::TimestampWindow);
        }
    }

    Ok(())
}

/// The metadata-commitment output is the coinbase's last output; by
/// convention (OP_RETURN-style, value zero) its script is exactly the
/// 32-byte reference hash appended to a push opcode prefix of length 2.
fn commitment_from_coinbase(share: &Share) -> Hash {
    let Some(last) = share.coinbase.outputs.last() else {
        return [0u8; 32];
    };
    let script = &last.script_pubkey;
    if script.len() < 32 {
        return [0u8; 32];
    }
    let mut commitment = [0u8; 32];
    commitment.copy_from_slice(&script[script.len() - 32..]);
    commitment
}

fn reverse(hash: &Hash) -> Hash {
    let mut out = *hash;
    out.reverse();
    out
}

/// An ancestor's (timestamp, bits) pair, oldest-share fields needed by the
/// retarget formula. `window` is ordered oldest-first and holds at most
/// `target_lookbehind + 1` entries ending at the predecessor.
pub struct RetargetWindow {
    pub timestamps: Vec<u32>,
    pub bits: Vec<u32>,
}

/// Phase two (spec.md §4.3: "requires predecessor"). `payout_window` is the
/// same PPLNS window (spec.md §4.4) the predecessor's own composer would
/// have used — callers fetch it fresh from the tracker rather than trusting
/// anything the share itself carries, so the payout check below is a real
/// independent recomputation, not a comparison against caller-trusted data.
/// `far_predecessor_candidate` is the checkpoint hash the tracker computes
/// for the predecessor at the network's fixed offset (`NetworkParams::chain_length`
/// shares back); `None` is valid near genesis, where no such checkpoint
/// exists yet.
#[allow(clippy::too_many_arguments)]
pub fn contextual_verify(
    share: &Share,
    predecessor_absheight: u64,
    predecessor_abswork: U256,
    far_predecessor_candidate: Option<Hash>,
    window: &RetargetWindow,
    payout_window: &[WindowShare],
    donation_script: &[u8],
    params: &NetworkParams,
) -> Result<(), ValidationError> {
    let info = share.info.info();

    let expected_absheight = predecessor_absheight + 1;
    if info.absheight != expected_absheight {
        return Err(ValidationError::Malformed(format!(
            "absheight {} does not follow predecessor height {}",
            info.absheight, predecessor_absheight
        )));
    }

    let share_work = U256::work_from_target(&bits_to_target(info.bits));
    let expected_abswork = predecessor_abswork
        .checked_add(&share_work)
        .ok_or_else(|| ValidationError::Malformed("cumulative work overflowed".to_string()))?;
    if info.abswork.cmp(&expected_abswork) != std::cmp::Ordering::Equal {
        return Err(ValidationError::Malformed("abswork mismatch".to_string()));
    }

    let expected_bits = retarget(window, params);
    if info.bits != expected_bits {
        debug!(
            "share bits {:08x} != retargeted {:08x}",
            info.bits, expected_bits
        );
        return Err(ValidationError::BadDifficulty);
    }

    if info.far_predecessor != far_predecessor_candidate {
        return Err(ValidationError::BadFarPredecessor);
    }

    // The payout split is independently recomputed from `payout_window`; the
    // total is self-declared (the sum of the share's own actual payout
    // outputs) since no caller here can independently re-derive the parent
    // chain's historical subsidy+fees figure for an already-composed share.
    // Only the split is trusted to `p2pool_pplns`; the total is merely what
    // the share itself already committed to paying out.
    let Some((commitment_output, payout_outputs)) = share.coinbase.outputs.split_last() else {
        return Err(ValidationError::BadPayouts);
    };
    let _ = commitment_output; // already checked against reference_hash by cheap_verify
    let total: u64 = payout_outputs.iter().map(|o| o.value).sum();

    let node_fee_value = ((total as u128 * info.node_fee_fraction as u128) / 65535) as u64;
    let distributable = total
        .checked_sub(node_fee_value)
        .ok_or_else(|| ValidationError::Malformed("node fee exceeds distributable total".to_string()))?;

    let mut expected: Vec<PayoutEntry> = if payout_window.is_empty() {
        vec![PayoutEntry {
            script: info.payout_script.clone(),
            value: distributable,
        }]
    } else {
        compute_payout_map(payout_window, distributable, donation_script)
            .map_err(|err| ValidationError::Malformed(format!("PPLNS recomputation failed: {err}")))?
            .parent
    };
    if node_fee_value > 0 {
        expected.push(PayoutEntry {
            script: info.node_fee_script.clone(),
            value: node_fee_value,
        });
    }

    if payout_outputs.len() != expected.len() {
        return Err(ValidationError::BadPayouts);
    }
    for (actual, expected) in payout_outputs.iter().zip(expected.iter()) {
        if actual.script_pubkey != expected.script || actual.value != expected.value {
            return Err(ValidationError::BadPayouts);
        }
    }

    Ok(())
}

/// `new_target = median_timestamp_delta × (sum_of_targets / count) /
/// SHARE_PERIOD`, clamped to `predecessor_target × (1 ± MAX_STEP)` and then
/// to `[MIN_TARGET, MAX_TARGET]` (spec.md §4.3).
pub fn retarget(window: &RetargetWindow, params: &NetworkParams) -> u32 {
    if window.bits.len() < 2 || window.timestamps.len() < 2 {
        return window.bits.last().copied().unwrap_or(params.max_bits);
    }
    let prev_target = bits_to_target(*window.bits.last().unwrap());

    let mut deltas: Vec<u32> = window
        .timestamps
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]))
        .collect();
    deltas.sort_unstable();
    let median_delta = deltas[deltas.len() / 2].max(1) as u64;

    let mut sum_targets = U256::ZERO;
    for bits in &window.bits {
        sum_targets = sum_targets
            .checked_add(&bits_to_target(*bits))
            .unwrap_or(U256::MAX);
    }
    let (avg_target, _) = sum_targets.div_rem_u64(window.bits.len() as u64);
    let scaled = avg_target.saturating_mul_u64(median_delta);
    let (new_target, _) = scaled.div_rem_u64(params.share_period);

    let clamped = clamp_retarget(
        new_target,
        prev_target,
        params.max_step_num,
        params.max_step_den,
        params.min_target(),
        params.max_target(),
    );
    target_to_bits(&clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retarget_holds_steady_at_target_period() {
        let params = NetworkParams::mainnet();
        let bits = vec![params.min_bits; 5];
        let timestamps: Vec<u32> = (0..5).map(|i| i * params.share_period as u32).collect();
        let window = RetargetWindow { timestamps, bits };
        let result = retarget(&window, &params);
        // Share period exactly matched, so the target should not move far
        // from its previous value (allow for integer-division slack).
        let prev = bits_to_target(params.min_bits);
        let new = bits_to_target(result);
        let upper = clamp_retarget(
            U256::MAX,
            prev,
            params.max_step_num,
            params.max_step_den,
            params.min_target(),
            params.max_target(),
        );
        assert!(new.cmp(&upper) != std::cmp::Ordering::Greater);
    }

    #[test]
    fn retarget_clamps_when_shares_arrive_too_fast() {
        let params = NetworkParams::mainnet();
        let bits = vec![params.min_bits; 5];
        // Shares ten times faster than target.
        let timestamps: Vec<u32> = (0..5).map(|i| i * (params.share_period as u32) / 10).collect();
        let window = RetargetWindow { timestamps, bits };
        let result = retarget(&window, &params);
        let prev_target = bits_to_target(params.min_bits);
        let new_target = bits_to_target(result);
        // Faster shares should raise difficulty (lower target), clamped to
        // at most the configured max step.
        assert!(new_target.cmp(&prev_target) != std::cmp::Ordering::Greater);
    }
}
