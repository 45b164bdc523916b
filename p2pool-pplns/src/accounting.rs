//! Deterministic weight accumulation over a PPLNS window (spec.md §4.4).

use std::collections::HashMap;

use p2pool_core::target::U256;
use p2pool_core::Hash;

use crate::PplnsError;

/// The subset of a share's fields the accountant needs. Callers (the
/// tracker, when walking backward from a tip) build one of these per share
/// in the window.
#[derive(Debug, Clone)]
pub struct WindowShare {
    pub share_hash: Hash,
    pub target: U256,
    pub payout_script: Vec<u8>,
    /// Parts-per-65535 routed to the donation script.
    pub donation_fraction: u16,
    pub aux_payouts: Vec<(u32, Vec<u8>)>,
}

/// A single coinbase output the accountant has decided on: pay `value`
/// satoshi to `script`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutEntry {
    pub script: Vec<u8>,
    pub value: u64,
}

/// The full result of a PPLNS computation over one window: the normalized
/// parent-chain payout list, plus one raw weight map per aux chain that had
/// at least one declared payout in the window. Aux weights are reported
/// un-normalized because each aux chain's subsidy+fees figure comes from
/// its own template, which this module never sees; pass the map through
/// `normalize_weights` with that chain's amount to get its payout list.
#[derive(Debug, Clone, Default)]
pub struct PayoutMap {
    pub parent: Vec<PayoutEntry>,
    pub aux: HashMap<u32, HashMap<Vec<u8>, U256>>,
}

/// `w(S) = 2^256 / target(S)`, the share's expected number of attempts.
pub fn share_weight(target: &U256) -> U256 {
    U256::work_from_target(target)
}

/// Walk the given window (already ordered, any order — iteration order is
/// normalized internally) and produce the deterministic payout map.
///
/// `donation_script` receives the donation-fraction complement of every
/// share's weight; pass an empty script to mean "no donation configured",
/// in which case the donated weight is simply folded back into the miner's
/// own share like every other contributor.
pub fn compute_payout_map(
    window: &[WindowShare],
    subsidy_and_fees: u64,
    donation_script: &[u8],
) -> Result<PayoutMap, PplnsError> {
    if window.is_empty() {
        return Err(PplnsError::EmptyWindow);
    }

    let mut parent_weights: HashMap<Vec<u8>, U256> = HashMap::new();
    let mut aux_weights: HashMap<u32, HashMap<Vec<u8>, U256>> = HashMap::new();
    let mut total_parent_weight = U256::ZERO;

    for share in window {
        let weight = share_weight(&share.target);

        let (miner_weight, donation_weight) = split_donation(&weight, share.donation_fraction)?;

        add_weight(&mut parent_weights, &share.payout_script, miner_weight);
        if !donation_script.is_empty() && !donation_weight.is_zero() {
            add_weight(&mut parent_weights, donation_script, donation_weight);
        } else if donation_weight.is_zero() {
            // nothing to add
        } else {
            add_weight(&mut parent_weights, &share.payout_script, donation_weight);
        }

        total_parent_weight = total_parent_weight
            .checked_add(&weight)
            .ok_or(PplnsError::WeightOverflow)?;

        for (chain_id, script) in &share.aux_payouts {
            let map = aux_weights.entry(*chain_id).or_default();
            add_weight(map, script, weight);
        }
    }

    let parent = normalize(&parent_weights, total_parent_weight, subsidy_and_fees)?;

    Ok(PayoutMap {
        parent,
        aux: aux_weights,
    })
}

/// Normalize a weight map into satoshi payouts given a total weight and the
/// amount to distribute, hash-sorted ascending for determinism, with the
/// rounding residual assigned to the highest-weight recipient.
pub fn normalize_weights(
    weights: &HashMap<Vec<u8>, U256>,
    total_weight: U256,
    amount: u64,
) -> Result<Vec<PayoutEntry>, PplnsError> {
    normalize(weights, total_weight, amount)
}

fn normalize(
    weights: &HashMap<Vec<u8>, U256>,
    total_weight: U256,
    amount: u64,
) -> Result<Vec<PayoutEntry>, PplnsError> {
    if weights.is_empty() || total_weight.is_zero() || amount == 0 {
        return Ok(Vec::new());
    }

    let mut entries: Vec<(Vec<u8>, U256)> = weights.iter().map(|(s, w)| (s.clone(), *w)).collect();
    // Hash-sort ascending by script bytes; ties in weight are broken by the
    // same ordering since the sort key is the script itself.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = Vec::with_capacity(entries.len());
    let mut distributed: u64 = 0;
    let mut highest_idx = 0usize;
    let mut highest_weight = U256::ZERO;

    for (i, (script, weight)) in entries.iter().enumerate() {
        let numerator = weight.saturating_mul_u64(amount);
        let (quotient, _) = numerator.div_rem(&total_weight);
        let value = quotient.0[0] as u64;
        distributed = distributed.saturating_add(value);
        if weight.cmp(&highest_weight) == std::cmp::Ordering::Greater {
            highest_weight = *weight;
            highest_idx = i;
        }
        out.push(PayoutEntry {
            script: script.clone(),
            value,
        });
    }

    let residual = amount.saturating_sub(distributed);
    if residual > 0 {
        out[highest_idx].value = out[highest_idx].value.saturating_add(residual);
    }

    Ok(out)
}

fn add_weight(map: &mut HashMap<Vec<u8>, U256>, script: &[u8], weight: U256) {
    if weight.is_zero() {
        return;
    }
    let entry = map.entry(script.to_vec()).or_insert(U256::ZERO);
    *entry = entry.checked_add(&weight).unwrap_or(U256::MAX);
}

fn split_donation(weight: &U256, donation_fraction: u16) -> Result<(U256, U256), PplnsError> {
    if donation_fraction > 65535 {
        return Err(PplnsError::InvalidDonationFraction(donation_fraction));
    }
    let (donation_weight, _) = weight.saturating_mul_u64(donation_fraction as u64).div_rem_u64(65535);
    let miner_weight = weight
        .checked_sub(&donation_weight)
        .ok_or(PplnsError::WeightOverflow)?;
    Ok((miner_weight, donation_weight))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(hash_byte: u8, bits_target: U256, script: &[u8], donation: u16) -> WindowShare {
        WindowShare {
            share_hash: [hash_byte; 32],
            target: bits_target,
            payout_script: script.to_vec(),
            donation_fraction: donation,
            aux_payouts: vec![],
        }
    }

    #[test]
    fn equal_weight_shares_split_evenly() {
        let target = U256([0, 0, 0, 0, 0, 1, 0, 0]);
        let window = vec![
            share(1, target, b"alice", 0),
            share(2, target, b"bob", 0),
        ];
        let result = compute_payout_map(&window, 1000, b"").unwrap();
        assert_eq!(result.parent.len(), 2);
        let total: u64 = result.parent.iter().map(|e| e.value).sum();
        assert_eq!(total, 1000);
        for entry in &result.parent {
            assert!(entry.value == 500 || entry.value == 500);
        }
    }

    #[test]
    fn donation_fraction_routes_to_donation_script() {
        let target = U256([0, 0, 0, 0, 0, 1, 0, 0]);
        let window = vec![share(1, target, b"alice", 6553)]; // 10%
        let result = compute_payout_map(&window, 1000, b"donation").unwrap();
        let alice = result.parent.iter().find(|e| e.script == b"alice").unwrap();
        let donation = result.parent.iter().find(|e| e.script == b"donation").unwrap();
        assert_eq!(alice.value + donation.value, 1000);
        assert!(donation.value > 0);
    }

    #[test]
    fn residual_goes_to_highest_weight_recipient() {
        let big = U256([0, 0, 0, 0, 0, 0, 1, 0]);
        let small = U256([0, 0, 0, 0, 0, 0, 0, 1]);
        let window = vec![share(1, small, b"small", 0), share(2, big, b"big", 0)];
        let result = compute_payout_map(&window, 7, b"").unwrap();
        let total: u64 = result.parent.iter().map(|e| e.value).sum();
        assert_eq!(total, 7);
    }

    #[test]
    fn empty_window_is_rejected() {
        let result = compute_payout_map(&[], 1000, b"");
        assert!(matches!(result, Err(PplnsError::EmptyWindow)));
    }

    #[test]
    fn aux_payouts_produce_per_chain_maps() {
        let target = U256([0, 0, 0, 0, 0, 1, 0, 0]);
        let mut s = share(1, target, b"alice", 0);
        s.aux_payouts.push((7, b"alice-aux".to_vec()));
        let result = compute_payout_map(&[s], 1000, b"").unwrap();
        assert!(result.aux.contains_key(&7));
    }
}
