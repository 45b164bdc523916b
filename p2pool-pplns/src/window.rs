//! Incremental PPLNS window maintenance (spec.md §4.4's stability
//! requirement): add the new tip, subtract the share that falls out of the
//! window, without a full O(window) recompute on every share.

use std::collections::{HashMap, VecDeque};

use p2pool_core::target::U256;

use crate::accounting::{normalize_weights, share_weight, PayoutEntry, WindowShare};
use crate::PplnsError;

/// Running weight sums for a single PPLNS window, kept in sync one share at
/// a time. `recompute` exists for startup / integrity checks; steady-state
/// operation should use `push_front`/`evict_back`.
pub struct PplnsWindow {
    max_len: usize,
    shares: VecDeque<WindowShare>,
    parent_weights: HashMap<Vec<u8>, U256>,
    total_parent_weight: U256,
    donation_script: Vec<u8>,
}

impl PplnsWindow {
    pub fn new(max_len: usize, donation_script: Vec<u8>) -> Self {
        PplnsWindow {
            max_len,
            shares: VecDeque::new(),
            parent_weights: HashMap::new(),
            total_parent_weight: U256::ZERO,
            donation_script,
        }
    }

    /// Rebuild the window from scratch over the given shares (newest last).
    /// O(window); used on startup and for periodic integrity checks.
    pub fn recompute(max_len: usize, donation_script: Vec<u8>, shares: &[WindowShare]) -> Self {
        let mut window = PplnsWindow::new(max_len, donation_script);
        for share in shares.iter().rev().take(max_len).rev() {
            window.push_tip(share.clone());
        }
        window
    }

    /// Add a new tip to the front of the window (the most recent share),
    /// evicting the oldest if the window is now over length.
    pub fn push_tip(&mut self, share: WindowShare) {
        self.add_share_weight(&share);
        self.shares.push_front(share);
        while self.shares.len() > self.max_len {
            if let Some(evicted) = self.shares.pop_back() {
                self.subtract_share_weight(&evicted);
            }
        }
    }

    fn add_share_weight(&mut self, share: &WindowShare) {
        let weight = share_weight(&share.target);
        let donation_weight = split_donation_weight(&weight, share.donation_fraction);
        let miner_weight = weight.checked_sub(&donation_weight).unwrap_or(U256::ZERO);

        add(&mut self.parent_weights, &share.payout_script, miner_weight);
        if !self.donation_script.is_empty() {
            add(&mut self.parent_weights, &self.donation_script, donation_weight);
        } else {
            add(&mut self.parent_weights, &share.payout_script, donation_weight);
        }
        self.total_parent_weight = self
            .total_parent_weight
            .checked_add(&weight)
            .unwrap_or(U256::MAX);
    }

    fn subtract_share_weight(&mut self, share: &WindowShare) {
        let weight = share_weight(&share.target);
        let donation_weight = split_donation_weight(&weight, share.donation_fraction);
        let miner_weight = weight.checked_sub(&donation_weight).unwrap_or(U256::ZERO);

        subtract(&mut self.parent_weights, &share.payout_script, miner_weight);
        if !self.donation_script.is_empty() {
            subtract(&mut self.parent_weights, &self.donation_script, donation_weight);
        } else {
            subtract(&mut self.parent_weights, &share.payout_script, donation_weight);
        }
        self.total_parent_weight = self.total_parent_weight.checked_sub(&weight).unwrap_or(U256::ZERO);
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    /// Normalize the current running weights into a payout list.
    pub fn payouts(&self, subsidy_and_fees: u64) -> Result<Vec<PayoutEntry>, PplnsError> {
        if self.shares.is_empty() {
            return Err(PplnsError::EmptyWindow);
        }
        normalize_weights(&self.parent_weights, self.total_parent_weight, subsidy_and_fees)
    }
}

fn split_donation_weight(weight: &U256, donation_fraction: u16) -> U256 {
    weight.saturating_mul_u64(donation_fraction as u64).div_rem_u64(65535).0
}

fn add(map: &mut HashMap<Vec<u8>, U256>, script: &[u8], weight: U256) {
    if weight.is_zero() {
        return;
    }
    let entry = map.entry(script.to_vec()).or_insert(U256::ZERO);
    *entry = entry.checked_add(&weight).unwrap_or(U256::MAX);
}

fn subtract(map: &mut HashMap<Vec<u8>, U256>, script: &[u8], weight: U256) {
    if weight.is_zero() {
        return;
    }
    if let Some(entry) = map.get_mut(script) {
        *entry = entry.checked_sub(&weight).unwrap_or(U256::ZERO);
        if entry.is_zero() {
            map.remove(script);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn share(byte: u8) -> WindowShare {
        WindowShare {
            share_hash: [byte; 32],
            target: U256([0, 0, 0, 0, 0, 1, 0, 0]),
            payout_script: vec![byte],
            donation_fraction: 0,
            aux_payouts: vec![],
        }
    }

    #[test]
    fn eviction_keeps_window_at_max_len() {
        let mut window = PplnsWindow::new(2, vec![]);
        window.push_tip(share(1));
        window.push_tip(share(2));
        window.push_tip(share(3));
        assert_eq!(window.len(), 2);
        let payouts = window.payouts(1000).unwrap();
        assert!(payouts.iter().all(|p| p.script != vec![1]));
    }

    #[test]
    fn incremental_matches_full_recompute() {
        let shares: Vec<WindowShare> = (1..=5u8).map(share).collect();
        let incremental = {
            let mut w = PplnsWindow::new(3, vec![]);
            for s in &shares {
                w.push_tip(s.clone());
            }
            w.payouts(900).unwrap()
        };
        let recomputed = PplnsWindow::recompute(3, vec![], &shares).payouts(900).unwrap();
        let mut a = incremental;
        let mut b = recomputed;
        a.sort_by(|x, y| x.script.cmp(&y.script));
        b.sort_by(|x, y| x.script.cmp(&y.script));
        assert_eq!(a, b);
    }
}
