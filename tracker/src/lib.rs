//! Share-chain DAG index (spec.md §4.2, "the tracker"): hash → entry map,
//! hash → children map, the current tip set, memoized cumulative work, and
//! an orphan queue for shares that arrive before their predecessor.
//!
//! Grounded on the teacher's `BlockStore`/`MemoryBlockStore` shape (an
//! async-trait interface over `tokio::sync::RwLock<HashMap<...>>` fields),
//! generalized from a single best-chain index to a DAG with an explicit tip
//! set and cumulative-work tie-break.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::RwLock;

use p2pool_consensus::RetargetWindow;
use p2pool_core::share::Share;
use p2pool_core::target::U256;
use p2pool_core::{current_timestamp, Hash};
use p2pool_pplns::WindowShare;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("share {0:x?} already present")]
    Duplicate(Hash),
    #[error("predecessor of share {0:x?} is unknown")]
    Orphan(Hash),
    #[error("share {0:x?} descends from a known-invalid ancestor")]
    Above(Hash),
}

/// A stored share plus the chain-position bookkeeping the tracker computes
/// at insert time.
#[derive(Debug, Clone)]
pub struct ChainEntry {
    pub share: Arc<Share>,
    pub predecessor: Option<Hash>,
    pub abswork: U256,
    pub absheight: u64,
    pub verified: bool,
    pub known_invalid: bool,
    pub inserted_at: u64,
}

#[derive(Default)]
struct Index {
    entries: HashMap<Hash, ChainEntry>,
    children: HashMap<Hash, Vec<Hash>>,
    tips: HashSet<Hash>,
    orphans: HashMap<Hash, Vec<Arc<Share>>>,
}

/// The DAG index. Cloning a `Tracker` is cheap (it's an `Arc` handle) and
/// every clone shares the same underlying state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<RwLock<Index>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Tracker {
            inner: Arc::new(RwLock::new(Index::default())),
        }
    }

    /// Insert a share whose `C3` verification has already run (or is being
    /// deferred — `verified` records which). Genesis shares have no
    /// predecessor. Queues the share in the orphan table if its predecessor
    /// is not yet known, to be drained by `insert`'s own recursive pass when
    /// the predecessor later arrives.
    pub async fn insert(&self, share: Share, verified: bool) -> Result<Hash, TrackerError> {
        let hash = share.share_hash();
        let share = Arc::new(share);
        let mut index = self.inner.write().await;
        self.insert_locked(&mut index, share, verified)?;
        Ok(hash)
    }

    fn insert_locked(
        &self,
        index: &mut Index,
        share: Arc<Share>,
        verified: bool,
    ) -> Result<Hash, TrackerError> {
        let hash = share.share_hash();
        if index.entries.contains_key(&hash) {
            return Err(TrackerError::Duplicate(hash));
        }

        let info = share.info.info();
        let (abswork, predecessor) = match info.predecessor {
            None => (p2pool_core::target::U256::work_from_target(&p2pool_core::target::bits_to_target(info.bits)), None),
            Some(pred_hash) => {
                let pred = match index.entries.get(&pred_hash) {
                    Some(pred) => pred,
                    None => {
                        index.orphans.entry(pred_hash).or_default().push(share.clone());
                        return Err(TrackerError::Orphan(hash));
                    }
                };
                if pred.known_invalid {
                    return Err(TrackerError::Above(hash));
                }
                let share_work = U256::work_from_target(&p2pool_core::target::bits_to_target(info.bits));
                let abswork = pred
                    .abswork
                    .checked_add(&share_work)
                    .unwrap_or(U256::MAX);
                (abswork, Some(pred_hash))
            }
        };

        let entry = ChainEntry {
            share: share.clone(),
            predecessor,
            abswork,
            absheight: info.absheight,
            verified,
            known_invalid: false,
            inserted_at: current_timestamp(),
        };

        if let Some(pred_hash) = predecessor {
            index.tips.remove(&pred_hash);
            index.children.entry(pred_hash).or_default().push(hash);
        }
        index.tips.insert(hash);
        index.entries.insert(hash, entry);
        debug!("tracker: inserted share {:x?} at absheight {}", hash, info.absheight);

        if let Some(waiting) = index.orphans.remove(&hash) {
            for child in waiting {
                let child_hash = child.share_hash();
                if let Err(err) = self.insert_locked(index, child, false) {
                    warn!("orphan {:x?} failed to attach after parent arrived: {}", child_hash, err);
                }
            }
        }

        Ok(hash)
    }

    /// Mark a share (and transitively, anything already indexed as its
    /// descendant) known-invalid, so future inserts under it are rejected
    /// with `ErrAbove`.
    pub async fn mark_invalid(&self, hash: Hash) {
        let mut index = self.inner.write().await;
        let mut stack = vec![hash];
        while let Some(h) = stack.pop() {
            if let Some(entry) = index.entries.get_mut(&h) {
                entry.known_invalid = true;
            }
            if let Some(children) = index.children.get(&h) {
                stack.extend(children.iter().copied());
            }
        }
    }

    /// The tip with maximum cumulative work; ties broken by higher
    /// `absheight`, then by lexicographically lower hash.
    pub async fn best_tip(&self) -> Option<Hash> {
        let index = self.inner.read().await;
        index
            .tips
            .iter()
            .filter_map(|h| index.entries.get(h).map(|e| (*h, e)))
            .max_by(|(hash_a, a), (hash_b, b)| {
                a.abswork
                    .cmp(&b.abswork)
                    .then_with(|| a.absheight.cmp(&b.absheight))
                    .then_with(|| hash_b.cmp(hash_a))
            })
            .map(|(h, _)| h)
    }

    pub async fn get_entry(&self, hash: &Hash) -> Option<ChainEntry> {
        self.inner.read().await.entries.get(hash).cloned()
    }

    /// The last `n` shares ending at `tip`, newest-first; short if fewer
    /// shares exist in the chain.
    pub async fn get_chain(&self, tip: Hash, n: usize) -> Vec<ChainEntry> {
        let index = self.inner.read().await;
        let mut out = Vec::with_capacity(n);
        let mut cursor = Some(tip);
        while out.len() < n {
            let Some(hash) = cursor else { break };
            let Some(entry) = index.entries.get(&hash) else { break };
            cursor = entry.predecessor;
            out.push(entry.clone());
        }
        out
    }

    /// The checkpoint hash a fixed `offset` shares behind `tip`, used as the
    /// far-predecessor commitment (spec.md §3 invariant 7: "the
    /// far-predecessor checkpoint at a fixed offset matches the chain").
    /// `None` when the chain behind `tip` is shorter than `offset`, which is
    /// expected and valid near genesis.
    pub async fn far_predecessor(&self, tip: Hash, offset: u64) -> Option<Hash> {
        let entries = self.get_chain(tip, offset as usize + 1).await;
        if entries.len() == offset as usize + 1 {
            entries.last().map(|e| e.share.share_hash())
        } else {
            None
        }
    }

    /// Build the `RetargetWindow` input `p2pool_consensus::validator::retarget`
    /// needs from the last `lookbehind + 1` shares ending at `tip`.
    pub async fn retarget_window(&self, tip: Hash, lookbehind: u64) -> RetargetWindow {
        let entries = self.get_chain(tip, lookbehind as usize + 1).await;
        let mut timestamps: Vec<u32> = entries.iter().map(|e| e.share.info.info().timestamp).collect();
        let mut bits: Vec<u32> = entries.iter().map(|e| e.share.info.info().bits).collect();
        timestamps.reverse();
        bits.reverse();
        RetargetWindow { timestamps, bits }
    }

    /// Shares from the last `n` ending at `tip`, in the shape the PPLNS
    /// accountant consumes.
    pub async fn window_shares(&self, tip: Hash, n: usize) -> Vec<WindowShare> {
        self.get_chain(tip, n)
            .await
            .into_iter()
            .map(|entry| {
                let info = entry.share.info.info();
                WindowShare {
                    share_hash: entry.share.share_hash(),
                    target: p2pool_core::target::bits_to_target(info.bits),
                    payout_script: info.payout_script.clone(),
                    donation_fraction: info.donation_fraction,
                    aux_payouts: entry
                        .share
                        .info
                        .aux_payouts()
                        .iter()
                        .map(|p| (p.aux_chain_id, p.payout_script.clone()))
                        .collect(),
                }
            })
            .collect()
    }

    /// Lowest common ancestor of two shares by walking both chains back to
    /// genesis and finding the first shared hash.
    pub async fn common_ancestor(&self, h1: Hash, h2: Hash) -> Option<Hash> {
        let index = self.inner.read().await;
        let mut ancestors_of_1 = HashSet::new();
        let mut cursor = Some(h1);
        while let Some(h) = cursor {
            ancestors_of_1.insert(h);
            cursor = index.entries.get(&h).and_then(|e| e.predecessor);
        }
        let mut cursor = Some(h2);
        while let Some(h) = cursor {
            if ancestors_of_1.contains(&h) {
                return Some(h);
            }
            cursor = index.entries.get(&h).and_then(|e| e.predecessor);
        }
        None
    }

    /// The shares to disconnect (old_tip side) and connect (new_tip side)
    /// when switching best tips, ordered oldest-first on each side.
    pub async fn reorg_range(&self, old_tip: Hash, new_tip: Hash) -> (Vec<Hash>, Vec<Hash>) {
        let Some(ancestor) = self.common_ancestor(old_tip, new_tip).await else {
            return (Vec::new(), Vec::new());
        };
        let index = self.inner.read().await;
        let disconnect = path_to_ancestor(&index.entries, old_tip, ancestor);
        let connect = path_to_ancestor(&index.entries, new_tip, ancestor);
        (disconnect, connect)
    }

    /// Remove entries whose depth from `best_tip` exceeds `retention`.
    /// Returns the pruned entries so the caller (the spool) can archive
    /// them before they're dropped.
    pub async fn prune(&self, best_tip: Hash, retention: u64) -> Vec<ChainEntry> {
        let mut index = self.inner.write().await;
        let cutoff_height = index
            .entries
            .get(&best_tip)
            .map(|e| e.absheight.saturating_sub(retention));
        let Some(cutoff_height) = cutoff_height else {
            return Vec::new();
        };

        let stale: Vec<Hash> = index
            .entries
            .iter()
            .filter(|(_, e)| e.absheight < cutoff_height)
            .map(|(h, _)| *h)
            .collect();

        let mut pruned = Vec::with_capacity(stale.len());
        for hash in stale {
            if let Some(entry) = index.entries.remove(&hash) {
                index.tips.remove(&hash);
                if let Some(pred) = entry.predecessor {
                    if let Some(children) = index.children.get_mut(&pred) {
                        children.retain(|c| c != &hash);
                    }
                }
                index.children.remove(&hash);
                pruned.push(entry);
            }
        }
        info!("tracker: pruned {} shares below absheight {}", pruned.len(), cutoff_height);
        pruned
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn path_to_ancestor(entries: &HashMap<Hash, ChainEntry>, from: Hash, ancestor: Hash) -> Vec<Hash> {
    let mut path = Vec::new();
    let mut cursor = Some(from);
    while let Some(h) = cursor {
        if h == ancestor {
            break;
        }
        path.push(h);
        cursor = entries.get(&h).and_then(|e| e.predecessor);
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pool_core::header::{MerkleLink, ParentHeader};
    use p2pool_core::share::{ShareInfo, ShareVariant};
    use p2pool_core::tx::Transaction;

    fn make_share(predecessor: Option<Hash>, absheight: u64, nonce: u32) -> Share {
        let info = ShareInfo {
            predecessor,
            far_predecessor: None,
            bits: 0x2100ffff,
            timestamp: 1_700_000_000 + absheight as u32,
            absheight,
            abswork: U256::ZERO,
            payout_script: vec![0xaa],
            new_transaction_hashes: vec![],
            desired_version: 36,
            donation_fraction: 0,
            node_fee_fraction: 0,
            node_fee_script: vec![],
        };
        Share {
            parent_header: ParentHeader {
                version: 1,
                prev_hash: predecessor.unwrap_or([0u8; 32]),
                merkle_root: [absheight as u8; 32],
                timestamp: info.timestamp,
                bits: info.bits,
                nonce,
            },
            coinbase: Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![],
                lock_time: 0,
            },
            merkle_link: MerkleLink::default(),
            info: ShareVariant::V36 {
                info,
                aux_payouts: vec![],
            },
        }
    }

    #[tokio::test]
    async fn genesis_then_child_becomes_best_tip() {
        let tracker = Tracker::new();
        let genesis = make_share(None, 0, 1);
        let genesis_hash = tracker.insert(genesis, true).await.unwrap();
        assert_eq!(tracker.best_tip().await, Some(genesis_hash));

        let child = make_share(Some(genesis_hash), 1, 2);
        let child_hash = tracker.insert(child, true).await.unwrap();
        assert_eq!(tracker.best_tip().await, Some(child_hash));
    }

    #[tokio::test]
    async fn orphan_attaches_once_predecessor_arrives() {
        let tracker = Tracker::new();
        let genesis = make_share(None, 0, 1);
        let genesis_hash = genesis.share_hash();
        let child = make_share(Some(genesis_hash), 1, 2);
        let child_hash = child.share_hash();

        let err = tracker.insert(child, true).await.unwrap_err();
        assert!(matches!(err, TrackerError::Orphan(_)));

        tracker.insert(genesis, true).await.unwrap();
        assert!(tracker.get_entry(&child_hash).await.is_some());
        assert_eq!(tracker.best_tip().await, Some(child_hash));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let tracker = Tracker::new();
        let genesis = make_share(None, 0, 1);
        let genesis_clone = genesis.clone();
        tracker.insert(genesis, true).await.unwrap();
        let err = tracker.insert(genesis_clone, true).await.unwrap_err();
        assert!(matches!(err, TrackerError::Duplicate(_)));
    }

    #[tokio::test]
    async fn prune_drops_entries_below_retention() {
        let tracker = Tracker::new();
        let mut prev = None;
        let mut last_hash = [0u8; 32];
        for height in 0..10u64 {
            let share = make_share(prev, height, height as u32 + 1);
            last_hash = tracker.insert(share, true).await.unwrap();
            prev = Some(last_hash);
        }
        let pruned = tracker.prune(last_hash, 3).await;
        assert!(!pruned.is_empty());
        assert_eq!(tracker.len().await, 10 - pruned.len());
    }
}
