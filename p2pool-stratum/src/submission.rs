//! Submission pipeline (C7, spec.md §4.7): turns a `mining.submit` call into
//! a verified share, and — when the proof-of-work clears harder targets —
//! an aux-chain or parent-chain block submission.
//!
//! Grounded on the teacher's `mining/src/lib.rs::process_submission` for the
//! overall job-lookup/reconstruct/hash/compare shape, generalized from a
//! single accept/reject outcome into the five-tier ladder spec.md §4.7
//! requires (connection share target, optional pseudoshare target, P2Pool's
//! own network-share target, aux-chain target, parent-chain target), and
//! from the teacher's single pre-built coinbase into C5's prefix/suffix
//! splice plus C1's Merkle-link replay.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::sync::Mutex;

use p2pool_consensus::{cheap_verify, contextual_verify, NetworkParams, ParentPow};
use p2pool_core::codec::encode_varint;
use p2pool_core::header::{MerkleLink, ParentHeader};
use p2pool_core::share::{AuxPayout, Share, ShareInfo, ShareVariant};
use p2pool_core::target::{bits_to_target, U256};
use p2pool_core::tx::Transaction;
use p2pool_core::Hash;
use p2pool_rpc::{AuxMode, AuxRpc, AuxTemplate, ParentP2pBroadcaster, ParentRpc};
use p2pool_work::{coinbase, JobCache, MiningJob};
use tracker::Tracker;

use crate::difficulty::difficulty_to_target;
use crate::error::StratumError;
use crate::session::SessionState;

/// How far behind a job's own timestamp a submitted `ntime` may fall — best
/// effort, since spec.md leaves the exact tolerance to the parent chain's
/// own consensus rules; this mirrors Bitcoin's conventional median-time
/// slack rather than a value taken from any parent node response.
pub const NTIME_BACKWARD_TOLERANCE_SECONDS: u32 = 7200;

pub const DEFAULT_DUPLICATE_CACHE_CAPACITY: usize = 8192;

/// A broadcast seam for a locally-found network share: the peer layer (C8)
/// implements this to gossip it to the rest of the p2pool network.
pub trait ShareBroadcaster: Send + Sync {
    fn broadcast(&self, share: &Share);
}

#[derive(Debug, Clone)]
pub struct SubmissionParams {
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
    /// The bits the miner rolled, already masked to the negotiated
    /// version-rolling mask by the caller.
    pub version_bits: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    StaleJob,
    Duplicate,
    MalformedSubmission,
    BadTimestamp,
    BelowShareTarget,
}

impl RejectReason {
    /// The exact error string spec.md §4.6 specifies for `mining.submit`
    /// failures.
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::StaleJob => "stale job",
            RejectReason::Duplicate => "duplicate share",
            RejectReason::MalformedSubmission => "malformed submission",
            RejectReason::BadTimestamp => "ntime out of range",
            RejectReason::BelowShareTarget => "low difficulty share",
        }
    }

    /// The stratum error code paired with `message()` in the wire reply.
    pub fn code(&self) -> i32 {
        match self {
            RejectReason::StaleJob => 21,
            RejectReason::Duplicate => 22,
            RejectReason::MalformedSubmission => 20,
            RejectReason::BadTimestamp => 20,
            RejectReason::BelowShareTarget => 23,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub met_pseudoshare_target: bool,
    pub became_network_share: bool,
    pub became_aux_block: bool,
    pub became_parent_block: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    Accepted(SubmitOutcome),
    Rejected(RejectReason),
}

type DupKey = (String, Vec<u8>, u32, u32, Option<u32>);

/// Bounded dedup set, oldest-evicted, keyed on exactly the fields spec.md
/// §4.7 names: `(job_id, extranonce2, ntime, nonce, version_bits)`.
pub struct DuplicateCache {
    capacity: usize,
    seen: Mutex<HashSet<DupKey>>,
    order: Mutex<VecDeque<DupKey>>,
}

impl DuplicateCache {
    pub fn new(capacity: usize) -> Self {
        DuplicateCache {
            capacity,
            seen: Mutex::new(HashSet::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }

    /// Returns `true` if this key was already seen (and the submission must
    /// be rejected as a duplicate); otherwise records it and returns `false`.
    pub async fn check_and_insert(&self, key: DupKey) -> bool {
        {
            let mut seen = self.seen.lock().await;
            if seen.contains(&key) {
                return true;
            }
            seen.insert(key.clone());
        }
        let mut order = self.order.lock().await;
        order.push_back(key);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.seen.lock().await.remove(&oldest);
            }
        }
        false
    }
}

pub struct SubmissionPipeline {
    job_cache: Arc<JobCache>,
    tracker: Tracker,
    params: NetworkParams,
    pow: Arc<dyn ParentPow>,
    parent_rpc: Arc<ParentRpc>,
    parent_p2p: Option<Arc<ParentP2pBroadcaster>>,
    aux_rpc: Option<Arc<AuxRpc>>,
    accepted_versions: HashSet<u16>,
    broadcaster: Option<Arc<dyn ShareBroadcaster>>,
    duplicates: DuplicateCache,
    donation_script: Vec<u8>,
}

impl SubmissionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_cache: Arc<JobCache>,
        tracker: Tracker,
        params: NetworkParams,
        pow: Arc<dyn ParentPow>,
        parent_rpc: Arc<ParentRpc>,
        parent_p2p: Option<Arc<ParentP2pBroadcaster>>,
        aux_rpc: Option<Arc<AuxRpc>>,
        accepted_versions: HashSet<u16>,
        broadcaster: Option<Arc<dyn ShareBroadcaster>>,
        donation_script: Vec<u8>,
    ) -> Self {
        SubmissionPipeline {
            job_cache,
            tracker,
            params,
            pow,
            parent_rpc,
            parent_p2p,
            aux_rpc,
            accepted_versions,
            broadcaster,
            duplicates: DuplicateCache::new(DEFAULT_DUPLICATE_CACHE_CAPACITY),
            donation_script,
        }
    }

    /// Step 1-7 of spec.md §4.7, in order.
    pub async fn submit(
        &self,
        session: &SessionState,
        params: SubmissionParams,
    ) -> Result<SubmitResult, StratumError> {
        // Step 7 happens first: a duplicate never even reaches job lookup.
        let dup_key = (
            params.job_id.clone(),
            params.extranonce2.clone(),
            params.ntime,
            params.nonce,
            params.version_bits,
        );
        if self.duplicates.check_and_insert(dup_key).await {
            return Ok(SubmitResult::Rejected(RejectReason::Duplicate));
        }

        // Step 1.
        let Some(job) = self.job_cache.get(&params.job_id).await else {
            return Ok(SubmitResult::Rejected(RejectReason::StaleJob));
        };

        // Step 2.
        let mut extranonce = session.extranonce1.clone();
        extranonce.extend_from_slice(&params.extranonce2);
        let Some(coinbase_raw) = job.coinbase.assemble(&extranonce) else {
            return Ok(SubmitResult::Rejected(RejectReason::MalformedSubmission));
        };
        let coinbase_txid = p2pool_crypto::sha256d(&coinbase_raw);

        // Step 3.
        let link = MerkleLink {
            siblings: job.merkle_siblings.clone(),
        };
        let merkle_root = link.apply(coinbase_txid, sha256d_pair);

        // Step 4.
        let version = match session.version_rolling_mask {
            Some(mask) => (job.version as u32 & !mask) | (params.version_bits.unwrap_or(0) & mask),
            None => job.version as u32,
        };

        let lower = job.timestamp.saturating_sub(NTIME_BACKWARD_TOLERANCE_SECONDS);
        let upper = p2pool_core::current_timestamp() as u32 + self.params.max_future_drift as u32;
        if params.ntime < lower || params.ntime > upper {
            return Ok(SubmitResult::Rejected(RejectReason::BadTimestamp));
        }

        let header = ParentHeader {
            version,
            prev_hash: job.prev_hash,
            merkle_root,
            timestamp: params.ntime,
            bits: job.parent_bits,
            nonce: params.nonce,
        };

        // Step 5.
        let pow_hash = self.pow.hash_header(&header);
        let pow_value = U256::from_be_bytes(&reversed(&pow_hash));

        // Step 6, tier one: the connection's own share target. Anything
        // weaker is not even a pseudoshare.
        let share_target = difficulty_to_target(session.share_difficulty, &self.params.max_target());
        if pow_value.cmp(&share_target) == Ordering::Greater {
            return Ok(SubmitResult::Rejected(RejectReason::BelowShareTarget));
        }

        // Tier two (optional): recorded for hashrate estimation only, and
        // does not gate the harder tiers below — a share can clear every
        // tier in one submission.
        let met_pseudoshare_target = match session.pseudoshare_difficulty {
            Some(diff) => {
                let pseudo_target = difficulty_to_target(diff, &self.params.max_target());
                pow_value.cmp(&pseudo_target) != Ordering::Greater
            }
            None => false,
        };

        let coinbase_tx = coinbase::assemble_transaction(
            job.height,
            &job.coinbase_tag,
            &extranonce,
            &job.outputs,
            0,
        );

        // Tier three: P2Pool's own network-share target.
        let mut became_network_share = false;
        let network_share_target = bits_to_target(job.share_bits);
        if pow_value.cmp(&network_share_target) != Ordering::Greater {
            became_network_share = self
                .try_accept_network_share(&job, &header, &coinbase_tx, &link)
                .await?;
        }

        // Tier four: the merged aux chain, if configured and its target is
        // cached on this job.
        let mut became_aux_block = false;
        if let (Some(aux_rpc), Some(aux_ctx)) = (&self.aux_rpc, &job.aux) {
            if pow_value.cmp(&aux_ctx.target) != Ordering::Greater {
                became_aux_block = submit_aux_block(aux_rpc, aux_ctx, &coinbase_raw, &header, &job.merkle_siblings).await;
            }
        }

        // Tier five: a genuine parent-chain block.
        let mut became_parent_block = false;
        let parent_target = bits_to_target(job.parent_bits);
        if pow_value.cmp(&parent_target) != Ordering::Greater {
            became_parent_block = self.submit_parent_block(&header, &coinbase_tx, &job).await;
        }

        Ok(SubmitResult::Accepted(SubmitOutcome {
            met_pseudoshare_target,
            became_network_share,
            became_aux_block,
            became_parent_block,
        }))
    }

    async fn try_accept_network_share(
        &self,
        job: &MiningJob,
        header: &ParentHeader,
        coinbase_tx: &Transaction,
        link: &MerkleLink,
    ) -> Result<bool, StratumError> {
        let info = ShareInfo {
            predecessor: job.predecessor,
            far_predecessor: job.far_predecessor,
            bits: job.share_bits,
            timestamp: header.timestamp,
            absheight: job.absheight,
            abswork: job.abswork,
            payout_script: job.payout_script.clone(),
            new_transaction_hashes: vec![],
            desired_version: job.desired_version,
            donation_fraction: job.donation_fraction,
            node_fee_fraction: job.node_fee_fraction,
            node_fee_script: job.node_fee_script.clone(),
        };
        let aux_payouts = Vec::<AuxPayout>::new();
        let share = Share {
            parent_header: header.clone(),
            coinbase: coinbase_tx.clone(),
            merkle_link: link.clone(),
            info: ShareVariant::V36 {
                info,
                aux_payouts,
            },
        };

        let predecessor_timestamp = match job.predecessor {
            Some(pred) => self
                .tracker
                .get_entry(&pred)
                .await
                .map(|e| e.share.info.info().timestamp),
            None => None,
        };
        cheap_verify(&share, &self.params, self.pow.as_ref(), &self.accepted_versions, predecessor_timestamp)?;

        if let Some(pred_hash) = job.predecessor {
            if let Some(pred_entry) = self.tracker.get_entry(&pred_hash).await {
                let window = self
                    .tracker
                    .retarget_window(pred_hash, self.params.target_lookbehind)
                    .await;
                let payout_window = self
                    .tracker
                    .window_shares(pred_hash, self.params.real_chain_length as usize)
                    .await;
                let far_predecessor_candidate = self
                    .tracker
                    .far_predecessor(pred_hash, self.params.chain_length)
                    .await;
                contextual_verify(
                    &share,
                    pred_entry.absheight,
                    pred_entry.abswork,
                    far_predecessor_candidate,
                    &window,
                    &payout_window,
                    &self.donation_script,
                    &self.params,
                )?;
            }
        }

        match self.tracker.insert(share.clone(), true).await {
            Ok(_) => {
                if let Some(broadcaster) = &self.broadcaster {
                    broadcaster.broadcast(&share);
                }
                Ok(true)
            }
            Err(tracker::TrackerError::Duplicate(_)) => Ok(false),
            Err(err) => {
                log::warn!("locally-found share rejected by tracker: {err}");
                Ok(false)
            }
        }
    }

    async fn submit_parent_block(&self, header: &ParentHeader, coinbase_tx: &Transaction, job: &MiningJob) -> bool {
        let raw_block = serialize_wire_block(header, coinbase_tx, &job.other_tx_raw);
        if let Some(p2p) = &self.parent_p2p {
            if let Err(err) = p2p.broadcast_block(&raw_block).await {
                log::warn!("direct P2P block broadcast failed: {err}");
            }
        }
        match self.parent_rpc.submit_block(&hex::encode(raw_block)).await {
            Ok(_) => true,
            Err(err) => {
                log::warn!("parent-chain block submission failed: {err}");
                false
            }
        }
    }
}

fn sha256d_pair(a: &Hash, b: &Hash) -> Hash {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(a);
    buf.extend_from_slice(b);
    p2pool_crypto::sha256d(&buf)
}

fn reversed(hash: &Hash) -> Hash {
    let mut out = *hash;
    out.reverse();
    out
}

async fn submit_aux_block(
    aux_rpc: &AuxRpc,
    aux_ctx: &p2pool_work::AuxContext,
    coinbase_raw: &[u8],
    header: &ParentHeader,
    coinbase_branch: &[Hash],
) -> bool {
    let payload_hex = build_auxpow_hex(coinbase_raw, header, coinbase_branch);
    let template = AuxTemplate {
        mode: aux_ctx.mode,
        hash: aux_ctx.template_hash.clone(),
        chain_id: aux_ctx.chain_id,
        target: String::new(),
        coinbase_template: None,
    };
    match aux_rpc.submit(&template, &payload_hex).await {
        Ok(_) => true,
        Err(err) => {
            log::warn!("aux-chain block submission failed: {err}");
            false
        }
    }
}

/// Namecoin-style AuxPow serialization: coinbase, the parent block's own
/// hash, the coinbase's Merkle branch into the parent block (side mask zero
/// since the coinbase is always leaf 0), an empty aux-chain-tree branch
/// (best-effort: correct only for a single configured aux chain, the same
/// limitation C5's `merge_mining_tag` documents), and the parent header.
fn build_auxpow_hex(coinbase_raw: &[u8], header: &ParentHeader, coinbase_branch: &[Hash]) -> String {
    let wire_header = serialize_wire_header(header);
    let parent_block_hash = p2pool_crypto::sha256d(&wire_header);

    let mut buf = BytesMut::new();
    encode_varint(coinbase_raw.len() as u64, &mut buf);
    buf.extend_from_slice(coinbase_raw);
    buf.extend_from_slice(&parent_block_hash);

    encode_varint(coinbase_branch.len() as u64, &mut buf);
    for sibling in coinbase_branch {
        buf.extend_from_slice(sibling);
    }
    buf.put_u32_le(0); // coinbase branch side mask: coinbase is always index 0

    encode_varint(0u64, &mut buf); // aux-chain branch: empty (single aux chain)
    buf.put_u32_le(0); // aux-chain branch side mask
    buf.put_u32_le(0); // merge-mining tree index

    buf.extend_from_slice(&wire_header);
    hex::encode(buf)
}

/// Classic fixed-width Bitcoin wire serialization, distinct from C1's
/// varint-based `ParentHeader::encode`/`Transaction::encode` (which exist
/// purely to give proof-of-work and target comparisons a stable byte
/// representation): `submitblock` and auxpow payloads need the real wire
/// format every parent-chain node expects on the other end of the RPC.
fn serialize_wire_header(header: &ParentHeader) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(80);
    buf.put_u32_le(header.version);
    buf.extend_from_slice(&header.prev_hash);
    buf.extend_from_slice(&header.merkle_root);
    buf.put_u32_le(header.timestamp);
    buf.put_u32_le(header.bits);
    buf.put_u32_le(header.nonce);
    buf.to_vec()
}

fn serialize_wire_tx(tx: &Transaction) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u32_le(tx.version);
    encode_varint(tx.inputs.len() as u64, &mut buf);
    for input in &tx.inputs {
        buf.extend_from_slice(&input.prev_txid);
        buf.put_u32_le(input.prev_vout);
        encode_varint(input.script_sig.len() as u64, &mut buf);
        buf.extend_from_slice(&input.script_sig);
        buf.put_u32_le(input.sequence);
    }
    encode_varint(tx.outputs.len() as u64, &mut buf);
    for output in &tx.outputs {
        buf.put_u64_le(output.value);
        encode_varint(output.script_pubkey.len() as u64, &mut buf);
        buf.extend_from_slice(&output.script_pubkey);
    }
    buf.put_u32_le(tx.lock_time);
    buf.to_vec()
}

fn serialize_wire_block(header: &ParentHeader, coinbase_tx: &Transaction, other_tx_raw: &[Vec<u8>]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&serialize_wire_header(header));
    encode_varint(1 + other_tx_raw.len() as u64, &mut buf);
    buf.extend_from_slice(&serialize_wire_tx(coinbase_tx));
    for raw in other_tx_raw {
        buf.extend_from_slice(raw);
    }
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reasons_match_spec_error_strings() {
        assert_eq!(RejectReason::StaleJob.message(), "stale job");
    }

    #[tokio::test]
    async fn duplicate_cache_flags_repeated_key() {
        let cache = DuplicateCache::new(4);
        let key: DupKey = ("job".to_string(), vec![1, 2], 100, 7, None);
        assert!(!cache.check_and_insert(key.clone()).await);
        assert!(cache.check_and_insert(key).await);
    }

    #[tokio::test]
    async fn duplicate_cache_evicts_oldest_past_capacity() {
        let cache = DuplicateCache::new(2);
        for i in 0u32..3 {
            let key: DupKey = ("job".to_string(), vec![], i, 0, None);
            assert!(!cache.check_and_insert(key).await);
        }
        // The first key was evicted to make room, so it is accepted again.
        let first_again: DupKey = ("job".to_string(), vec![], 0, 0, None);
        assert!(!cache.check_and_insert(first_again).await);
    }

    #[test]
    fn wire_header_is_exactly_eighty_bytes() {
        let header = ParentHeader {
            version: 536870912,
            prev_hash: [1u8; 32],
            merkle_root: [2u8; 32],
            timestamp: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 99,
        };
        assert_eq!(serialize_wire_header(&header).len(), 80);
    }

    #[test]
    fn wire_block_concatenates_header_tx_count_and_transactions() {
        let header = ParentHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            timestamp: 0,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        let coinbase = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![],
            lock_time: 0,
        };
        let other = vec![vec![0xaa, 0xbb]];
        let block = serialize_wire_block(&header, &coinbase, &other);
        assert!(block.len() > 80);
        assert!(block.windows(2).any(|w| w == [0xaa, 0xbb]));
    }
}
