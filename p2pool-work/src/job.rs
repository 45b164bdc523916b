//! The mineable job (spec.md §4.5): everything a stratum session (C6/C7)
//! needs to advertise work and, on a submission, rebuild and verify a
//! candidate share.

use p2pool_core::target::U256;
use p2pool_core::tx::TransactionOutput;
use p2pool_core::Hash;
use p2pool_rpc::AuxMode;

use crate::coinbase::CoinbaseParts;

/// What a submission pipeline needs to try submitting a winning share as an
/// aux-chain block, captured at job-composition time since by submission
/// time the aux node's own template may have moved on.
#[derive(Debug, Clone)]
pub struct AuxContext {
    pub mode: AuxMode,
    /// The aux block hash `getauxblock`/`getblocktemplate` returned when this
    /// job was composed (legacy mode submits against this, not a fresh one).
    pub template_hash: String,
    pub chain_id: u32,
    pub target: U256,
}

#[derive(Debug, Clone)]
pub struct MiningJob {
    pub job_id: String,
    pub height: u64,
    /// The parent block's own version field (not the share's).
    pub version: i32,
    pub prev_hash: Hash,
    /// The parent chain's real consensus difficulty at this height — a
    /// submission only becomes an actual parent block if it also meets
    /// this, separately from the much easier `share_bits` target.
    pub parent_bits: u32,
    /// This share's own (p2pool-retargeted) difficulty target.
    pub share_bits: u32,
    pub timestamp: u32,
    pub coinbase: CoinbaseParts,
    pub coinbase_tag: Vec<u8>,
    pub outputs: Vec<TransactionOutput>,
    pub merkle_siblings: Vec<Hash>,
    /// Raw wire bytes of every non-coinbase transaction in template order,
    /// needed to reassemble a full submittable parent block once a
    /// submission meets the parent-chain target (the coinbase alone is not
    /// a block).
    pub other_tx_raw: Vec<Vec<u8>>,
    /// Present only when merged mining with an aux chain is configured and
    /// that aux chain's node answered with a usable target.
    pub aux: Option<AuxContext>,
    pub reference_hash: Hash,
    pub predecessor: Option<Hash>,
    pub far_predecessor: Option<Hash>,
    pub absheight: u64,
    pub abswork: U256,
    pub payout_script: Vec<u8>,
    pub donation_fraction: u16,
    pub node_fee_fraction: u16,
    pub node_fee_script: Vec<u8>,
    pub desired_version: u16,
    /// Set on the first job issued after the parent tip (or share tip)
    /// changes; a stratum session must discard in-flight shares for
    /// previous jobs when it sees this (spec.md §4.6).
    pub clean_jobs: bool,
    pub created_at: u32,
}
