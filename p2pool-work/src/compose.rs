//! Work composition (C5): fetch the parent (and optional aux) template,
//! combine it with the tracker's current best tip and the PPLNS payout map,
//! and assemble a mineable job.
//!
//! Grounded on the teacher's `MiningJobManager::create_job`, generalized so
//! the hardcoded extranonce splice offset becomes an explicit field on
//! `MiningJob` and the coinbase's metadata commitment replaces the teacher's
//! single fixed payout address.

use std::sync::atomic::{AtomicU64, Ordering};

use p2pool_consensus::{retarget, NetworkParams};
use p2pool_core::share::{ShareInfo, ShareVariant};
use p2pool_core::target::{bits_to_target, U256};
use p2pool_core::Hash;
use p2pool_pplns::{compute_payout_map, PayoutEntry};
use p2pool_rpc::{AuxRpc, ParentRpc};
use tracker::Tracker;

use crate::coinbase::{build_outputs, merge_mining_tag, raw_coinbase_halves};
use crate::error::WorkError;
use crate::job::{AuxContext, MiningJob};
use crate::merkle::{coinbase_merkle_branch, Sha256dMerkleHasher};

/// The miner identity a job is scoped to. Unlike the teacher's single
/// pool-wide `mining_address`, P2Pool's coinbase must commit to this
/// particular share's own author before mining can start, so jobs are
/// issued per distinct `(payout_script, donation_fraction, desired_version)`
/// rather than broadcast identically to every connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FinderContext {
    pub payout_script: Vec<u8>,
    pub donation_fraction: u16,
    pub desired_version: u16,
}

/// The operator's own cut (spec.md §6's "Node fee" option group), taken off
/// the top of the subsidy before PPLNS distribution — the same "split
/// before distribution" idiom the author donation fraction uses, but
/// pool-wide rather than carried per-share in `mining.authorize`.
#[derive(Debug, Clone)]
pub struct NodeFeeConfig {
    /// Out of 65535, matching `ShareInfo::donation_fraction`'s scale.
    pub fraction: u16,
    pub script: Vec<u8>,
}

pub struct WorkComposer {
    parent: ParentRpc,
    aux: Option<AuxRpc>,
    tracker: Tracker,
    params: NetworkParams,
    donation_script: Vec<u8>,
    node_fee: Option<NodeFeeConfig>,
    extranonce_len: usize,
    coinbase_tag: Vec<u8>,
    job_counter: AtomicU64,
}

impl WorkComposer {
    pub fn new(
        parent: ParentRpc,
        aux: Option<AuxRpc>,
        tracker: Tracker,
        params: NetworkParams,
        donation_script: Vec<u8>,
        node_fee: Option<NodeFeeConfig>,
        extranonce_len: usize,
        coinbase_tag: Vec<u8>,
    ) -> Self {
        WorkComposer {
            parent,
            aux,
            tracker,
            params,
            donation_script,
            node_fee,
            extranonce_len,
            coinbase_tag,
            job_counter: AtomicU64::new(0),
        }
    }

    pub async fn compose(&self, finder: &FinderContext, clean_jobs: bool) -> Result<MiningJob, WorkError> {
        let template = self.parent.get_block_template(&["segwit"]).await?;

        let prev_hash = parse_rpc_hash(&template.previousblockhash)?;
        let parent_bits = parse_hex_u32(&template.bits)?;

        let best_tip = self.tracker.best_tip().await;
        let predecessor_entry = match best_tip {
            Some(tip) => self.tracker.get_entry(&tip).await,
            None => None,
        };

        let (predecessor, predecessor_absheight, predecessor_abswork) = match (&best_tip, &predecessor_entry) {
            (Some(tip), Some(entry)) => (Some(*tip), entry.absheight, entry.abswork),
            _ => (None, 0, U256::ZERO),
        };
        let far_predecessor = match predecessor {
            Some(tip) => self.tracker.far_predecessor(tip, self.params.chain_length).await,
            None => None,
        };

        let share_bits = if let Some(tip) = predecessor {
            let window = self.tracker.retarget_window(tip, self.params.target_lookbehind).await;
            retarget(&window, &self.params)
        } else {
            self.params.max_bits
        };

        let absheight = if predecessor.is_some() { predecessor_absheight + 1 } else { 0 };
        let share_work = U256::work_from_target(&bits_to_target(share_bits));
        let abswork = predecessor_abswork.checked_add(&share_work).unwrap_or(U256::MAX);

        let window_shares = match predecessor {
            Some(tip) => self.tracker.window_shares(tip, self.params.real_chain_length as usize).await,
            None => Vec::new(),
        };

        // `coinbasevalue` is already subsidy + fees (BIP22); the fee field on
        // individual template transactions is informational only.
        let subsidy_and_fees = template.coinbasevalue;
        let node_fee_value = match &self.node_fee {
            Some(fee) => ((subsidy_and_fees as u128 * fee.fraction as u128) / 65535) as u64,
            None => 0,
        };
        let distributable = subsidy_and_fees - node_fee_value;
        let mut payout_entries: Vec<PayoutEntry> = if window_shares.is_empty() {
            vec![PayoutEntry {
                script: finder.payout_script.clone(),
                value: distributable,
            }]
        } else {
            compute_payout_map(&window_shares, distributable, &self.donation_script)?.parent
        };
        if node_fee_value > 0 {
            if let Some(fee) = &self.node_fee {
                payout_entries.push(PayoutEntry {
                    script: fee.script.clone(),
                    value: node_fee_value,
                });
            }
        }

        let tx_hashes: Vec<Hash> = template
            .transactions
            .iter()
            .filter_map(|t| parse_rpc_hash(&t.txid).ok())
            .collect();
        let other_tx_raw: Vec<Vec<u8>> = template
            .transactions
            .iter()
            .filter_map(|t| hex::decode(&t.data).ok())
            .collect();

        let timestamp = template.curtime;

        let (node_fee_fraction, node_fee_script) = match &self.node_fee {
            Some(fee) => (fee.fraction, fee.script.clone()),
            None => (0, Vec::new()),
        };

        let info = ShareInfo {
            predecessor,
            far_predecessor,
            bits: share_bits,
            timestamp,
            absheight,
            abswork,
            payout_script: finder.payout_script.clone(),
            new_transaction_hashes: tx_hashes.clone(),
            desired_version: finder.desired_version,
            donation_fraction: finder.donation_fraction,
            node_fee_fraction,
            node_fee_script: node_fee_script.clone(),
        };
        let variant = ShareVariant::V36 {
            info,
            aux_payouts: Vec::new(),
        };
        let reference_hash = p2pool_crypto::sha256d(&p2pool_core::codec::encode_to_vec(&variant));

        let outputs = build_outputs(&payout_entries, &reference_hash);

        let mut coinbase_tag = self.coinbase_tag.clone();
        let mut aux_context = None;
        if let Some(aux_rpc) = &self.aux {
            let aux_template = aux_rpc.get_template().await?;
            if let Ok(aux_root) = parse_rpc_hash(&aux_template.hash) {
                coinbase_tag.extend_from_slice(&merge_mining_tag(aux_root));
            }
            if let Some(target) = parse_target_hex(&aux_template.target) {
                aux_context = Some(AuxContext {
                    mode: aux_template.mode,
                    template_hash: aux_template.hash.clone(),
                    chain_id: aux_template.chain_id,
                    target,
                });
            }
        }

        let height = template.height;
        let coinbase = raw_coinbase_halves(height, &coinbase_tag, self.extranonce_len, &outputs, 0);
        let merkle_siblings = coinbase_merkle_branch(&tx_hashes, &Sha256dMerkleHasher);

        let job_id = format!("{:x}", self.job_counter.fetch_add(1, Ordering::Relaxed));

        Ok(MiningJob {
            job_id,
            height,
            version: template.version,
            prev_hash,
            parent_bits,
            share_bits,
            timestamp,
            coinbase,
            coinbase_tag,
            outputs,
            merkle_siblings,
            other_tx_raw,
            aux: aux_context,
            reference_hash,
            predecessor,
            far_predecessor,
            absheight,
            abswork,
            payout_script: finder.payout_script.clone(),
            donation_fraction: finder.donation_fraction,
            node_fee_fraction,
            node_fee_script,
            desired_version: finder.desired_version,
            clean_jobs,
            created_at: p2pool_core::current_timestamp() as u32,
        })
    }
}

fn parse_rpc_hash(hex_str: &str) -> Result<Hash, WorkError> {
    let bytes = hex::decode(hex_str).map_err(|e| WorkError::MalformedTemplate(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(WorkError::MalformedTemplate(format!(
            "expected a 32-byte hash, got {} bytes",
            bytes.len()
        )));
    }
    // RPC hex hashes are byte-reversed display order; our internal `Hash` is
    // natural (little-endian, as produced by the hash function) byte order.
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    out.reverse();
    Ok(out)
}

fn parse_hex_u32(hex_str: &str) -> Result<u32, WorkError> {
    u32::from_str_radix(hex_str, 16).map_err(|e| WorkError::MalformedTemplate(e.to_string()))
}

/// Aux-chain targets arrive as an arbitrary-length big-endian hex string
/// rather than compact "bits"; left-pad to 32 bytes and parse directly.
fn parse_target_hex(hex_str: &str) -> Option<U256> {
    if hex_str.is_empty() || hex_str.len() > 64 {
        return None;
    }
    let padded = format!("{:0>64}", hex_str);
    let bytes = hex::decode(padded).ok()?;
    let mut be = [0u8; 32];
    be.copy_from_slice(&bytes);
    Some(U256::from_be_bytes(&be))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rpc_hash_reverses_display_order() {
        let hex_str = "0100000000000000000000000000000000000000000000000000000000000000";
        assert!(parse_rpc_hash(hex_str).is_err()); // 34 bytes, not 32

        let valid = "01".to_string() + &"00".repeat(31);
        let hash = parse_rpc_hash(&valid).unwrap();
        assert_eq!(hash[31], 1);
    }

    #[test]
    fn parse_hex_u32_reads_compact_bits() {
        assert_eq!(parse_hex_u32("1d00ffff").unwrap(), 0x1d00ffff);
    }
}
