//! Byte-level coinbase assembly (spec.md §4.5), grounded on the teacher's
//! `MiningJobManager::create_job`: BIP34 height push, a tag, sequence, the
//! PPLNS-derived output list, and a trailing metadata-commitment output.
//!
//! Unlike the teacher (which serializes a whole transaction in one pass),
//! the coinbase here is split into a `prefix`/`suffix` around the reserved
//! extranonce region, because a stratum job broadcasts the same coinbase to
//! many miners who each splice in their own `extranonce1 || extranonce2`.

use bytes::BytesMut;

use p2pool_core::codec::encode_varint;
use p2pool_core::tx::{bip34_height_push, Transaction, TransactionInput, TransactionOutput};
use p2pool_core::{Hash, ZERO_HASH};
use p2pool_pplns::PayoutEntry;

/// A coinbase transaction with a reserved, unwritten gap where the
/// per-connection extranonce goes. `prefix || extranonce || suffix` is the
/// full raw transaction bytes.
#[derive(Debug, Clone)]
pub struct CoinbaseParts {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
    pub extranonce_len: usize,
}

impl CoinbaseParts {
    /// Splice a concrete extranonce into the reserved gap, producing the
    /// full raw transaction bytes a miner (or this node, reconstructing a
    /// submission) would hash as the coinbase txid.
    pub fn assemble(&self, extranonce: &[u8]) -> Option<Vec<u8>> {
        if extranonce.len() != self.extranonce_len {
            return None;
        }
        let mut out = Vec::with_capacity(self.prefix.len() + extranonce.len() + self.suffix.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(extranonce);
        out.extend_from_slice(&self.suffix);
        Some(out)
    }
}

/// Build the coinbase's `prefix`/`suffix` halves around a reserved
/// `extranonce_len`-byte gap in the scriptSig, following `height_push ||
/// tag || extranonce`.
pub fn raw_coinbase_halves(
    height: u64,
    tag: &[u8],
    extranonce_len: usize,
    outputs: &[TransactionOutput],
    lock_time: u32,
) -> CoinbaseParts {
    let height_push = bip34_height_push(height);
    let script_len = height_push.len() + tag.len() + extranonce_len;

    let mut prefix = BytesMut::new();
    prefix.extend_from_slice(&1i32.to_le_bytes());
    encode_varint(1, &mut prefix); // one input
    prefix.extend_from_slice(&ZERO_HASH);
    prefix.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    encode_varint(script_len as u64, &mut prefix);
    prefix.extend_from_slice(&height_push);
    prefix.extend_from_slice(tag);

    let mut suffix = BytesMut::new();
    suffix.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
    encode_varint(outputs.len() as u64, &mut suffix);
    for output in outputs {
        suffix.extend_from_slice(&output.value.to_le_bytes());
        encode_varint(output.script_pubkey.len() as u64, &mut suffix);
        suffix.extend_from_slice(&output.script_pubkey);
    }
    suffix.extend_from_slice(&lock_time.to_le_bytes());

    CoinbaseParts {
        prefix: prefix.to_vec(),
        suffix: suffix.to_vec(),
        extranonce_len,
    }
}

/// Rebuild the structured `Transaction` C1's codec understands, once the
/// concrete extranonce bytes a submission used are known. Used when a
/// solved share is turned into a `Share` for the tracker.
pub fn assemble_transaction(
    height: u64,
    tag: &[u8],
    extranonce: &[u8],
    outputs: &[TransactionOutput],
    lock_time: u32,
) -> Transaction {
    let height_push = bip34_height_push(height);
    let mut script_sig = Vec::with_capacity(height_push.len() + tag.len() + extranonce.len());
    script_sig.extend_from_slice(&height_push);
    script_sig.extend_from_slice(tag);
    script_sig.extend_from_slice(extranonce);

    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prev_txid: ZERO_HASH,
            prev_vout: 0xffff_ffff,
            script_sig,
            sequence: 0xffff_ffff,
        }],
        outputs: outputs.to_vec(),
        lock_time,
    }
}

/// The PPLNS payout list plus a trailing OP_RETURN-style output committing
/// to the share's reference hash (spec.md §4.3's coinbase-commitment rule:
/// the last output's trailing 32 bytes must equal `share.reference_hash()`).
pub fn build_outputs(payouts: &[PayoutEntry], reference_hash: &Hash) -> Vec<TransactionOutput> {
    let mut outputs: Vec<TransactionOutput> = payouts
        .iter()
        .map(|p| TransactionOutput {
            value: p.value,
            script_pubkey: p.script.clone(),
        })
        .collect();

    let mut commitment_script = Vec::with_capacity(34);
    commitment_script.push(0x6a); // OP_RETURN
    commitment_script.push(0x20); // push 32 bytes
    commitment_script.extend_from_slice(reference_hash);
    outputs.push(TransactionOutput {
        value: 0,
        script_pubkey: commitment_script,
    });

    outputs
}

pub const MERGE_MINING_MAGIC: [u8; 4] = [0xfa, 0xbe, 0x6d, 0x6d];

/// The merged-mining marker an auxiliary chain's nodes scan the parent
/// coinbase's scriptSig for: a magic prefix, the aux merkle root (with a
/// single configured aux chain, just its block hash), tree size, and a
/// nonce. Best-effort: validated only against the single-aux-chain case, per
/// the same caveat spec.md §9 attaches to the v36 extension encoding.
pub fn merge_mining_tag(aux_root: Hash) -> Vec<u8> {
    let mut tag = Vec::with_capacity(4 + 32 + 4 + 4);
    tag.extend_from_slice(&MERGE_MINING_MAGIC);
    tag.extend_from_slice(&aux_root);
    tag.extend_from_slice(&1u32.to_le_bytes());
    tag.extend_from_slice(&0u32.to_le_bytes());
    tag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_outputs() -> Vec<TransactionOutput> {
        vec![TransactionOutput {
            value: 5_000_000_000,
            script_pubkey: vec![0x76, 0xa9, 0x14],
        }]
    }

    #[test]
    fn assemble_splices_extranonce_between_halves() {
        let parts = raw_coinbase_halves(804_577, b"p2pool", 8, &sample_outputs(), 0);
        let extranonce = [0xaa; 8];
        let full = parts.assemble(&extranonce).unwrap();
        assert!(full.len() > parts.prefix.len() + parts.suffix.len());
        assert_eq!(&full[parts.prefix.len()..parts.prefix.len() + 8], &extranonce);
    }

    #[test]
    fn assemble_rejects_wrong_extranonce_length() {
        let parts = raw_coinbase_halves(1, b"tag", 4, &sample_outputs(), 0);
        assert!(parts.assemble(&[0u8; 3]).is_none());
    }

    #[test]
    fn build_outputs_commits_trailing_32_bytes() {
        let payouts = vec![PayoutEntry {
            script: vec![1, 2, 3],
            value: 1000,
        }];
        let reference_hash = [7u8; 32];
        let outputs = build_outputs(&payouts, &reference_hash);
        let last = outputs.last().unwrap();
        assert_eq!(&last.script_pubkey[last.script_pubkey.len() - 32..], &reference_hash);
        assert_eq!(last.value, 0);
    }

    #[test]
    fn assembled_transaction_script_sig_appears_in_raw_halves() {
        let outputs = sample_outputs();
        let parts = raw_coinbase_halves(100, b"tag", 4, &outputs, 0);
        let extranonce = [0x11u8; 4];
        let raw = parts.assemble(&extranonce).unwrap();
        let tx = assemble_transaction(100, b"tag", &extranonce, &outputs, 0);
        assert!(raw.windows(tx.inputs[0].script_sig.len()).any(|w| w == tx.inputs[0].script_sig));
    }
}
