//! The share data model (spec.md §3) and its tagged-union schema versioning
//! (spec.md §9's "Dynamic dispatch over share schema versions" design note,
//! promoted to a concrete module per SPEC_FULL.md).

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::codec::{
    decode_bytes, decode_hash, decode_list, decode_varint, encode_bytes, encode_hash, encode_list,
    encode_varint, CodecError, Decode, Encode, Result,
};
use crate::header::{MerkleLink, ParentHeader};
use crate::target::U256;
use crate::tx::Transaction;
use crate::Hash;

/// A (aux-chain-id, payout-script) pair, present only on share variants that
/// negotiate per-miner merged-mining payouts (v36+).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuxPayout {
    pub aux_chain_id: u32,
    pub payout_script: Vec<u8>,
}

impl Encode for AuxPayout {
    fn encode(&self, out: &mut BytesMut) {
        encode_varint(self.aux_chain_id as u64, out);
        encode_bytes(&self.payout_script, out);
    }
}

impl Decode for AuxPayout {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(AuxPayout {
            aux_chain_id: decode_varint(buf)? as u32,
            payout_script: decode_bytes(buf)?,
        })
    }
}

/// Fields common to every share schema version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInfo {
    pub predecessor: Option<Hash>,
    pub far_predecessor: Option<Hash>,
    pub bits: u32,
    pub timestamp: u32,
    pub absheight: u64,
    pub abswork: U256,
    pub payout_script: Vec<u8>,
    pub new_transaction_hashes: Vec<Hash>,
    pub desired_version: u16,
    /// Parts-per-65535 of this share's reward routed to the donation
    /// script rather than the miner's own payout script.
    pub donation_fraction: u16,
    /// Parts-per-65535 of the subsidy the composing node routed to its own
    /// fee script, before PPLNS distribution. Committed here (mirroring
    /// `donation_fraction`) so any node can independently recompute this
    /// share's expected payouts without trusting the composer's config.
    pub node_fee_fraction: u16,
    pub node_fee_script: Vec<u8>,
}

fn encode_optional_hash(hash: &Option<Hash>, out: &mut BytesMut) {
    match hash {
        Some(h) => {
            out.extend_from_slice(&[1u8]);
            encode_hash(h, out);
        }
        None => out.extend_from_slice(&[0u8]),
    }
}

fn decode_optional_hash(buf: &mut &[u8]) -> Result<Option<Hash>> {
    if buf.is_empty() {
        return Err(CodecError::Truncated { needed: 1 });
    }
    let tag = buf[0];
    *buf = &buf[1..];
    match tag {
        0 => Ok(None),
        1 => Ok(Some(decode_hash(buf)?)),
        _ => Err(CodecError::NonCanonical("optional-hash tag must be 0 or 1")),
    }
}

impl Encode for ShareInfo {
    fn encode(&self, out: &mut BytesMut) {
        encode_optional_hash(&self.predecessor, out);
        encode_optional_hash(&self.far_predecessor, out);
        encode_varint(self.bits as u64, out);
        encode_varint(self.timestamp as u64, out);
        encode_varint(self.absheight, out);
        encode_hash(&self.abswork.to_be_bytes(), out);
        encode_bytes(&self.payout_script, out);
        encode_list(&self.new_transaction_hashes, out);
        encode_varint(self.desired_version as u64, out);
        encode_varint(self.donation_fraction as u64, out);
        encode_varint(self.node_fee_fraction as u64, out);
        encode_bytes(&self.node_fee_script, out);
    }
}

impl Decode for ShareInfo {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(ShareInfo {
            predecessor: decode_optional_hash(buf)?,
            far_predecessor: decode_optional_hash(buf)?,
            bits: decode_varint(buf)? as u32,
            timestamp: decode_varint(buf)? as u32,
            absheight: decode_varint(buf)?,
            abswork: U256::from_be_bytes(&decode_hash(buf)?),
            payout_script: decode_bytes(buf)?,
            new_transaction_hashes: decode_list(buf)?,
            desired_version: decode_varint(buf)? as u16,
            donation_fraction: decode_varint(buf)? as u16,
            node_fee_fraction: decode_varint(buf)? as u16,
            node_fee_script: decode_bytes(buf)?,
        })
    }
}

/// Tagged union over the share schemas the network has historically used.
/// Every variant shares `ShareInfo`; v36 additionally carries per-aux-chain
/// payout entries (spec.md §3's "extension fields appearing at specific
/// protocol versions").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ShareVariant {
    V17(ShareInfo),
    V33(ShareInfo),
    V34(ShareInfo),
    V35(ShareInfo),
    V36 {
        info: ShareInfo,
        aux_payouts: Vec<AuxPayout>,
    },
}

impl ShareVariant {
    pub fn info(&self) -> &ShareInfo {
        match self {
            ShareVariant::V17(i)
            | ShareVariant::V33(i)
            | ShareVariant::V34(i)
            | ShareVariant::V35(i) => i,
            ShareVariant::V36 { info, .. } => info,
        }
    }

    pub fn protocol_version(&self) -> u16 {
        match self {
            ShareVariant::V17(_) => 17,
            ShareVariant::V33(_) => 33,
            ShareVariant::V34(_) => 34,
            ShareVariant::V35(_) => 35,
            ShareVariant::V36 { .. } => 36,
        }
    }

    pub fn aux_payouts(&self) -> &[AuxPayout] {
        match self {
            ShareVariant::V36 { aux_payouts, .. } => aux_payouts,
            _ => &[],
        }
    }

    fn tag(&self) -> u8 {
        match self {
            ShareVariant::V17(_) => 17,
            ShareVariant::V33(_) => 33,
            ShareVariant::V34(_) => 34,
            ShareVariant::V35(_) => 35,
            ShareVariant::V36 { .. } => 36,
        }
    }
}

impl Encode for ShareVariant {
    fn encode(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[self.tag()]);
        match self {
            ShareVariant::V17(i)
            | ShareVariant::V33(i)
            | ShareVariant::V34(i)
            | ShareVariant::V35(i) => i.encode(out),
            ShareVariant::V36 { info, aux_payouts } => {
                info.encode(out);
                encode_list(aux_payouts, out);
            }
        }
    }
}

impl Decode for ShareVariant {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(CodecError::Truncated { needed: 1 });
        }
        let tag = buf[0];
        *buf = &buf[1..];
        let variant = match tag {
            17 => ShareVariant::V17(ShareInfo::decode(buf)?),
            33 => ShareVariant::V33(ShareInfo::decode(buf)?),
            34 => ShareVariant::V34(ShareInfo::decode(buf)?),
            35 => ShareVariant::V35(ShareInfo::decode(buf)?),
            36 => {
                let info = ShareInfo::decode(buf)?;
                let aux_payouts = decode_list(buf)?;
                ShareVariant::V36 { info, aux_payouts }
            }
            other => return Err(CodecError::UnknownVariant(other)),
        };
        Ok(variant)
    }
}

/// The atomic unit of the side chain (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    pub parent_header: ParentHeader,
    pub coinbase: Transaction,
    pub merkle_link: MerkleLink,
    pub info: ShareVariant,
}

impl Share {
    /// The share hash: a share is a would-be parent block, so its identity
    /// is the parent header's own hash.
    pub fn share_hash(&self) -> Hash {
        p2pool_crypto::sha256d(&crate::codec::encode_to_vec(&self.parent_header))
    }

    /// The reference hash: `share_info` plus extension fields, which the
    /// coinbase's metadata-commitment output must embed.
    pub fn reference_hash(&self) -> Hash {
        p2pool_crypto::sha256d(&crate::codec::encode_to_vec(&self.info))
    }
}

impl Encode for Share {
    fn encode(&self, out: &mut BytesMut) {
        self.parent_header.encode(out);
        self.coinbase.encode(out);
        self.merkle_link.encode(out);
        self.info.encode(out);
    }
}

impl Decode for Share {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Share {
            parent_header: ParentHeader::decode(buf)?,
            coinbase: Transaction::decode(buf)?,
            merkle_link: MerkleLink::decode(buf)?,
            info: ShareVariant::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ShareInfo {
        ShareInfo {
            predecessor: Some([1u8; 32]),
            far_predecessor: Some([2u8; 32]),
            bits: 0x1d00ffff,
            timestamp: 1_700_000_000,
            absheight: 42,
            abswork: U256::ONE,
            payout_script: vec![0x76, 0xa9, 0x14],
            new_transaction_hashes: vec![[3u8; 32]],
            desired_version: 36,
            donation_fraction: 500,
            node_fee_fraction: 0,
            node_fee_script: vec![],
        }
    }

    #[test]
    fn v17_share_variant_round_trips() {
        let variant = ShareVariant::V17(sample_info());
        let encoded = crate::codec::encode_to_vec(&variant);
        let decoded: ShareVariant = crate::codec::decode_from_slice(&encoded).unwrap();
        assert_eq!(decoded.protocol_version(), 17);
        assert_eq!(decoded.info().absheight, 42);
    }

    #[test]
    fn v36_share_variant_carries_aux_payouts() {
        let variant = ShareVariant::V36 {
            info: sample_info(),
            aux_payouts: vec![AuxPayout {
                aux_chain_id: 7,
                payout_script: vec![1, 2, 3],
            }],
        };
        let encoded = crate::codec::encode_to_vec(&variant);
        let decoded: ShareVariant = crate::codec::decode_from_slice(&encoded).unwrap();
        assert_eq!(decoded.aux_payouts().len(), 1);
        assert_eq!(decoded.aux_payouts()[0].aux_chain_id, 7);
    }

    #[test]
    fn unknown_variant_tag_is_rejected() {
        let mut bytes = vec![99u8];
        bytes.extend(crate::codec::encode_to_vec(&sample_info()));
        let result: Result<ShareVariant> = crate::codec::decode_from_slice(&bytes);
        assert!(matches!(result, Err(CodecError::UnknownVariant(99))));
    }

    #[test]
    fn share_hash_depends_only_on_parent_header() {
        let info = ShareInfo {
            predecessor: None,
            ..sample_info()
        };
        let share_a = Share {
            parent_header: ParentHeader {
                version: 1,
                prev_hash: [0u8; 32],
                merkle_root: [5u8; 32],
                timestamp: 1,
                bits: 0x1d00ffff,
                nonce: 1,
            },
            coinbase: Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![],
                lock_time: 0,
            },
            merkle_link: MerkleLink::default(),
            info: ShareVariant::V36 {
                info: info.clone(),
                aux_payouts: vec![],
            },
        };
        let mut share_b = share_a.clone();
        share_b.coinbase.outputs.push(crate::tx::TransactionOutput {
            value: 1,
            script_pubkey: vec![],
        });
        // Mutating the coinbase alone must not change the share hash (it is
        // a pure function of the parent header) nor the reference hash (a
        // pure function of share_info).
        assert_eq!(share_a.share_hash(), share_b.share_hash());
        assert_eq!(share_a.reference_hash(), share_b.reference_hash());

        let mut share_c = share_a.clone();
        if let ShareVariant::V36 { info, .. } = &mut share_c.info {
            info.absheight += 1;
        }
        assert_ne!(share_a.reference_hash(), share_c.reference_hash());
    }
}
