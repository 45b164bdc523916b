//! Parent-chain block header and Merkle-link types.

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::codec::{decode_hash, decode_list, decode_varint, encode_hash, encode_list, encode_varint, Decode, Encode, Result};
use crate::Hash;

/// The header hashed by the parent chain's proof-of-work function. Field
/// order and widths mirror the parent chain's wire header exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentHeader {
    pub version: u32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Encode for ParentHeader {
    fn encode(&self, out: &mut BytesMut) {
        encode_varint(self.version as u64, out);
        encode_hash(&self.prev_hash, out);
        encode_hash(&self.merkle_root, out);
        encode_varint(self.timestamp as u64, out);
        encode_varint(self.bits as u64, out);
        encode_varint(self.nonce as u64, out);
    }
}

impl Decode for ParentHeader {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(ParentHeader {
            version: decode_varint(buf)? as u32,
            prev_hash: decode_hash(buf)?,
            merkle_root: decode_hash(buf)?,
            timestamp: decode_varint(buf)? as u32,
            bits: decode_varint(buf)? as u32,
            nonce: decode_varint(buf)? as u32,
        })
    }
}

/// Sibling hashes needed to re-derive the parent header's Merkle root from
/// the coinbase transaction alone (C5 computes this; C7 replays it).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MerkleLink {
    pub siblings: Vec<Hash>,
}

impl Encode for MerkleLink {
    fn encode(&self, out: &mut BytesMut) {
        encode_list(&self.siblings, out);
    }
}

impl Decode for MerkleLink {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(MerkleLink {
            siblings: decode_list(buf)?,
        })
    }
}

impl Encode for Hash {
    fn encode(&self, out: &mut BytesMut) {
        encode_hash(self, out);
    }
}

impl Decode for Hash {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        decode_hash(buf)
    }
}

impl MerkleLink {
    /// Re-derive the Merkle root from a leaf (the coinbase txid) and the
    /// sibling path, using the given hash function (the parent chain's
    /// transaction-hash function, conventionally `sha256d`).
    pub fn apply(&self, leaf: Hash, hash_pair: impl Fn(&Hash, &Hash) -> Hash) -> Hash {
        let mut acc = leaf;
        for sibling in &self.siblings {
            acc = hash_pair(&acc, sibling);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merkle_link_applies_siblings_in_order() {
        let leaf = [1u8; 32];
        let sib_a = [2u8; 32];
        let sib_b = [3u8; 32];
        let link = MerkleLink {
            siblings: vec![sib_a, sib_b],
        };
        let hash_pair = |a: &Hash, b: &Hash| -> Hash {
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(a);
            buf.extend_from_slice(b);
            p2pool_crypto::sha256d(&buf)
        };
        let root = link.apply(leaf, hash_pair);
        let expected = hash_pair(&hash_pair(&leaf, &sib_a), &sib_b);
        assert_eq!(root, expected);
    }

    #[test]
    fn header_round_trips_through_codec() {
        let header = ParentHeader {
            version: 536870912,
            prev_hash: [9u8; 32],
            merkle_root: [8u8; 32],
            timestamp: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 42,
        };
        let encoded = crate::codec::encode_to_vec(&header);
        let decoded: ParentHeader = crate::codec::decode_from_slice(&encoded).unwrap();
        assert_eq!(header.nonce, decoded.nonce);
        assert_eq!(header.merkle_root, decoded.merkle_root);
    }
}
