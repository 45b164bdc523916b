//! Parent-chain transaction types, binary-compatible with the parent
//! chain's own wire format (spec.md §4.1: "any change here breaks
//! interoperability with parent-chain nodes").

use bytes::BytesMut;
use serde::{Deserialize, Serialize};

use crate::codec::{decode_bytes, decode_hash, decode_list, decode_varint, encode_bytes, encode_hash, encode_list, encode_varint, Decode, Encode, Result};
use crate::Hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prev_txid: Hash,
    pub prev_vout: u32,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TransactionInput {
    pub fn is_coinbase(&self) -> bool {
        self.prev_txid == crate::ZERO_HASH && self.prev_vout == 0xffff_ffff
    }
}

impl Encode for TransactionInput {
    fn encode(&self, out: &mut BytesMut) {
        encode_hash(&self.prev_txid, out);
        encode_varint(self.prev_vout as u64, out);
        encode_bytes(&self.script_sig, out);
        encode_varint(self.sequence as u64, out);
    }
}

impl Decode for TransactionInput {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(TransactionInput {
            prev_txid: decode_hash(buf)?,
            prev_vout: decode_varint(buf)? as u32,
            script_sig: decode_bytes(buf)?,
            sequence: decode_varint(buf)? as u32,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl Encode for TransactionOutput {
    fn encode(&self, out: &mut BytesMut) {
        encode_varint(self.value, out);
        encode_bytes(&self.script_pubkey, out);
    }
}

impl Decode for TransactionOutput {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(TransactionOutput {
            value: decode_varint(buf)?,
            script_pubkey: decode_bytes(buf)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Transaction id: `sha256d` of the encoded transaction, matching every
    /// Bitcoin-derived parent chain's convention.
    pub fn txid(&self) -> Hash {
        p2pool_crypto::sha256d(&crate::codec::encode_to_vec(self))
    }
}

impl Encode for Transaction {
    fn encode(&self, out: &mut BytesMut) {
        encode_varint(self.version as u64, out);
        encode_list(&self.inputs, out);
        encode_list(&self.outputs, out);
        encode_varint(self.lock_time as u64, out);
    }
}

impl Decode for Transaction {
    fn decode(buf: &mut &[u8]) -> Result<Self> {
        Ok(Transaction {
            version: decode_varint(buf)? as u32,
            inputs: decode_list(buf)?,
            outputs: decode_list(buf)?,
            lock_time: decode_varint(buf)? as u32,
        })
    }
}

/// Build the coinbase scriptSig's mandatory BIP34 height push followed by
/// an arbitrary tag, matching every Bitcoin-derived parent chain's rule
/// that a coinbase's first bytes commit to the block height.
pub fn bip34_height_push(height: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    let mut n = height;
    let mut bytes = Vec::new();
    while n > 0 {
        bytes.push((n & 0xff) as u8);
        n >>= 8;
    }
    if bytes.is_empty() {
        bytes.push(0);
    }
    if bytes.last().copied().unwrap_or(0) & 0x80 != 0 {
        bytes.push(0);
    }
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TransactionInput {
                prev_txid: crate::ZERO_HASH,
                prev_vout: 0xffff_ffff,
                script_sig: bip34_height_push(500_000),
                sequence: 0xffff_ffff,
            }],
            outputs: vec![TransactionOutput {
                value: 50_0000_0000,
                script_pubkey: vec![0x76, 0xa9, 0x14],
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn coinbase_is_detected() {
        assert!(sample_tx().is_coinbase());
    }

    #[test]
    fn transaction_round_trips_through_codec() {
        let tx = sample_tx();
        let encoded = crate::codec::encode_to_vec(&tx);
        let decoded: Transaction = crate::codec::decode_from_slice(&encoded).unwrap();
        assert_eq!(tx.version, decoded.version);
        assert_eq!(tx.inputs[0].script_sig, decoded.inputs[0].script_sig);
        assert_eq!(tx.outputs[0].value, decoded.outputs[0].value);
    }

    #[test]
    fn bip34_push_round_trips_height() {
        let push = bip34_height_push(804_577);
        let len = push[0] as usize;
        let mut value: u64 = 0;
        for (i, byte) in push[1..1 + len].iter().enumerate() {
            value |= (*byte as u64) << (8 * i);
        }
        assert_eq!(value, 804_577);
    }
}
