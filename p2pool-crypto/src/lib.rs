//! Hashing and address-encoding primitives shared across the p2pool workspace.
//!
//! P2Pool never signs anything itself (it has no wallet, per scope) — it only
//! needs the hash functions the parent chain's header/coinbase hashing uses,
//! and base58check encode/decode for the payout addresses operators and
//! miners supply on the command line or in `mining.authorize`.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid base58check payload: {0}")]
    InvalidBase58Check(String),
    #[error("base58 decoding error: {0}")]
    Base58(#[from] bs58::decode::Error),
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Double SHA-256, the hash function Bitcoin-family parent chains use for
/// block headers, transactions and Merkle nodes.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// A base58check-encoded payout address: a version byte, a 20-byte payload
/// (commonly a pubkey/script hash), and a 4-byte checksum derived from
/// `sha256d(version || payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutAddress {
    pub version: u8,
    pub payload: [u8; 20],
}

impl PayoutAddress {
    pub fn new(version: u8, payload: [u8; 20]) -> Self {
        PayoutAddress { version, payload }
    }

    pub fn to_base58check(&self) -> String {
        let mut buf = Vec::with_capacity(25);
        buf.push(self.version);
        buf.extend_from_slice(&self.payload);
        let checksum = sha256d(&buf);
        buf.extend_from_slice(&checksum[..4]);
        bs58::encode(buf).into_string()
    }

    pub fn from_base58check(s: &str) -> Result<Self, CryptoError> {
        let bytes = bs58::decode(s).into_vec()?;
        if bytes.len() != 25 {
            return Err(CryptoError::InvalidBase58Check(format!(
                "expected 25 decoded bytes, got {}",
                bytes.len()
            )));
        }
        let (body, checksum) = bytes.split_at(21);
        let expected = sha256d(body);
        if &expected[..4] != checksum {
            return Err(CryptoError::InvalidBase58Check("bad checksum".to_string()));
        }
        let mut payload = [0u8; 20];
        payload.copy_from_slice(&body[1..]);
        Ok(PayoutAddress {
            version: body[0],
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_matches_double_application() {
        let data = b"p2pool";
        assert_eq!(sha256d(data), sha256(&sha256(data)));
    }

    #[test]
    fn base58check_round_trips() {
        let addr = PayoutAddress::new(0x00, [7u8; 20]);
        let encoded = addr.to_base58check();
        let decoded = PayoutAddress::from_base58check(&encoded).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn base58check_rejects_bad_checksum() {
        let addr = PayoutAddress::new(0x00, [7u8; 20]);
        let mut encoded = addr.to_base58check();
        encoded.push('x');
        assert!(PayoutAddress::from_base58check(&encoded).is_err());
    }
}
