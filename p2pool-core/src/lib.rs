//! Wire types and the share data model shared by every p2pool crate.
//!
//! This crate owns the binary codec (`codec`), the parent-chain transaction
//! and header types that mirror the parent chain's own wire format, and the
//! `Share` / `ShareInfo` data model described by the share-chain engine.

pub mod codec;
pub mod header;
pub mod share;
pub mod target;
pub mod tx;

use thiserror::Error;

/// A 32-byte hash: share hashes, parent-block hashes, transaction ids, and
/// Merkle node values are all this shape.
pub type Hash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("codec error: {0}")]
    Codec(#[from] codec::CodecError),
    #[error("invalid share: {0}")]
    InvalidShare(String),
}

/// Current unix timestamp, used for peer-book bookkeeping and job TTLs.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// Zero hash, used for coinbase `prev_txid` and similar "none" markers.
pub const ZERO_HASH: Hash = [0u8; 32];
