//! Work composition (C5): turns a parent-chain block template, the current
//! share-chain tip and its PPLNS window, and (optionally) an aux-chain
//! template into a mineable job.

pub mod cache;
pub mod coinbase;
pub mod compose;
pub mod error;
pub mod job;
pub mod merkle;

pub use cache::{JobCache, DEFAULT_JOB_TTL_SECONDS};
pub use coinbase::{build_outputs, merge_mining_tag, raw_coinbase_halves, CoinbaseParts};
pub use compose::{FinderContext, NodeFeeConfig, WorkComposer};
pub use error::WorkError;
pub use job::{AuxContext, MiningJob};
pub use merkle::{coinbase_merkle_branch, MerkleHasher, Sha256dMerkleHasher};
