//! Proof-of-work abstraction.
//!
//! P2Pool's Non-goals explicitly exclude performing proof-of-work itself;
//! the parent chain's PoW function is external and, across Bitcoin-derived
//! chains, not always the same hash. `ParentPow` is the seam: the node is
//! configured with whichever implementation matches the parent chain
//! selected by the network-selector CLI option group.

use p2pool_core::header::ParentHeader;
use p2pool_core::Hash;

pub trait ParentPow: Send + Sync {
    /// Hash a parent header the way the parent chain's miners do, producing
    /// the value compared against a target.
    fn hash_header(&self, header: &ParentHeader) -> Hash;
}

/// Double-SHA256, the proof-of-work function of Bitcoin and most of its
/// direct forks — the common case among p2pool-compatible parent chains.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256dPow;

impl ParentPow for Sha256dPow {
    fn hash_header(&self, header: &ParentHeader) -> Hash {
        p2pool_crypto::sha256d(&p2pool_core::codec::encode_to_vec(header))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_pow_is_deterministic() {
        let header = ParentHeader {
            version: 1,
            prev_hash: [1u8; 32],
            merkle_root: [2u8; 32],
            timestamp: 1,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        let pow = Sha256dPow;
        assert_eq!(pow.hash_header(&header), pow.hash_header(&header));
    }
}
