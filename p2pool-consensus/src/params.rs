//! Network-specific consensus parameters (spec.md §3, §4.3, §6's network
//! selector option group).

use p2pool_core::target::{bits_to_target, U256};
use p2pool_core::Network;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParams {
    pub network: Network,
    /// PPLNS window length in shares (`CHAIN_LENGTH`).
    pub chain_length: u64,
    /// Payout window (`REAL_CHAIN_LENGTH`), usually equal to `chain_length`.
    pub real_chain_length: u64,
    /// Working-set retention depth (`2 * chain_length`).
    pub retention: u64,
    /// Target seconds between shares.
    pub share_period: u64,
    /// Number of trailing shares the retarget formula looks at.
    pub target_lookbehind: u64,
    pub min_bits: u32,
    pub max_bits: u32,
    /// Retarget clamp expressed as an integer fraction, e.g. (1, 2) for ±50%.
    pub max_step_num: u64,
    pub max_step_den: u64,
    /// Allowed share timestamp drift into the future, seconds.
    pub max_future_drift: i64,
    /// Network magic bytes for the peer protocol (spec.md §4.8).
    pub p2p_magic: [u8; 4],
    pub p2p_port: u16,
    pub stratum_port: u16,
}

impl NetworkParams {
    pub fn min_target(&self) -> U256 {
        bits_to_target(self.min_bits)
    }

    pub fn max_target(&self) -> U256 {
        bits_to_target(self.max_bits)
    }

    pub fn mainnet() -> Self {
        NetworkParams {
            network: Network::Mainnet,
            chain_length: 4320,
            real_chain_length: 4320,
            retention: 8640,
            share_period: 20,
            target_lookbehind: 100,
            min_bits: 0x1d00_ffff,
            max_bits: 0x2100_ffff,
            max_step_num: 1,
            max_step_den: 2,
            max_future_drift: 3600,
            p2p_magic: [0xfa, 0xbf, 0xb5, 0xda],
            p2p_port: 9338,
            stratum_port: 9327,
        }
    }

    pub fn testnet() -> Self {
        NetworkParams {
            network: Network::Testnet,
            p2p_magic: [0x0b, 0x11, 0x09, 0x07],
            p2p_port: 10338,
            stratum_port: 10327,
            ..Self::mainnet()
        }
    }

    pub fn regtest() -> Self {
        NetworkParams {
            network: Network::Regtest,
            chain_length: 20,
            real_chain_length: 20,
            retention: 40,
            target_lookbehind: 5,
            max_bits: 0x207f_ffff,
            p2p_magic: [0xfa, 0xbf, 0xb5, 0xdb],
            p2p_port: 19338,
            stratum_port: 19327,
            ..Self::mainnet()
        }
    }
}
