//! PPLNS payout accounting (spec.md §4.4): deterministic weight
//! accumulation over a sliding share window, producing the coinbase output
//! list every successor share must reproduce exactly.
//!
//! Grounded on the weight-accumulation/fee-split pattern of a PPLNS payout
//! calculator (`calculate_distribution`, miner/fee/donation splitting) but
//! rewritten with `U256`-by-hand big-integer weights instead of floats, so
//! that two nodes given the same chain always produce byte-identical
//! coinbases.

pub mod accounting;
pub mod window;

use thiserror::Error;

pub use accounting::{compute_payout_map, normalize_weights, share_weight, PayoutEntry, PayoutMap, WindowShare};
pub use window::PplnsWindow;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PplnsError {
    #[error("PPLNS window is empty")]
    EmptyWindow,
    #[error("donation fraction {0} exceeds 65535")]
    InvalidDonationFraction(u16),
    #[error("weight accumulation overflowed U256")]
    WeightOverflow,
}
