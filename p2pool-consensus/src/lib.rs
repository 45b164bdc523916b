//! Share-chain consensus rules (spec.md §4.3): the proof-of-work seam, the
//! per-network parameter table, and the two-phase share validator.

pub mod params;
pub mod pow;
pub mod validator;

pub use params::NetworkParams;
pub use pow::{ParentPow, Sha256dPow};
pub use validator::{cheap_verify, contextual_verify, retarget, RetargetWindow, ValidationError};
