//! Per-connection mining session state (spec.md §4.6).
//!
//! Grounded on the teacher's `SessionState` (`mining/src/stratum.rs`):
//! worker identity, subscription id, extranonce assignment, difficulty and
//! activity bookkeeping, generalized with the fields spec.md's fuller
//! protocol needs (version-rolling mask, per-connection pseudoshare/share
//! difficulty overrides, the extranonce-subscribe flag) that the teacher's
//! single-purpose miner never negotiated.

use std::time::Instant;

use crate::username::ParsedUsername;

/// Default connection difficulty (before any `set_difficulty` retargeting a
/// future variable-difficulty loop might perform); a connection is free to
/// request a harder one via `username`'s `/share_diff` suffix.
pub const DEFAULT_SHARE_DIFFICULTY: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub extranonce1: Vec<u8>,
    pub extranonce2_len: usize,
    pub authorized: bool,
    pub payout_script: Option<Vec<u8>>,
    pub aux_payout_script: Option<Vec<u8>>,
    pub worker: Option<String>,
    pub share_difficulty: f64,
    pub pseudoshare_difficulty: Option<f64>,
    /// Bits the miner is permitted to roll in the header's version field,
    /// negotiated by `mining.configure`'s `version-rolling` extension.
    pub version_rolling_mask: Option<u32>,
    /// Set once `mining.configure`'s `subscribe-extranonce` extension (or
    /// the standalone `mining.extranonce.subscribe` call) is negotiated —
    /// the server must push `mining.set_extranonce` if this connection's
    /// extranonce1 ever needs to change.
    pub subscribed_extranonce: bool,
    pub subscription_id: String,
    pub current_job_id: Option<String>,
    pub connected_at: u64,
    pub last_activity: Instant,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
}

impl SessionState {
    pub fn new(subscription_id: String, extranonce1: Vec<u8>, extranonce2_len: usize) -> Self {
        SessionState {
            extranonce1,
            extranonce2_len,
            authorized: false,
            payout_script: None,
            aux_payout_script: None,
            worker: None,
            share_difficulty: DEFAULT_SHARE_DIFFICULTY,
            pseudoshare_difficulty: None,
            version_rolling_mask: None,
            subscribed_extranonce: false,
            subscription_id,
            current_job_id: None,
            connected_at: p2pool_core::current_timestamp(),
            last_activity: Instant::now(),
            shares_accepted: 0,
            shares_rejected: 0,
        }
    }

    pub fn authorize(&mut self, parsed: ParsedUsername) {
        self.payout_script = Some(parsed.payout_script);
        self.aux_payout_script = parsed.aux_payout_script;
        self.worker = parsed.worker;
        if let Some(diff) = parsed.share_difficulty {
            self.share_difficulty = diff;
        }
        self.pseudoshare_difficulty = parsed.pseudoshare_difficulty;
        self.authorized = true;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }
}
