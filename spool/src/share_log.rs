//! Append-only share log and archive (spec.md §3's "moved to an archive log
//! and dropped from the in-memory index" lifecycle rule).
//!
//! Grounded on the teacher's `JsonBlockStore` (per-entity JSON files under a
//! base directory, `BufReader`/`BufWriter`, `fs::create_dir_all` on open),
//! adapted from one-file-per-block to a newline-delimited JSON log, since
//! shares are created far more often than blocks ever were and a single
//! growing log amortizes the per-entry file-create cost away.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use log::{info, warn};
use tokio::sync::Mutex;

use p2pool_core::share::Share;

use crate::SpoolError;

pub struct ShareLog {
    log_path: PathBuf,
    archive_path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl ShareLog {
    pub async fn open(base_dir: &std::path::Path) -> Result<Self, SpoolError> {
        std::fs::create_dir_all(base_dir)?;
        let log_path = base_dir.join("shares.log");
        let archive_path = base_dir.join("archive.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        Ok(ShareLog {
            log_path,
            archive_path,
            file: Mutex::new(file),
        })
    }

    /// Append one share as a single JSON line.
    pub async fn append(&self, share: &Share) -> Result<(), SpoolError> {
        let mut line = serde_json::to_string(share)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Replay the log in insertion order, for recovery on restart. A
    /// trailing malformed line (a crash mid-write) is logged and dropped
    /// rather than failing the whole replay.
    pub fn replay(&self) -> Result<Vec<Share>, SpoolError> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.log_path)?;
        let reader = BufReader::new(file);
        let mut shares = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Share>(&line) {
                Ok(share) => shares.push(share),
                Err(err) => {
                    warn!("spool: dropping malformed share-log line {}: {}", lineno, err);
                    break;
                }
            }
        }
        info!("spool: replayed {} shares from {:?}", shares.len(), self.log_path);
        Ok(shares)
    }

    /// Move shares the tracker has pruned into the archive log, keeping the
    /// active log bounded by `RETENTION` in spirit (the active log is
    /// still append-only; this records what fell out of the working set).
    pub async fn archive(&self, shares: &[Share]) -> Result<(), SpoolError> {
        if shares.is_empty() {
            return Ok(());
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.archive_path)?;
        for share in shares {
            let mut line = serde_json::to_string(share)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2pool_core::header::{MerkleLink, ParentHeader};
    use p2pool_core::share::{ShareInfo, ShareVariant};
    use p2pool_core::target::U256;
    use p2pool_core::tx::Transaction;

    fn sample_share() -> Share {
        Share {
            parent_header: ParentHeader {
                version: 1,
                prev_hash: [0u8; 32],
                merkle_root: [1u8; 32],
                timestamp: 1_700_000_000,
                bits: 0x1d00ffff,
                nonce: 7,
            },
            coinbase: Transaction {
                version: 1,
                inputs: vec![],
                outputs: vec![],
                lock_time: 0,
            },
            merkle_link: MerkleLink::default(),
            info: ShareVariant::V36 {
                info: ShareInfo {
                    predecessor: None,
                    far_predecessor: None,
                    bits: 0x1d00ffff,
                    timestamp: 1_700_000_000,
                    absheight: 0,
                    abswork: U256::ONE,
                    payout_script: vec![1, 2, 3],
                    new_transaction_hashes: vec![],
                    desired_version: 36,
                    donation_fraction: 0,
                    node_fee_fraction: 0,
                    node_fee_script: vec![],
                },
                aux_payouts: vec![],
            },
        }
    }

    #[tokio::test]
    async fn append_then_replay_round_trips() {
        let dir = tempdir();
        let log = ShareLog::open(&dir).await.unwrap();
        let share = sample_share();
        log.append(&share).await.unwrap();
        let replayed = log.replay().unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].share_hash(), share.share_hash());
    }

    #[tokio::test]
    async fn archived_shares_do_not_appear_in_replay() {
        let dir = tempdir();
        let log = ShareLog::open(&dir).await.unwrap();
        let share = sample_share();
        log.archive(std::slice::from_ref(&share)).await.unwrap();
        let replayed = log.replay().unwrap();
        assert!(replayed.is_empty());
        assert!(dir.join("archive.log").exists());
    }

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("p2pool-spool-test-{}-{}", std::process::id(), n));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }
}
