//! Peer address book (spec.md §3): a small, frequently-rewritten table, so
//! unlike the share log it is persisted as a single JSON snapshot rather
//! than an append log — the same `JsonBlockStore`-style
//! read-whole-file/write-whole-file pattern the teacher uses for its
//! `best_block.json`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use p2pool_core::current_timestamp;

use crate::SpoolError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerKey {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub host: String,
    pub port: u16,
    pub first_seen: u64,
    pub last_seen: u64,
    pub success_count: u32,
    pub failure_count: u32,
    pub score: i32,
}

impl PeerRecord {
    fn new(host: String, port: u16) -> Self {
        let now = current_timestamp();
        PeerRecord {
            host,
            port,
            first_seen: now,
            last_seen: now,
            success_count: 0,
            failure_count: 0,
            score: 0,
        }
    }
}

pub struct AddressBook {
    path: PathBuf,
    entries: RwLock<HashMap<PeerKey, PeerRecord>>,
}

impl AddressBook {
    pub async fn open(base_dir: &std::path::Path) -> Result<Self, SpoolError> {
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join("address_book.json");
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let records: Vec<PeerRecord> = serde_json::from_str(&contents)?;
            records
                .into_iter()
                .map(|r| (PeerKey { host: r.host.clone(), port: r.port }, r))
                .collect()
        } else {
            HashMap::new()
        };
        Ok(AddressBook {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub async fn record_seen(&self, host: &str, port: u16) {
        let mut entries = self.entries.write().await;
        let key = PeerKey { host: host.to_string(), port };
        let record = entries
            .entry(key)
            .or_insert_with(|| PeerRecord::new(host.to_string(), port));
        record.last_seen = current_timestamp();
    }

    pub async fn record_success(&self, host: &str, port: u16) {
        let mut entries = self.entries.write().await;
        let key = PeerKey { host: host.to_string(), port };
        let record = entries
            .entry(key)
            .or_insert_with(|| PeerRecord::new(host.to_string(), port));
        record.success_count += 1;
        record.score += 1;
        record.last_seen = current_timestamp();
    }

    pub async fn record_failure(&self, host: &str, port: u16) {
        let mut entries = self.entries.write().await;
        let key = PeerKey { host: host.to_string(), port };
        let record = entries
            .entry(key)
            .or_insert_with(|| PeerRecord::new(host.to_string(), port));
        record.failure_count += 1;
        record.score -= 1;
    }

    /// Highest-scoring peers, for dialing preference.
    pub async fn best(&self, n: usize) -> Vec<PeerRecord> {
        let entries = self.entries.read().await;
        let mut all: Vec<PeerRecord> = entries.values().cloned().collect();
        all.sort_by(|a, b| b.score.cmp(&a.score));
        all.truncate(n);
        all
    }

    pub async fn all(&self) -> Vec<PeerRecord> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn save(&self) -> Result<(), SpoolError> {
        let entries = self.entries.read().await;
        let records: Vec<&PeerRecord> = entries.values().collect();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tempdir() -> PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("p2pool-addrbook-test-{}-{}", std::process::id(), n));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[tokio::test]
    async fn save_then_reopen_round_trips() {
        let dir = tempdir();
        let book = AddressBook::open(&dir).await.unwrap();
        book.record_success("10.0.0.1", 9338).await;
        book.record_failure("10.0.0.2", 9338).await;
        book.save().await.unwrap();

        let reopened = AddressBook::open(&dir).await.unwrap();
        let all = reopened.all().await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn best_sorts_by_score_descending() {
        let dir = tempdir();
        let book = AddressBook::open(&dir).await.unwrap();
        book.record_success("a", 1).await;
        book.record_success("a", 1).await;
        book.record_success("b", 1).await;
        book.record_failure("c", 1).await;
        let best = book.best(2).await;
        assert_eq!(best.len(), 2);
        assert!(best[0].score >= best[1].score);
        assert_eq!(best[0].host, "a");
    }
}
