//! Job cache with TTL eviction, generalized from the teacher's single-
//! address `MiningJobManager`'s `jobs: RwLock<HashMap<String, MiningJob>>`
//! and `clean_expired_jobs` into a keyed cache shared across finders.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::job::MiningJob;

pub const DEFAULT_JOB_TTL_SECONDS: u32 = 300;

pub struct JobCache {
    ttl_seconds: u32,
    jobs: RwLock<HashMap<String, MiningJob>>,
}

impl JobCache {
    pub fn new(ttl_seconds: u32) -> Self {
        JobCache {
            ttl_seconds,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, job: MiningJob) {
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    pub async fn get(&self, job_id: &str) -> Option<MiningJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Drop jobs older than the configured TTL. Returns how many were
    /// evicted, for the caller's periodic-task logging.
    pub async fn evict_expired(&self, now: u32) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| now.saturating_sub(job.created_at) < self.ttl_seconds);
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinbase::CoinbaseParts;

    fn sample_job(job_id: &str, created_at: u32) -> MiningJob {
        MiningJob {
            job_id: job_id.to_string(),
            height: 1,
            version: 1,
            prev_hash: [0u8; 32],
            parent_bits: 0x1d00ffff,
            share_bits: 0x1d00ffff,
            timestamp: created_at,
            coinbase: CoinbaseParts {
                prefix: vec![],
                suffix: vec![],
                extranonce_len: 8,
            },
            coinbase_tag: vec![],
            outputs: vec![],
            merkle_siblings: vec![],
            other_tx_raw: vec![],
            aux: None,
            reference_hash: [0u8; 32],
            predecessor: None,
            far_predecessor: None,
            absheight: 0,
            abswork: p2pool_core::target::U256::ZERO,
            payout_script: vec![],
            donation_fraction: 0,
            desired_version: 36,
            clean_jobs: true,
            created_at,
        }
    }

    #[tokio::test]
    async fn evicts_jobs_older_than_ttl() {
        let cache = JobCache::new(100);
        cache.insert(sample_job("a", 0)).await;
        cache.insert(sample_job("b", 50)).await;
        let evicted = cache.evict_expired(150).await;
        assert_eq!(evicted, 1);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_some());
    }

    #[tokio::test]
    async fn get_returns_inserted_job() {
        let cache = JobCache::new(300);
        cache.insert(sample_job("x", 10)).await;
        assert_eq!(cache.get("x").await.unwrap().job_id, "x");
        assert!(cache.get("missing").await.is_none());
    }
}
