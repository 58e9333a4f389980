use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::job::{Job, JobStatus, SafetyScoreRecord};
use crate::services::queue::{AbortedAttempt, JobClaim, JobStore, StoreError};

#[derive(Default)]
struct Tables {
    jobs: BTreeMap<i64, Job>,
    scores: HashMap<i64, SafetyScoreRecord>,
    /// Job ids held by an open claim; the in-process stand-in for row locks.
    locked: HashSet<i64>,
    next_id: i64,
    fail_next_commit: bool,
}

/// In-process job store with the same claim semantics as [`PgJobStore`]:
/// claims skip locked jobs, staged changes become visible only on commit and
/// an abandoned claim leaves no trace.
///
/// [`PgJobStore`]: crate::db::store::PgJobStore
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        lock(&self.tables)
    }

    /// Insert a pending job created now.
    pub fn insert_job(&self, property_id: i64, payload: serde_json::Value) -> i64 {
        self.insert_job_at(property_id, payload, Utc::now())
    }

    /// Insert a pending job with an explicit creation time.
    pub fn insert_job_at(
        &self,
        property_id: i64,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> i64 {
        let mut tables = self.tables();
        tables.next_id += 1;
        let id = tables.next_id;
        tables.jobs.insert(
            id,
            Job {
                id,
                property_id,
                payload,
                status: JobStatus::Pending,
                attempts: 0,
                created_at,
                processed_at: None,
            },
        );
        id
    }

    /// Create or replace a property's result record.
    pub fn put_safety_record(&self, record: SafetyScoreRecord) {
        self.tables().scores.insert(record.property_id, record);
    }

    pub fn job(&self, job_id: i64) -> Option<Job> {
        self.tables().jobs.get(&job_id).cloned()
    }

    pub fn safety_record(&self, property_id: i64) -> Option<SafetyScoreRecord> {
        self.tables().scores.get(&property_id).cloned()
    }

    /// Make the next claim commit fail after its writes were staged, as if the
    /// process died between writing and committing.
    pub fn fail_next_commit(&self) {
        self.tables().fail_next_commit = true;
    }
}

fn lock(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryClaim {
    tables: Arc<Mutex<Tables>>,
    job: Job,
}

impl MemoryClaim {
    /// Apply the staged changes atomically, or drop them all on an injected
    /// commit failure.
    fn commit(&self, status: JobStatus, summary: Option<&str>) -> Result<(), StoreError> {
        let mut tables = lock(&self.tables);

        if tables.fail_next_commit {
            tables.fail_next_commit = false;
            return Err(StoreError::CommitFailed(format!(
                "injected failure committing job {}",
                self.job.id
            )));
        }

        let current = tables.jobs.get(&self.job.id).map(|j| j.status);
        if current != Some(JobStatus::Pending) {
            return Err(StoreError::StaleClaim(self.job.id));
        }

        if let Some(summary) = summary {
            match tables.scores.get_mut(&self.job.property_id) {
                Some(record) => record.ai_summary = Some(summary.to_string()),
                None => tracing::warn!(
                    job_id = self.job.id,
                    property_id = self.job.property_id,
                    "No safety score record for property, summary not stored"
                ),
            }
        }

        if let Some(job) = tables.jobs.get_mut(&self.job.id) {
            job.status = status;
            if status.is_terminal() {
                job.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        lock(&self.tables).locked.remove(&self.job.id);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    type Claim = MemoryClaim;

    async fn claim_next(&self) -> Result<Option<MemoryClaim>, StoreError> {
        let mut tables = self.tables();

        let next = tables
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending && !tables.locked.contains(&j.id))
            .min_by_key(|j| (j.created_at, j.id))
            .cloned();

        let Some(job) = next else {
            return Ok(None);
        };

        tables.locked.insert(job.id);
        Ok(Some(MemoryClaim {
            tables: Arc::clone(&self.tables),
            job,
        }))
    }

    async fn record_aborted_attempt(
        &self,
        job_id: i64,
        max_attempts: i32,
    ) -> Result<Option<AbortedAttempt>, StoreError> {
        let mut tables = self.tables();
        if tables.locked.contains(&job_id) {
            return Ok(None);
        }

        let Some(job) = tables.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Pending {
            return Ok(None);
        }

        job.attempts += 1;
        let dead_lettered = job.attempts >= max_attempts;
        if dead_lettered {
            job.status = JobStatus::Failed;
            job.processed_at = Some(Utc::now());
        }

        Ok(Some(AbortedAttempt {
            attempts: job.attempts,
            dead_lettered,
        }))
    }
}

#[async_trait]
impl JobClaim for MemoryClaim {
    fn job(&self) -> &Job {
        &self.job
    }

    async fn mark_processing(&mut self) -> Result<(), StoreError> {
        if self.job.status != JobStatus::Pending {
            return Err(StoreError::StaleClaim(self.job.id));
        }
        // Staged on the claim only; other callers cannot see it until commit.
        self.job.status = JobStatus::Processing;
        Ok(())
    }

    async fn complete_success(self, summary: &str) -> Result<(), StoreError> {
        self.commit(JobStatus::Done, Some(summary))
    }

    async fn complete_failure(self) -> Result<(), StoreError> {
        self.commit(JobStatus::Failed, None)
    }

    async fn release(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures::future::join_all;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({"crimeScore": 7.5, "userScore": 6.0, "envScore": 8.0})
    }

    #[tokio::test]
    async fn test_empty_poll_returns_none_without_mutation() {
        let store = MemoryJobStore::new();
        let done = store.insert_job(1, payload());
        store.claim_next().await.unwrap().unwrap().complete_success("x").await.unwrap();
        let before = store.job(done).unwrap();

        assert!(store.claim_next().await.unwrap().is_none());

        let after = store.job(done).unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.processed_at, before.processed_at);
        assert_eq!(after.attempts, before.attempts);
    }

    #[tokio::test]
    async fn test_claims_oldest_pending_first() {
        let store = MemoryJobStore::new();
        let t1 = Utc::now() - Duration::minutes(5);
        let t2 = Utc::now();
        // Inserted newest-first so id order disagrees with created_at order.
        let b = store.insert_job_at(2, payload(), t2);
        let a = store.insert_job_at(1, payload(), t1);

        let first = store.claim_next().await.unwrap().unwrap();
        assert_eq!(first.job().id, a);
        let second = store.claim_next().await.unwrap().unwrap();
        assert_eq!(second.job().id, b);
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_mutually_exclusive() {
        let store = MemoryJobStore::new();
        let mut ids: Vec<i64> = (0..8).map(|i| store.insert_job(i, payload())).collect();

        let claims = join_all((0..10).map(|_| store.claim_next())).await;
        let mut claimed: Vec<i64> = claims
            .iter()
            .filter_map(|c| c.as_ref().unwrap().as_ref().map(|c| c.job().id))
            .collect();

        assert_eq!(claims.iter().filter(|c| c.as_ref().unwrap().is_none()).count(), 2);
        claimed.sort_unstable();
        ids.sort_unstable();
        assert_eq!(claimed, ids);
    }

    #[tokio::test]
    async fn test_two_workers_one_job() {
        let store = MemoryJobStore::new();
        store.insert_job(42, payload());

        let worker_a = store.clone();
        let worker_b = store.clone();
        let (a, b) = tokio::join!(worker_a.claim_next(), worker_b.claim_next());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.is_some() ^ b.is_some());
    }

    #[tokio::test]
    async fn test_dropped_claim_rolls_back_to_pending() {
        let store = MemoryJobStore::new();
        let id = store.insert_job(42, payload());

        {
            let mut claim = store.claim_next().await.unwrap().unwrap();
            claim.mark_processing().await.unwrap();
            assert_eq!(claim.job().status, JobStatus::Processing);
            // Not visible outside the claim.
            assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);
        }

        let job = store.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.processed_at.is_none());
        let again = store.claim_next().await.unwrap().unwrap();
        assert_eq!(again.job().id, id);
    }

    #[tokio::test]
    async fn test_complete_success_writes_summary_and_status() {
        let store = MemoryJobStore::new();
        store.put_safety_record(SafetyScoreRecord {
            property_id: 42,
            ..Default::default()
        });
        let id = store.insert_job(42, payload());

        let mut claim = store.claim_next().await.unwrap().unwrap();
        claim.mark_processing().await.unwrap();
        claim.complete_success("An ninh khá tốt.").await.unwrap();

        let job = store.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.processed_at.is_some());
        assert_eq!(
            store.safety_record(42).unwrap().ai_summary.as_deref(),
            Some("An ninh khá tốt.")
        );
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_partial_write() {
        let store = MemoryJobStore::new();
        store.put_safety_record(SafetyScoreRecord {
            property_id: 42,
            ai_summary: Some("old".to_string()),
            ..Default::default()
        });
        let id = store.insert_job(42, payload());
        store.fail_next_commit();

        let mut claim = store.claim_next().await.unwrap().unwrap();
        claim.mark_processing().await.unwrap();
        let err = claim.complete_success("new").await.unwrap_err();
        assert!(matches!(err, StoreError::CommitFailed(_)));

        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);
        assert_eq!(store.safety_record(42).unwrap().ai_summary.as_deref(), Some("old"));
        assert!(store.claim_next().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_aborted_attempts_dead_letter_at_limit() {
        let store = MemoryJobStore::new();
        let id = store.insert_job(42, payload());

        let first = store.record_aborted_attempt(id, 2).await.unwrap().unwrap();
        assert_eq!(first, AbortedAttempt { attempts: 1, dead_lettered: false });
        assert_eq!(store.job(id).unwrap().status, JobStatus::Pending);

        let second = store.record_aborted_attempt(id, 2).await.unwrap().unwrap();
        assert!(second.dead_lettered);
        let job = store.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.processed_at.is_some());

        // Terminal jobs are left alone.
        assert!(store.record_aborted_attempt(id, 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_aborted_attempt_skips_claimed_job() {
        let store = MemoryJobStore::new();
        let id = store.insert_job(42, payload());
        let _claim = store.claim_next().await.unwrap().unwrap();

        assert!(store.record_aborted_attempt(id, 3).await.unwrap().is_none());
        assert_eq!(store.job(id).unwrap().attempts, 0);
    }
}
