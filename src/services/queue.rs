use async_trait::async_trait;

use crate::models::job::Job;

/// Outcome of counting an aborted processing attempt against a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbortedAttempt {
    pub attempts: i32,
    /// The job hit its attempt limit and was moved to `failed`.
    pub dead_lettered: bool,
}

/// Durable queue of summary jobs shared by any number of workers.
///
/// Implementations must make [`JobStore::claim_next`] a single atomic
/// select-and-lock: rows locked by another claim are skipped, never waited on.
#[async_trait]
pub trait JobStore: Send + Sync {
    type Claim: JobClaim;

    /// Claim the oldest `pending` job, or `None` when nothing is eligible.
    /// An empty poll mutates nothing.
    async fn claim_next(&self) -> Result<Option<Self::Claim>, StoreError>;

    /// Count an aborted cycle against a job that was rolled back to `pending`,
    /// moving it to `failed` once `max_attempts` is reached.
    ///
    /// Returns `None` when the job is no longer `pending` or is currently
    /// claimed by someone else.
    async fn record_aborted_attempt(
        &self,
        job_id: i64,
        max_attempts: i32,
    ) -> Result<Option<AbortedAttempt>, StoreError>;
}

/// Exclusive, transaction-scoped ownership of one job.
///
/// Nothing done through a claim is visible to other workers until one of the
/// `complete_*` calls commits. Dropping a claim without completing it rolls
/// everything back and leaves the job `pending`.
#[async_trait]
pub trait JobClaim: Send + Sized {
    fn job(&self) -> &Job;

    /// `pending -> processing`, inside the claim transaction.
    async fn mark_processing(&mut self) -> Result<(), StoreError>;

    /// Write the summary to the property's result record and mark the job
    /// `done`, committing both together.
    async fn complete_success(self, summary: &str) -> Result<(), StoreError>;

    /// Mark the job `failed` and commit. The result record is not touched.
    async fn complete_failure(self) -> Result<(), StoreError>;

    /// Roll the claim back explicitly.
    async fn release(self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown job status '{0}' in queue table")]
    UnknownStatus(String),

    #[error("Job {0} is no longer pending")]
    StaleClaim(i64),

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}
