use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::queries;
use crate::models::job::{Job, JobStatus};
use crate::services::queue::{AbortedAttempt, JobClaim, JobStore, StoreError};

/// Postgres-backed job store.
///
/// A claim is a live transaction holding the job's row lock
/// (`FOR UPDATE SKIP LOCKED`), so concurrent workers skip it until the claim
/// commits or rolls back.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A claimed job together with the transaction that locks it.
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    job: Job,
}

#[async_trait]
impl JobStore for PgJobStore {
    type Claim = PgClaim;

    async fn claim_next(&self) -> Result<Option<PgClaim>, StoreError> {
        let mut tx = self.pool.begin().await?;

        match queries::lock_next_pending(&mut tx).await? {
            Some(job) => Ok(Some(PgClaim { tx, job })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    async fn record_aborted_attempt(
        &self,
        job_id: i64,
        max_attempts: i32,
    ) -> Result<Option<AbortedAttempt>, StoreError> {
        let bumped = queries::bump_attempts(&self.pool, job_id, max_attempts).await?;

        Ok(bumped.map(|(attempts, status)| AbortedAttempt {
            attempts,
            dead_lettered: status == JobStatus::Failed,
        }))
    }
}

impl PgClaim {
    async fn store_success(&mut self, summary: &str) -> Result<(), StoreError> {
        let written = queries::write_summary(&mut self.tx, self.job.property_id, summary).await?;
        if written == 0 {
            tracing::warn!(
                job_id = self.job.id,
                property_id = self.job.property_id,
                "No safety score record for property, summary not stored"
            );
        }

        self.finish(JobStatus::Done).await
    }

    async fn finish(&mut self, status: JobStatus) -> Result<(), StoreError> {
        let changed =
            queries::transition_job(&mut self.tx, self.job.id, self.job.status, status).await?;
        if changed == 0 {
            return Err(StoreError::StaleClaim(self.job.id));
        }
        Ok(())
    }

    /// Roll back before handing `err` to the caller, so the row lock is gone
    /// by the time the aborted attempt is recorded.
    async fn abort(self, err: StoreError) -> StoreError {
        let job_id = self.job.id;
        if let Err(e) = self.tx.rollback().await {
            tracing::warn!(job_id, error = %e, "Rollback failed");
        }
        err
    }
}

#[async_trait]
impl JobClaim for PgClaim {
    fn job(&self) -> &Job {
        &self.job
    }

    async fn mark_processing(&mut self) -> Result<(), StoreError> {
        let changed = queries::transition_job(
            &mut self.tx,
            self.job.id,
            JobStatus::Pending,
            JobStatus::Processing,
        )
        .await?;

        if changed == 0 {
            return Err(StoreError::StaleClaim(self.job.id));
        }

        self.job.status = JobStatus::Processing;
        Ok(())
    }

    async fn complete_success(mut self, summary: &str) -> Result<(), StoreError> {
        if let Err(e) = self.store_success(summary).await {
            return Err(self.abort(e).await);
        }

        self.tx.commit().await?;
        Ok(())
    }

    async fn complete_failure(mut self) -> Result<(), StoreError> {
        if let Err(e) = self.finish(JobStatus::Failed).await {
            return Err(self.abort(e).await);
        }

        self.tx.commit().await?;
        Ok(())
    }

    async fn release(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
