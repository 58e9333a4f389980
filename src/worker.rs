//! Polling worker that turns queued score payloads into AI summaries.
//!
//! Each cycle claims at most one job, generates its summary and commits the
//! outcome before the next claim. Generation failures are terminal for the
//! job; every other error rolls the claim back so the job can be retried.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::job::PayloadError;
use crate::services::generation::{build_prompt, GenerationError, GenerationParams, SummaryGenerator};
use crate::services::queue::{JobClaim, JobStore, StoreError};
use crate::telemetry;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Wait after a poll that found nothing to claim
    pub idle_delay: Duration,
    /// Wait after a cycle that was aborted by an error
    pub error_backoff: Duration,
    /// Aborted cycles a job may cause before it is failed for good
    pub max_attempts: i32,
    pub generation: GenerationParams,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            idle_delay: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            max_attempts: 5,
            generation: GenerationParams::default(),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was pending.
    Empty,
    /// The summary was stored and the job is `done`.
    Completed { job_id: i64 },
    /// Generation failed and the job is `failed`.
    Failed { job_id: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Job {job_id} has an invalid payload: {source}")]
    InvalidPayload {
        job_id: i64,
        #[source]
        source: PayloadError,
    },
}

pub struct QueueWorker<S, G> {
    store: S,
    generator: G,
    settings: WorkerSettings,
    worker_id: String,
}

impl<S, G> QueueWorker<S, G>
where
    S: JobStore,
    G: SummaryGenerator,
{
    pub fn new(store: S, generator: G, settings: WorkerSettings) -> Self {
        Self {
            store,
            generator,
            settings,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Poll until `shutdown` is cancelled. A cycle in flight is finished
    /// before the loop exits; only the sleeps between cycles are interrupted.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(worker_id = %self.worker_id, "Worker ready, starting job processing loop");

        while !shutdown.is_cancelled() {
            let delay = match self.run_cycle().await {
                Ok(CycleOutcome::Empty) => {
                    debug!("No pending jobs, sleeping");
                    Some(self.settings.idle_delay)
                }
                Ok(_) => None,
                Err(e) => {
                    metrics::counter!(telemetry::CYCLE_ERRORS).increment(1);
                    error!(
                        worker_id = %self.worker_id,
                        error = %e,
                        "Error processing job, backing off"
                    );
                    Some(self.settings.error_backoff)
                }
            };

            if let Some(delay) = delay {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }

        info!(worker_id = %self.worker_id, "Worker stopped");
    }

    /// Claim, generate and commit at most one job.
    ///
    /// On error the claim has been rolled back and the job is `pending` again
    /// (or `failed`, if that was its last allowed attempt).
    pub async fn run_cycle(&self) -> Result<CycleOutcome, WorkerError> {
        let Some(claim) = self.store.claim_next().await? else {
            return Ok(CycleOutcome::Empty);
        };

        let job_id = claim.job().id;
        metrics::counter!(telemetry::JOBS_CLAIMED).increment(1);
        info!(
            worker_id = %self.worker_id,
            job_id,
            property_id = claim.job().property_id,
            attempts = claim.job().attempts,
            "Processing summary job"
        );

        match self.process(claim).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.record_abort(job_id).await;
                Err(e)
            }
        }
    }

    async fn process(&self, mut claim: S::Claim) -> Result<CycleOutcome, WorkerError> {
        let job_id = claim.job().id;

        let marked = claim.mark_processing().await;
        if let Err(e) = marked {
            release(claim).await;
            return Err(e.into());
        }

        let scores = match claim.job().scores() {
            Ok(scores) => scores,
            Err(source) => {
                release(claim).await;
                return Err(WorkerError::InvalidPayload { job_id, source });
            }
        };

        match self.generate(&build_prompt(&scores)).await {
            Ok(summary) => {
                claim.complete_success(&summary).await?;
                metrics::counter!(telemetry::JOBS_COMPLETED).increment(1);
                info!(job_id, summary_len = summary.len(), "Summary stored");
                Ok(CycleOutcome::Completed { job_id })
            }
            Err(e) => {
                warn!(job_id, error = %e, "Summary generation failed, marking job failed");
                claim.complete_failure().await?;
                metrics::counter!(telemetry::JOBS_FAILED).increment(1);
                Ok(CycleOutcome::Failed { job_id })
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let start = Instant::now();
        let result = self.generator.generate(prompt, self.settings.generation).await;
        metrics::histogram!(telemetry::GENERATION_SECONDS).record(start.elapsed().as_secs_f64());

        let text = result?;
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }

    /// Count the aborted cycle against the job. Best effort: when the store is
    /// down this fails too and the job simply stays `pending`.
    async fn record_abort(&self, job_id: i64) {
        match self
            .store
            .record_aborted_attempt(job_id, self.settings.max_attempts)
            .await
        {
            Ok(Some(attempt)) if attempt.dead_lettered => {
                metrics::counter!(telemetry::JOBS_DEAD_LETTERED).increment(1);
                warn!(
                    job_id,
                    attempts = attempt.attempts,
                    "Job exhausted its attempts and was marked failed"
                );
            }
            Ok(Some(attempt)) => {
                info!(job_id, attempts = attempt.attempts, "Job returned to queue for retry");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(job_id, error = %e, "Failed to record aborted attempt");
            }
        }
    }
}

async fn release<C: JobClaim>(claim: C) {
    let job_id = claim.job().id;
    if let Err(e) = claim.release().await {
        // The transaction is discarded either way once the claim is gone.
        warn!(job_id, error = %e, "Rollback failed");
    }
}
