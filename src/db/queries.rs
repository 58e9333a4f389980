use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::models::job::{Job, JobStatus, SafetyScoreRecord};
use crate::services::queue::StoreError;

const JOB_COLUMNS: &str =
    "id, property_id, payload, status, attempts, created_at, processed_at";

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status =
        JobStatus::from_str(&status_str).map_err(|_| StoreError::UnknownStatus(status_str))?;

    Ok(Job {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        payload: row.try_get("payload")?,
        status,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// Select and row-lock the oldest pending job, skipping rows another
/// transaction already holds.
pub async fn lock_next_pending(conn: &mut PgConnection) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM ai_generation_queue
        WHERE status = 'pending'
        ORDER BY created_at ASC, id ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#
    ))
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Update job status. Moving to a terminal status stamps `processed_at`.
///
/// Returns the number of rows changed; `expected` guards the transition so a
/// stale claim changes nothing.
pub async fn transition_job(
    conn: &mut PgConnection,
    job_id: i64,
    expected: JobStatus,
    status: JobStatus,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE ai_generation_queue
        SET status = $1,
            processed_at = CASE WHEN $4 THEN NOW() ELSE processed_at END
        WHERE id = $2 AND status = $3
        "#,
    )
    .bind(status.as_str())
    .bind(job_id)
    .bind(expected.as_str())
    .bind(status.is_terminal())
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Overwrite the AI summary of a property's result record.
///
/// Returns the number of rows changed; the record itself is never created here.
pub async fn write_summary(
    conn: &mut PgConnection,
    property_id: i64,
    summary: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE property_safety_scores
        SET ai_summary = $1
        WHERE property_id = $2
        "#,
    )
    .bind(summary)
    .bind(property_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

/// Increment the attempt counter of a job that is still pending and unlocked,
/// failing it once `max_attempts` is reached.
///
/// Returns `(attempts, status)` after the update, or `None` if no row matched.
pub async fn bump_attempts(
    pool: &PgPool,
    job_id: i64,
    max_attempts: i32,
) -> Result<Option<(i32, JobStatus)>, StoreError> {
    let row = sqlx::query(
        r#"
        UPDATE ai_generation_queue
        SET attempts = attempts + 1,
            status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE status END,
            processed_at = CASE WHEN attempts + 1 >= $2 THEN NOW() ELSE processed_at END
        WHERE id = (
            SELECT id
            FROM ai_generation_queue
            WHERE id = $1 AND status = 'pending'
            FOR UPDATE SKIP LOCKED
        )
        RETURNING attempts, status
        "#,
    )
    .bind(job_id)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => {
            let status_str: String = r.try_get("status")?;
            let status = JobStatus::from_str(&status_str)
                .map_err(|_| StoreError::UnknownStatus(status_str))?;
            Ok(Some((r.try_get("attempts")?, status)))
        }
        None => Ok(None),
    }
}

/// Insert a pending job. Producers live outside this crate; this is what they
/// are expected to run.
pub async fn insert_job(
    pool: &PgPool,
    property_id: i64,
    payload: &serde_json::Value,
) -> Result<Job, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO ai_generation_queue (property_id, payload, status)
        VALUES ($1, $2, 'pending')
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(property_id)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: i64) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM ai_generation_queue WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Get the result record for a property
pub async fn get_safety_record(
    pool: &PgPool,
    property_id: i64,
) -> Result<Option<SafetyScoreRecord>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT property_id, crime_score, user_score, env_score, ai_summary
        FROM property_safety_scores
        WHERE property_id = $1
        "#,
    )
    .bind(property_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Some(SafetyScoreRecord {
            property_id: r.try_get("property_id")?,
            crime_score: r.try_get("crime_score")?,
            user_score: r.try_get("user_score")?,
            env_score: r.try_get("env_score")?,
            ai_summary: r.try_get("ai_summary")?,
        })),
        None => Ok(None),
    }
}
