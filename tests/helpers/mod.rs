//! Test helper utilities for Postgres-backed tests

use chrono::{DateTime, Utc};
use safety_summary_worker::db;
use serde_json::json;
use sqlx::{PgPool, Row};

/// Connect to `DATABASE_URL`, apply migrations and empty both tables.
pub async fn setup_pool() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = db::init_pool(&database_url, 5)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    reset(&pool).await;
    pool
}

pub async fn reset(pool: &PgPool) {
    sqlx::query("TRUNCATE ai_generation_queue, property_safety_scores RESTART IDENTITY")
        .execute(pool)
        .await
        .expect("Failed to truncate tables");
}

/// Score payload as an external producer writes it.
pub fn scores(crime: f64, user: f64, env: f64) -> serde_json::Value {
    json!({ "crimeScore": crime, "userScore": user, "envScore": env })
}

pub async fn seed_property(pool: &PgPool, property_id: i64, summary: Option<&str>) {
    sqlx::query(
        r#"
        INSERT INTO property_safety_scores (property_id, crime_score, user_score, env_score, ai_summary)
        VALUES ($1, 7.5, 6.0, 8.0, $2)
        "#,
    )
    .bind(property_id)
    .bind(summary)
    .execute(pool)
    .await
    .expect("Failed to seed property");
}

pub async fn insert_job_at(
    pool: &PgPool,
    property_id: i64,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
) -> i64 {
    let row = sqlx::query(
        r#"
        INSERT INTO ai_generation_queue (property_id, payload, status, created_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING id
        "#,
    )
    .bind(property_id)
    .bind(payload)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .expect("Failed to insert job");

    row.try_get("id").expect("id column")
}
