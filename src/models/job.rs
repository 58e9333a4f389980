use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Status of a summary generation job in `ai_generation_queue`.
///
/// Transitions are monotonic: `pending -> processing -> done | failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    /// Text stored in the `status` column.
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// The three normalized input scores (0-10) a summary is written from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScorePayload {
    #[garde(range(min = 0.0, max = 10.0))]
    pub crime_score: f64,

    #[garde(range(min = 0.0, max = 10.0))]
    pub user_score: f64,

    #[garde(range(min = 0.0, max = 10.0))]
    pub env_score: f64,
}

/// A row of the queue table.
///
/// `payload` is kept as raw JSON so that a malformed payload never prevents
/// the row itself from being claimed; it is decoded with [`Job::scores`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub property_id: i64,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Decode and range-check the job payload.
    pub fn scores(&self) -> Result<ScorePayload, PayloadError> {
        let scores: ScorePayload = serde_json::from_value(self.payload.clone())?;
        scores
            .validate()
            .map_err(|report| PayloadError::OutOfRange(report.to_string()))?;
        Ok(scores)
    }
}

/// Result row for a property. Only `ai_summary` is written by the worker;
/// the scores are owned by whoever computes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyScoreRecord {
    pub property_id: i64,
    pub crime_score: Option<f64>,
    pub user_score: Option<f64>,
    pub env_score: Option<f64>,
    pub ai_summary: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload is not a score record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Payload scores out of range: {0}")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;

    fn job_with(payload: serde_json::Value) -> Job {
        Job {
            id: 1,
            property_id: 42,
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_column_text() {
        assert_eq!(JobStatus::Processing.as_str(), "processing");
        assert_eq!(JobStatus::from_str("done").unwrap(), JobStatus::Done);
        assert!(JobStatus::from_str("completed").is_err());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_scores_decode_camel_case() {
        let job = job_with(json!({"crimeScore": 7.5, "userScore": 6.0, "envScore": 8.0}));
        let scores = job.scores().unwrap();
        assert_eq!(scores.crime_score, 7.5);
        assert_eq!(scores.user_score, 6.0);
        assert_eq!(scores.env_score, 8.0);
    }

    #[test]
    fn test_scores_missing_field() {
        let job = job_with(json!({"crimeScore": 7.5, "userScore": 6.0}));
        assert!(matches!(job.scores(), Err(PayloadError::Decode(_))));
    }

    #[test]
    fn test_scores_out_of_range() {
        let job = job_with(json!({"crimeScore": 11.0, "userScore": 6.0, "envScore": -1.0}));
        assert!(matches!(job.scores(), Err(PayloadError::OutOfRange(_))));
    }
}
