use std::time::Duration;

use serde::Deserialize;

use crate::services::generation::GenerationParams;
use crate::worker::WorkerSettings;

#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Gemini API key. Required; the worker refuses to start without it.
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Gemini model name
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Gemini REST base URL
    #[serde(default = "default_gemini_api_base")]
    pub gemini_api_base: String,

    /// Upper bound on a single generation call
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Delay before polling again after an empty claim
    #[serde(default = "default_idle_delay_secs")]
    pub worker_idle_delay_secs: u64,

    /// Delay before polling again after a failed cycle
    #[serde(default = "default_error_backoff_secs")]
    pub worker_error_backoff_secs: u64,

    /// Aborted cycles a job may cause before it is failed for good
    #[serde(default = "default_max_attempts")]
    pub worker_max_attempts: i32,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// Apply the bundled schema migrations at startup
    #[serde(default)]
    pub run_migrations: bool,

    /// Prometheus scrape address (e.g., "0.0.0.0:9100"). No exporter when unset.
    #[serde(default)]
    pub metrics_addr: Option<String>,
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_idle_delay_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    10
}

fn default_max_attempts() -> i32 {
    5
}

fn default_max_connections() -> u32 {
    5
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// The generation credential, which is a startup precondition.
    pub fn generation_key(&self) -> Result<&str, ConfigError> {
        match self.gemini_api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(ConfigError::MissingGenerationKey),
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            idle_delay: Duration::from_secs(self.worker_idle_delay_secs),
            error_backoff: Duration::from_secs(self.worker_error_backoff_secs),
            max_attempts: self.worker_max_attempts,
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("GEMINI_API_KEY is not set")]
    MissingGenerationKey,
}
