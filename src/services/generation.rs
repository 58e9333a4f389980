use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::job::ScorePayload;

/// Output cap for a summary, in tokens.
pub const MAX_OUTPUT_TOKENS: u32 = 100;

/// Sampling temperature for summaries.
pub const TEMPERATURE: f32 = 0.7;

/// Harm categories whose default blocking is turned off. Blocked or empty
/// responses are still reported as [`GenerationError`]s.
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

/// Text generation capability: a prompt in, generated text or a failure out.
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError>;
}

/// Build the summary prompt for a property's three scores.
pub fn build_prompt(scores: &ScorePayload) -> String {
    format!(
        "Dựa trên các điểm an toàn sau của một bất động sản cho thuê (thang điểm 10): \
         an ninh khu vực {:.1}, đánh giá của người thuê {:.1}, môi trường sống {:.1}. \
         Hãy viết đúng 2 câu tóm tắt ngắn gọn, giọng văn trung lập, \
         dành cho người đang tìm nhà thuê. Chỉ trả về đoạn tóm tắt.",
        scores.crime_score, scores.user_score, scores.env_score
    )
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: Client,
    api_base: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(
        api_base: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn request_body(prompt: &str, params: GenerationParams) -> serde_json::Value {
        let safety_settings: Vec<serde_json::Value> = HARM_CATEGORIES
            .iter()
            .map(|category| serde_json::json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect();

        serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": params.max_tokens,
                "temperature": params.temperature
            },
            "safetySettings": safety_settings
        })
    }
}

#[async_trait]
impl SummaryGenerator for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&Self::request_body(prompt, params))
            .send()
            .await
            .map_err(GenerationError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(GenerationError::Http)?;
        extract_summary(parsed)
    }
}

/// Pull the summary text out of a response, treating blocked or empty output
/// as a failure.
fn extract_summary(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return match response.prompt_feedback.and_then(|f| f.block_reason) {
            Some(reason) => Err(GenerationError::Blocked(reason)),
            None => Err(GenerationError::Empty),
        };
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();

    if text.is_empty() {
        let blocked = matches!(
            candidate.finish_reason.as_deref(),
            Some("SAFETY" | "BLOCKLIST" | "PROHIBITED_CONTENT")
        );
        if blocked {
            return Err(GenerationError::Blocked(
                candidate.finish_reason.unwrap_or_default(),
            ));
        }
        return Err(GenerationError::Empty);
    }

    Ok(text.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Generation blocked: {0}")]
    Blocked(String),

    #[error("Generation returned no text")]
    Empty,
}
