use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// A client for single, non-streaming text generation requests.
///
/// Components that need one receive it explicitly (usually as
/// `Arc<dyn GenerationClient>`); there is no process-wide instance.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Sends `prompt` as a single user turn and returns the model's text answer.
    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

// --- Wire types for `models/{model}:generateContent` ---

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .context("No candidates in generation response")?;
        let text: String = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.is_empty() {
            return Err(anyhow!("Generation response contained no text"));
        }
        Ok(text)
    }
}

/// A `GenerationClient` for the Gemini REST API.
pub struct GeminiGenerationClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiGenerationClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - The Gemini API key.
    /// * `model` - Model identifier, without the `models/` prefix (e.g., "gemini-2.5-flash").
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            model,
        }
    }

    /// Overrides the REST base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl GenerationClient for GeminiGenerationClient {
    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        tracing::debug!(model = %self.model, "Sending generation request");
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Generation request failed")?
            .error_for_status()
            .context("Generation request was rejected")?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to decode generation response")?;
        parsed.into_text()
    }
}
