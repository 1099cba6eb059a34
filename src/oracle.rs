//! Text-generation oracle
//!
//! Every classification, decomposition, synthesis and evaluation step goes
//! through one `Oracle` call. The oracle may fail; each call site owns its
//! fallback value. Uses a long-lived reqwest::Client for connection pooling.

use crate::error::OrchestrationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

/// Abstract request/response text capability. May fail; callers degrade.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, prompt: &str) -> crate::Result<String>;
}

/// Reusable Gemini client (connection-pooled, bounded per-call timeout)
pub struct GeminiOracle {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiOracle {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }
}

#[async_trait]
impl Oracle for GeminiOracle {
    async fn generate(&self, prompt: &str) -> crate::Result<String> {
        if self.api_key.is_empty() {
            return Err(OrchestrationError::OracleFailure(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 2048,
            },
        };

        info!("Calling oracle");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Oracle request failed: {}", e);
                OrchestrationError::OracleFailure(format!("request error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Oracle error response: {}", error_text);
            return Err(OrchestrationError::OracleFailure(format!(
                "API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse oracle response: {}", e);
            OrchestrationError::OracleFailure(format!("parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                OrchestrationError::OracleFailure("empty response".to_string())
            })?;

        Ok(answer)
    }
}

/// Strip an optional markdown code fence around an oracle JSON payload.
pub fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse a JSON object out of an oracle reply, tolerating fences and
/// surrounding prose.
pub fn parse_json_reply(response: &str) -> crate::Result<serde_json::Value> {
    let cleaned = strip_code_fences(response);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) {
        return Ok(value);
    }

    // Fallback: largest { ... } block in the text
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(OrchestrationError::OracleFailure(format!(
        "reply is not valid JSON: {}",
        response
    )))
}

/// Scripted oracle for development & testing.
/// Keeps the system functional without an LLM dependency.
pub struct MockOracle {
    responses: Mutex<VecDeque<String>>,
}

impl MockOracle {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn generate(&self, _prompt: &str) -> crate::Result<String> {
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| OrchestrationError::OracleFailure("mock poisoned".to_string()))?;

        responses.pop_front().ok_or_else(|| {
            OrchestrationError::OracleFailure("mock oracle exhausted".to_string())
        })
    }
}

/// Oracle that always fails, for exercising degrade paths.
pub struct FailingOracle;

#[async_trait]
impl Oracle for FailingOracle {
    async fn generate(&self, _prompt: &str) -> crate::Result<String> {
        Err(OrchestrationError::OracleFailure(
            "oracle unavailable".to_string(),
        ))
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
