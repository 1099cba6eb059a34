//! Similarity-search retrieval client
//!
//! The vector index lives in an external service; this module only knows
//! how to ask it for scored snippets. An empty result list is a valid
//! "no evidence" answer, not an error.

use crate::error::OrchestrationError;
use crate::models::EvidenceSnippet;
use crate::Result;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;

/// Number of snippets requested per sub-query.
const DEFAULT_LIMIT: usize = 5;

#[async_trait::async_trait]
pub trait RetrievalClient: Send + Sync {
    async fn search(&self, text: &str) -> Result<Vec<EvidenceSnippet>>;
}

/// Keep only snippets at or above the similarity threshold.
pub fn filter_by_threshold(
    snippets: Vec<EvidenceSnippet>,
    threshold: f32,
) -> Vec<EvidenceSnippet> {
    snippets
        .into_iter()
        .filter(|s| s.score >= threshold)
        .collect()
}

/// HTTP-backed retrieval client for the vector-search service.
pub struct HttpRetrievalClient {
    client: Client,
    base_url: String,
    limit: usize,
}

impl HttpRetrievalClient {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("RETRIEVAL_API_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }
}

#[async_trait::async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn search(&self, text: &str) -> Result<Vec<EvidenceSnippet>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({ "query": text, "limit": self.limit }))
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::RetrievalFailure(format!("request failed: {}", e))
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.map_err(|e| {
            OrchestrationError::RetrievalFailure(format!("invalid JSON response: {}", e))
        })?;

        if !status.is_success() {
            return Err(OrchestrationError::RetrievalFailure(format!(
                "service returned {}: {}",
                status, body
            )));
        }

        let snippets = body
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| {
                        Some(EvidenceSnippet {
                            text: r.get("text")?.as_str()?.to_string(),
                            score: r.get("score")?.as_f64()? as f32,
                            source_id: r
                                .get("source_id")
                                .and_then(Value::as_str)
                                .unwrap_or("knowledge_base")
                                .to_string(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        debug!(count = snippets.len(), "Retrieval returned snippets");

        Ok(snippets)
    }
}

/// Fixed-content retrieval client for development & testing.
pub struct StaticRetrievalClient {
    snippets: Vec<EvidenceSnippet>,
}

impl StaticRetrievalClient {
    pub fn new(snippets: Vec<EvidenceSnippet>) -> Self {
        Self { snippets }
    }

    pub fn empty() -> Self {
        Self { snippets: vec![] }
    }
}

#[async_trait::async_trait]
impl RetrievalClient for StaticRetrievalClient {
    async fn search(&self, _text: &str) -> Result<Vec<EvidenceSnippet>> {
        Ok(self.snippets.clone())
    }
}
