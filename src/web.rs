//! Live web-search fallback
//!
//! When local retrieval cannot support an answer, the resolver searches the
//! web, fetches whatever pages respond in time, re-ranks their content
//! locally against the sub-query, and synthesizes an answer from the best
//! chunks. Every step is independently fallible per URL; the resolver works
//! with whatever subset succeeded.

use crate::answer::AnswerSynthesizer;
use crate::error::OrchestrationError;
use crate::models::{CandidateAnswer, EvidenceSnippet};
use crate::Result;
use reqwest::Client;
use serde_json::Value;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Search results fetched per fallback invocation.
const DEFAULT_MAX_RESULTS: usize = 3;
/// Chunking geometry for fetched pages.
const CHUNK_SIZE: usize = 1000;
const CHUNK_OVERLAP: usize = 50;
/// Local re-ranking bounds.
const TOP_K_CHUNKS: usize = 5;
const RELEVANCE_THRESHOLD: f32 = 0.1;
/// Per-URL fetch timeout.
const FETCH_TIMEOUT_MS: u64 = 10_000;

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return candidate URLs for a query. An empty list is a valid answer.
    async fn search_web(&self, query: &str) -> Result<Vec<String>>;
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page as plain text. Returns an empty string on any failure;
    /// a single slow or broken URL must not sink the whole fallback.
    async fn fetch(&self, url: &str, timeout_ms: u64) -> String;
}

/// SearxNG-style JSON search endpoint.
pub struct HttpSearchProvider {
    client: Client,
    base_url: String,
    max_results: usize,
}

impl HttpSearchProvider {
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
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = env::var("SEARCH_API_BASE_URL").ok()?;
        Some(Self::new(base_url))
    }
}

#[async_trait::async_trait]
impl SearchProvider for HttpSearchProvider {
    async fn search_web(&self, query: &str) -> Result<Vec<String>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| {
                OrchestrationError::WebFetchFailure(format!("search request failed: {}", e))
            })?;

        let body = response.json::<Value>().await.map_err(|e| {
            OrchestrationError::WebFetchFailure(format!("invalid search response: {}", e))
        })?;

        let urls = body
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r.get("url").and_then(Value::as_str))
                    .map(|u| u.to_string())
                    .take(self.max_results)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        debug!(count = urls.len(), "Web search returned URLs");

        Ok(urls)
    }
}

/// Fixed URL list for development & testing.
pub struct StaticSearchProvider {
    urls: Vec<String>,
}

impl StaticSearchProvider {
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    pub fn empty() -> Self {
        Self { urls: vec![] }
    }
}

#[async_trait::async_trait]
impl SearchProvider for StaticSearchProvider {
    async fn search_web(&self, _query: &str) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// reqwest-backed page fetcher with HTML-to-text conversion.
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }
}

impl Default for HttpPageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str, timeout_ms: u64) -> String {
        let response = match self
            .client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(url, status = %response.status(), "Page fetch rejected");
                return String::new();
            }
            Err(e) => {
                warn!(url, "Page fetch failed: {}", e);
                return String::new();
            }
        };

        let html = match response.text().await {
            Ok(html) => html,
            Err(e) => {
                warn!(url, "Page body read failed: {}", e);
                return String::new();
            }
        };

        htmd::convert(&html).unwrap_or_default()
    }
}

/// Split page text into overlapping chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Fraction of distinct query terms present in the chunk.
pub fn relevance_score(query: &str, chunk: &str) -> f32 {
    let chunk_lower = chunk.to_lowercase();
    let mut terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_string())
        .collect();
    terms.sort();
    terms.dedup();

    if terms.is_empty() {
        return 0.0;
    }

    let hits = terms.iter().filter(|t| chunk_lower.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

/// Live search + fetch + local re-ranking, ending in one answer synthesis.
pub struct WebFallbackResolver {
    provider: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn PageFetcher>,
    synthesizer: Arc<AnswerSynthesizer>,
}

impl WebFallbackResolver {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        synthesizer: Arc<AnswerSynthesizer>,
    ) -> Self {
        Self {
            provider,
            fetcher,
            synthesizer,
        }
    }

    /// Resolve a sub-query from the web. Never fails: on total failure the
    /// fixed neutral candidate comes back.
    pub async fn resolve(&self, sub_query: &str) -> CandidateAnswer {
        let urls = match self.provider.search_web(sub_query).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Web search failed: {}", e);
                return CandidateAnswer::no_information(sub_query);
            }
        };

        if urls.is_empty() {
            info!("No web search results");
            return CandidateAnswer::no_information(sub_query);
        }

        let mut ranked: Vec<EvidenceSnippet> = Vec::new();
        for url in &urls {
            let text = self.fetcher.fetch(url, FETCH_TIMEOUT_MS).await;
            if text.is_empty() {
                continue;
            }

            for chunk in chunk_text(&text, CHUNK_SIZE, CHUNK_OVERLAP) {
                let score = relevance_score(sub_query, &chunk);
                if score >= RELEVANCE_THRESHOLD {
                    ranked.push(EvidenceSnippet {
                        text: chunk,
                        score,
                        source_id: url.clone(),
                    });
                }
            }
        }

        if ranked.is_empty() {
            info!("No relevant web content above threshold");
            return CandidateAnswer::no_information(sub_query);
        }

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(TOP_K_CHUNKS);

        debug!(chunks = ranked.len(), "Synthesizing from web evidence");

        match self.synthesizer.synthesize(sub_query, &ranked).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("Web answer synthesis failed: {}", e);
                CandidateAnswer::no_information(sub_query)
            }
        }
    }
}
