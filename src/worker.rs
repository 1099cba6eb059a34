//! Per-sub-query resolution worker
//!
//! One worker owns one sub-query and walks it through
//! RETRIEVE → EVALUATE → {RETRY | FALLBACK_WEB} → DONE. Every external call
//! is guarded; a worker always finishes with a candidate answer and its own
//! trace, never with an error.

use crate::answer::AnswerSynthesizer;
use crate::evaluation::QualityEvaluator;
use crate::models::CandidateAnswer;
use crate::retrieval::{filter_by_threshold, RetrievalClient};
use crate::web::WebFallbackResolver;
use std::sync::Arc;
use tracing::{info, warn};

/// Similarity cutoff for retrieved snippets.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.55;

/// A finished worker run: the resolved candidate plus its private trace.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub candidate: CandidateAnswer,
    pub trace: Vec<String>,
    pub tries: u32,
}

pub struct SubQueryWorker {
    retrieval: Arc<dyn RetrievalClient>,
    synthesizer: Arc<AnswerSynthesizer>,
    evaluator: Arc<QualityEvaluator>,
    web: Arc<WebFallbackResolver>,
    similarity_threshold: f32,
}

impl SubQueryWorker {
    pub fn new(
        retrieval: Arc<dyn RetrievalClient>,
        synthesizer: Arc<AnswerSynthesizer>,
        evaluator: Arc<QualityEvaluator>,
        web: Arc<WebFallbackResolver>,
    ) -> Self {
        Self {
            retrieval,
            synthesizer,
            evaluator,
            web,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Run the state machine to completion for one sub-query.
    pub async fn run(&self, sub_query: &str) -> WorkerOutcome {
        let max_retries = self.evaluator.max_retries();
        let mut trace = Vec::new();
        let mut try_count: u32 = 1;

        loop {
            // === RETRIEVE ===
            let candidate = match self.retrieve_candidate(sub_query, try_count, &mut trace).await {
                Some(candidate) => candidate,
                None => {
                    // Straight to the web: no evidence means there is
                    // nothing to evaluate.
                    return self.fallback_web(sub_query, try_count, trace).await;
                }
            };

            // === EVALUATE ===
            let evaluation = self.evaluator.evaluate(sub_query, &candidate, try_count).await;
            trace.push(format!(
                "evaluate (try {}): score {:.2}, {}",
                try_count,
                evaluation.score,
                if evaluation.satisfactory { "satisfactory" } else { "not satisfactory" }
            ));

            if evaluation.satisfactory {
                trace.push("done: using retrieved answer".to_string());
                return WorkerOutcome {
                    candidate,
                    trace,
                    tries: try_count,
                };
            }

            // === RETRY ===
            // Retry re-runs the identical sub-query text; retrieval and
            // generation are non-deterministic enough that a second pass
            // can land a better answer.
            if evaluation.should_retry && try_count < max_retries {
                try_count += 1;
                trace.push(format!("retry {}", try_count));
                continue;
            }

            // === FALLBACK_WEB ===
            return self.fallback_web(sub_query, try_count, trace).await;
        }
    }

    /// RETRIEVE state: fetch evidence, filter by threshold, synthesize a
    /// candidate. `None` means "no usable evidence" and routes to the web.
    async fn retrieve_candidate(
        &self,
        sub_query: &str,
        try_count: u32,
        trace: &mut Vec<String>,
    ) -> Option<CandidateAnswer> {
        let snippets = match self.retrieval.search(sub_query).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(sub_query, try_count, "Retrieval failed: {}", e);
                trace.push(format!("retrieve (try {}): failed", try_count));
                return None;
            }
        };

        let total = snippets.len();
        let kept = filter_by_threshold(snippets, self.similarity_threshold);

        if kept.is_empty() {
            info!(sub_query, "No evidence above threshold, switching to web search");
            trace.push(format!(
                "retrieve (try {}): no evidence above threshold",
                try_count
            ));
            return None;
        }

        trace.push(format!(
            "retrieve (try {}): kept {} of {} snippets",
            try_count,
            kept.len(),
            total
        ));

        match self.synthesizer.synthesize(sub_query, &kept).await {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                warn!(sub_query, try_count, "Answer synthesis failed: {}", e);
                trace.push(format!("synthesize (try {}): failed", try_count));
                None
            }
        }
    }

    async fn fallback_web(
        &self,
        sub_query: &str,
        tries: u32,
        mut trace: Vec<String>,
    ) -> WorkerOutcome {
        info!(sub_query, "Switching to web search");
        trace.push("web fallback".to_string());

        let candidate = self.web.resolve(sub_query).await;
        trace.push("web fallback: done".to_string());

        WorkerOutcome {
            candidate,
            trace,
            tries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvidenceSnippet;
    use crate::oracle::{FailingOracle, MockOracle, Oracle};
    use crate::retrieval::StaticRetrievalClient;
    use crate::web::StaticSearchProvider;

    struct EmptyFetcher;

    #[async_trait::async_trait]
    impl crate::web::PageFetcher for EmptyFetcher {
        async fn fetch(&self, _url: &str, _timeout_ms: u64) -> String {
            String::new()
        }
    }

    fn snippets() -> Vec<EvidenceSnippet> {
        vec![
            EvidenceSnippet {
                text: "Paracetamol relieves pain and fever.".to_string(),
                score: 0.8,
                source_id: "drugbank".to_string(),
            },
            EvidenceSnippet {
                text: "Typical adult dose is 500mg.".to_string(),
                score: 0.6,
                source_id: "who".to_string(),
            },
        ]
    }

    fn worker(
        retrieval: Arc<dyn RetrievalClient>,
        oracle: Arc<dyn Oracle>,
        max_retries: u32,
    ) -> SubQueryWorker {
        let synthesizer = Arc::new(AnswerSynthesizer::new(oracle.clone()));
        let evaluator = Arc::new(QualityEvaluator::new(oracle.clone(), max_retries));
        let web = Arc::new(WebFallbackResolver::new(
            Arc::new(StaticSearchProvider::empty()),
            Arc::new(EmptyFetcher),
            synthesizer.clone(),
        ));

        SubQueryWorker::new(retrieval, synthesizer, evaluator, web)
    }

    #[tokio::test]
    async fn test_satisfactory_first_try() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"answer": "It relieves pain.", "source": "drugbank"}"#,
            r#"{"satisfactory": true, "score": 0.85, "should_retry": false, "reasoning": "good"}"#,
        ]));
        let retrieval = Arc::new(StaticRetrievalClient::new(snippets()));

        let outcome = worker(retrieval, oracle, 3).run("what is paracetamol for?").await;
        assert_eq!(outcome.candidate.text, "It relieves pain.");
        assert_eq!(outcome.tries, 1);
        assert!(outcome.trace.iter().any(|t| t.contains("kept 2 of 2")));
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_evaluate() {
        // Oracle would answer evaluation calls, but none must happen.
        let oracle = Arc::new(FailingOracle);
        let retrieval = Arc::new(StaticRetrievalClient::empty());

        let outcome = worker(retrieval, oracle, 3).run("unknown drug?").await;
        assert_eq!(outcome.candidate.source, "none");
        assert!(outcome.trace.iter().any(|t| t.contains("no evidence above threshold")));
        assert!(!outcome.trace.iter().any(|t| t.starts_with("evaluate")));
    }

    #[tokio::test]
    async fn test_retry_then_accept() {
        let oracle = Arc::new(MockOracle::new(vec![
            // try 1
            r#"{"answer": "Vague answer.", "source": "drugbank"}"#,
            r#"{"satisfactory": false, "score": 0.4, "should_retry": true, "reasoning": "thin"}"#,
            // try 2
            r#"{"answer": "Precise answer.", "source": "drugbank"}"#,
            r#"{"satisfactory": true, "score": 0.9, "should_retry": false, "reasoning": "good"}"#,
        ]));
        let retrieval = Arc::new(StaticRetrievalClient::new(snippets()));

        let outcome = worker(retrieval, oracle, 3).run("dosage?").await;
        assert_eq!(outcome.candidate.text, "Precise answer.");
        assert_eq!(outcome.tries, 2);
    }

    #[tokio::test]
    async fn test_try_count_never_exceeds_max() {
        // Evaluator always demands a retry; the budget must stop it.
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"answer": "A1", "source": "s"}"#,
            r#"{"satisfactory": false, "score": 0.2, "should_retry": true, "reasoning": "r"}"#,
            r#"{"answer": "A2", "source": "s"}"#,
            r#"{"satisfactory": false, "score": 0.2, "should_retry": true, "reasoning": "r"}"#,
        ]));
        let retrieval = Arc::new(StaticRetrievalClient::new(snippets()));

        let outcome = worker(retrieval, oracle, 2).run("dosage?").await;
        assert_eq!(outcome.tries, 2);
        assert!(outcome.trace.iter().any(|t| t == "web fallback"));
    }

    #[tokio::test]
    async fn test_unsatisfactory_no_retry_goes_to_web() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"answer": "Wrong.", "source": "s"}"#,
            r#"{"satisfactory": false, "score": 0.1, "should_retry": false, "reasoning": "off-topic"}"#,
        ]));
        let retrieval = Arc::new(StaticRetrievalClient::new(snippets()));

        let outcome = worker(retrieval, oracle, 3).run("dosage?").await;
        assert_eq!(outcome.tries, 1);
        assert_eq!(outcome.candidate.source, "none");
    }
}
