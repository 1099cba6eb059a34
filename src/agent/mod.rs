//! Main orchestrator
//!
//! Query → route → branch:
//! - knowledge: decompose → fan out sub-query workers → synthesize
//! - structured: plan → validate → execute → answer/chart
//!
//! `resolve` never fails across this boundary: every outcome, including the
//! rejection of an unsafe generated query, is a textual response.

use crate::answer::AnswerSynthesizer;
use crate::decompose::QueryDecomposer;
use crate::dispatch::ParallelDispatcher;
use crate::evaluation::QualityEvaluator;
use crate::history::HistoryManager;
use crate::models::{Datasource, FinalAnswer, HistoryRole, Resolution, StructuredResponse};
use crate::oracle::Oracle;
use crate::retrieval::RetrievalClient;
use crate::router::Router;
use crate::store::chart::ChartRenderer;
use crate::store::{RelationalStore, StructuredQueryPlanner};
use crate::synthesis::FinalAnswerSynthesizer;
use crate::web::{PageFetcher, SearchProvider, WebFallbackResolver};
use crate::worker::SubQueryWorker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry budget M per sub-query.
    pub max_retries: u32,
    /// Worker pool bound W for the fan-out phase.
    pub max_workers: usize,
    /// Similarity cutoff for retrieved evidence.
    pub similarity_threshold: f32,
    /// Optional overall deadline for the fan-out phase.
    pub deadline: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_workers: 4,
            similarity_threshold: crate::worker::DEFAULT_SIMILARITY_THRESHOLD,
            deadline: None,
        }
    }
}

pub struct QueryOrchestrator {
    router: Router,
    decomposer: QueryDecomposer,
    worker: Arc<SubQueryWorker>,
    dispatcher: ParallelDispatcher,
    final_synthesizer: FinalAnswerSynthesizer,
    structured: Option<StructuredQueryPlanner>,
    history: Arc<HistoryManager>,
    deadline: Option<Duration>,
}

impl QueryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        oracle: Arc<dyn Oracle>,
        retrieval: Arc<dyn RetrievalClient>,
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn PageFetcher>,
        warehouse: Option<Arc<dyn RelationalStore>>,
        renderer: Arc<dyn ChartRenderer>,
        config: OrchestratorConfig,
    ) -> Self {
        let synthesizer = Arc::new(AnswerSynthesizer::new(oracle.clone()));
        let evaluator = Arc::new(QualityEvaluator::new(oracle.clone(), config.max_retries));
        let web = Arc::new(WebFallbackResolver::new(search, fetcher, synthesizer.clone()));

        let worker = Arc::new(
            SubQueryWorker::new(retrieval, synthesizer, evaluator, web)
                .with_similarity_threshold(config.similarity_threshold),
        );

        let structured = warehouse.map(|store| {
            StructuredQueryPlanner::new(oracle.clone(), store, renderer)
        });

        Self {
            router: Router::new(oracle.clone()),
            decomposer: QueryDecomposer::new(oracle.clone()),
            worker,
            dispatcher: ParallelDispatcher::new(config.max_workers),
            final_synthesizer: FinalAnswerSynthesizer::new(oracle.clone()),
            structured,
            history: Arc::new(HistoryManager::new(oracle)),
            deadline: config.deadline,
        }
    }

    pub fn history(&self) -> Arc<HistoryManager> {
        self.history.clone()
    }

    /// Resolve one user query. Always terminates with a textual response.
    pub async fn resolve(&self, query: &str, session_id: Option<&str>) -> Resolution {
        let query = query.trim();

        if query.is_empty() {
            return Resolution::Answer(FinalAnswer {
                text: "Please enter a question.".to_string(),
                sources: vec![],
                confidence: 0.0,
                trace: vec!["rejected: empty query".to_string()],
            });
        }

        info!(query, "Resolving query");

        let mut trace = Vec::new();
        let route = self.router.route(query).await;
        trace.push(format!(
            "route: {} ({})",
            route.datasource, route.reasoning
        ));

        let resolution = match route.datasource {
            Datasource::StructuredStore => self.resolve_structured(query, trace).await,
            Datasource::KnowledgeDomain => self.resolve_knowledge(query, trace).await,
        };

        if let Some(session_id) = session_id {
            self.history.append(session_id, HistoryRole::User, query).await;
            self.history
                .append(session_id, HistoryRole::Assistant, resolution.text())
                .await;
        }

        resolution
    }

    async fn resolve_structured(&self, query: &str, mut trace: Vec<String>) -> Resolution {
        let Some(planner) = &self.structured else {
            trace.push("warehouse unavailable, using knowledge branch".to_string());
            warn!("Structured branch requested but no warehouse is configured");
            return self.resolve_knowledge(query, trace).await;
        };

        match planner.run(query).await {
            Ok(response) => {
                trace.extend(response.trace.clone());
                Resolution::Structured(StructuredResponse { trace, ..response })
            }
            Err(e) if e.is_fatal_for_request() => {
                // Unsafe generated query: explicit rejection, never executed
                // and never silently downgraded.
                warn!(query, "Plan validation failed: {}", e);
                trace.push("plan rejected by read-only validation".to_string());
                Resolution::Structured(StructuredResponse {
                    text: "The generated database query was rejected for safety reasons and was not executed."
                        .to_string(),
                    is_image: false,
                    image: None,
                    trace,
                })
            }
            Err(e) => {
                warn!(query, "Structured branch failed, falling back to knowledge: {}", e);
                trace.push("structured branch failed, falling back to knowledge".to_string());
                self.resolve_knowledge(query, trace).await
            }
        }
    }

    async fn resolve_knowledge(&self, query: &str, mut trace: Vec<String>) -> Resolution {
        let decomposition = self.decomposer.decompose(query).await;
        trace.push(format!(
            "split: {} sub-queries",
            decomposition.sub_queries.len()
        ));

        let outcome = self
            .dispatcher
            .dispatch(self.worker.clone(), decomposition.sub_queries, self.deadline)
            .await;
        trace.extend(outcome.trace);

        // A worker that ended on the neutral candidate resolved nothing.
        let candidates: Vec<_> = outcome
            .outcomes
            .into_iter()
            .map(|o| o.candidate)
            .filter(|c| c.source != "none")
            .collect();

        trace.push(format!("synthesize: {} resolved candidates", candidates.len()));

        let answer = self
            .final_synthesizer
            .synthesize(query, &candidates, trace)
            .await;

        Resolution::Answer(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvidenceSnippet, TableResult};
    use crate::oracle::{FailingOracle, MockOracle};
    use crate::retrieval::StaticRetrievalClient;
    use crate::store::chart::NullChartRenderer;
    use crate::store::InMemoryWarehouse;
    use crate::web::StaticSearchProvider;

    struct EmptyFetcher;

    #[async_trait::async_trait]
    impl PageFetcher for EmptyFetcher {
        async fn fetch(&self, _url: &str, _timeout_ms: u64) -> String {
            String::new()
        }
    }

    fn orchestrator(
        oracle: Arc<dyn Oracle>,
        retrieval: Arc<dyn RetrievalClient>,
        warehouse: Option<Arc<dyn RelationalStore>>,
    ) -> QueryOrchestrator {
        QueryOrchestrator::new(
            oracle,
            retrieval,
            Arc::new(StaticSearchProvider::empty()),
            Arc::new(EmptyFetcher),
            warehouse,
            Arc::new(NullChartRenderer),
            OrchestratorConfig::default(),
        )
    }

    fn snippets() -> Vec<EvidenceSnippet> {
        vec![
            EvidenceSnippet {
                text: "Paracetamol relieves pain and fever.".to_string(),
                score: 0.8,
                source_id: "drugbank".to_string(),
            },
            EvidenceSnippet {
                text: "Common adult dose is 500mg.".to_string(),
                score: 0.6,
                source_id: "drugbank".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_simple_knowledge_query_end_to_end() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"datasource": "knowledge_domain", "reasoning": "drug question"}"#,
            r#"{"queries": ["What is paracetamol used for?"], "reasoning": "simple"}"#,
            r#"{"answer": "It relieves pain and fever.", "source": "drugbank"}"#,
            r#"{"satisfactory": true, "score": 0.85, "should_retry": false, "reasoning": "good"}"#,
            r#"{"answer": "Paracetamol relieves pain and fever.", "confidence": 0.85}"#,
        ]));

        let orchestrator =
            orchestrator(oracle, Arc::new(StaticRetrievalClient::new(snippets())), None);

        let resolution = orchestrator
            .resolve("What is paracetamol used for?", None)
            .await;

        let Resolution::Answer(answer) = resolution else {
            panic!("expected knowledge answer");
        };
        assert!((answer.confidence - 0.85).abs() < f32::EPSILON);
        assert_eq!(answer.sources, vec!["drugbank"]);
        assert!(!answer.text.is_empty());
        assert!(!answer.trace.is_empty());
    }

    #[tokio::test]
    async fn test_everything_failing_yields_no_information() {
        let orchestrator = orchestrator(
            Arc::new(FailingOracle),
            Arc::new(StaticRetrievalClient::empty()),
            None,
        );

        let resolution = orchestrator.resolve("completely unknown topic", None).await;

        let Resolution::Answer(answer) = resolution else {
            panic!("expected knowledge answer");
        };
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.sources.is_empty());
        assert!(!answer.text.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_politely() {
        let orchestrator = orchestrator(
            Arc::new(FailingOracle),
            Arc::new(StaticRetrievalClient::empty()),
            None,
        );

        let resolution = orchestrator.resolve("   ", None).await;
        assert_eq!(resolution.confidence(), 0.0);
        assert!(!resolution.text().is_empty());
    }

    #[tokio::test]
    async fn test_unsafe_plan_is_rejected_visibly() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"datasource": "structured_store", "reasoning": "warehouse"}"#,
            r#"{"query_text": "DROP TABLE drugs", "needs_visualization": false}"#,
        ]));
        let warehouse: Arc<dyn RelationalStore> = Arc::new(InMemoryWarehouse::new(
            "TABLE drugs".to_string(),
            TableResult::default(),
        ));

        let orchestrator = orchestrator(
            oracle,
            Arc::new(StaticRetrievalClient::empty()),
            Some(warehouse),
        );

        let resolution = orchestrator.resolve("remove the drugs table", None).await;
        let Resolution::Structured(response) = resolution else {
            panic!("expected structured response");
        };
        assert!(response.text.contains("rejected for safety reasons"));
        assert!(!response.is_image);
    }

    #[tokio::test]
    async fn test_structured_route_without_warehouse_falls_back() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"datasource": "structured_store", "reasoning": "stock question"}"#,
            r#"{"queries": ["how much stock?"], "reasoning": "simple"}"#,
            r#"{"answer": "Stock information is unavailable.", "source": "drugbank"}"#,
            r#"{"satisfactory": true, "score": 0.7, "should_retry": false, "reasoning": "ok"}"#,
            r#"{"answer": "Stock information is unavailable.", "confidence": 0.7}"#,
        ]));

        let orchestrator =
            orchestrator(oracle, Arc::new(StaticRetrievalClient::new(snippets())), None);

        let resolution = orchestrator.resolve("how much stock do we have?", None).await;
        let Resolution::Answer(answer) = resolution else {
            panic!("expected fallback to knowledge branch");
        };
        assert!(answer
            .trace
            .iter()
            .any(|t| t.contains("warehouse unavailable")));
    }

    #[tokio::test]
    async fn test_history_records_both_turns() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"datasource": "knowledge_domain", "reasoning": "drug question"}"#,
            r#"{"queries": ["What is aspirin?"], "reasoning": "simple"}"#,
            r#"{"answer": "A blood thinner and pain reliever.", "source": "drugbank"}"#,
            r#"{"satisfactory": true, "score": 0.9, "should_retry": false, "reasoning": "good"}"#,
            r#"{"answer": "Aspirin is a blood thinner and pain reliever.", "confidence": 0.9}"#,
        ]));

        let orchestrator =
            orchestrator(oracle, Arc::new(StaticRetrievalClient::new(snippets())), None);

        orchestrator.resolve("What is aspirin?", Some("session-1")).await;

        let history = orchestrator.history().read("session-1").await;
        assert!(history.contains("user: What is aspirin?"));
        assert!(history.contains("assistant: Aspirin is a blood thinner"));
    }
}
