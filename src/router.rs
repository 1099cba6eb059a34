//! Query router
//!
//! Decides which branch handles a query:
//! - knowledge_domain: RAG over the medical knowledge base
//! - structured_store: drug-warehouse database queries and statistics

use crate::models::{Datasource, RouteDecision};
use crate::oracle::{parse_json_reply, Oracle};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Router {
    oracle: Arc<dyn Oracle>,
}

impl Router {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    fn build_prompt(question: &str) -> String {
        format!(
            r#"You are a router for a pharmacy assistant. Classify the user question.

Route to "structured_store" for questions about warehouse stock, prices,
suppliers, sales statistics or charts. Route to "knowledge_domain" for
questions about drugs, dosage, interactions, symptoms or general medical
knowledge.

Return ONLY valid JSON:
{{"datasource": "knowledge_domain" | "structured_store", "reasoning": "..."}}

QUESTION:
{}"#,
            question
        )
    }

    /// One oracle call, no retries. A failed call defaults to the
    /// knowledge branch.
    pub async fn route(&self, question: &str) -> RouteDecision {
        match self.oracle.generate(&Self::build_prompt(question)).await {
            Ok(reply) => match Self::parse_decision(&reply) {
                Some(decision) => {
                    info!(
                        datasource = %decision.datasource,
                        reasoning = %decision.reasoning,
                        "Routed question"
                    );
                    decision
                }
                None => {
                    warn!("Router reply was not parseable, defaulting to knowledge branch");
                    Self::fallback()
                }
            },
            Err(e) => {
                warn!("Error in routing: {}", e);
                Self::fallback()
            }
        }
    }

    fn parse_decision(reply: &str) -> Option<RouteDecision> {
        let value = parse_json_reply(reply).ok()?;
        let label = value.get("datasource")?.as_str()?;

        Some(RouteDecision {
            datasource: Datasource::parse(label),
            reasoning: value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
    }

    fn fallback() -> RouteDecision {
        RouteDecision {
            datasource: Datasource::KnowledgeDomain,
            reasoning: "fallback".to_string(),
        }
    }
}
