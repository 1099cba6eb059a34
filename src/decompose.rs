//! Query decomposition
//!
//! Splits a user question into up to three independent sub-queries so each
//! can be retrieved and answered on its own. A simple question decomposes
//! to itself.

use crate::oracle::{parse_json_reply, Oracle};
use std::sync::Arc;
use tracing::{info, warn};

/// Hard cap on sub-queries per question.
const MAX_SUB_QUERIES: usize = 3;

#[derive(Debug, Clone)]
pub struct Decomposition {
    pub sub_queries: Vec<String>,
    pub reasoning: String,
}

pub struct QueryDecomposer {
    oracle: Arc<dyn Oracle>,
}

impl QueryDecomposer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    fn build_prompt(query: &str) -> String {
        format!(
            r#"Split the user question into independent sub-questions for retrieval.

Rules:
- Keep the original intent; never invent unrelated questions.
- Use 1 sub-question for a simple question, at most 3 for a compound one.
- Each sub-question must stand alone.

Return ONLY valid JSON:
{{"queries": ["...", "..."], "reasoning": "..."}}

QUESTION:
{}"#,
            query
        )
    }

    /// One oracle call. On failure or an empty result the original query is
    /// used as the single sub-query.
    pub async fn decompose(&self, query: &str) -> Decomposition {
        match self.oracle.generate(&Self::build_prompt(query)).await {
            Ok(reply) => match Self::parse_reply(&reply) {
                Some(mut decomposition) if !decomposition.sub_queries.is_empty() => {
                    decomposition.sub_queries.truncate(MAX_SUB_QUERIES);
                    info!(
                        count = decomposition.sub_queries.len(),
                        reasoning = %decomposition.reasoning,
                        "Split query into sub-queries"
                    );
                    decomposition
                }
                _ => {
                    warn!("Decomposer reply unusable, keeping original query");
                    Self::fallback(query)
                }
            },
            Err(e) => {
                warn!("Error in splitting query: {}", e);
                Self::fallback(query)
            }
        }
    }

    fn parse_reply(reply: &str) -> Option<Decomposition> {
        let value = parse_json_reply(reply).ok()?;
        let queries = value
            .get("queries")?
            .as_array()?
            .iter()
            .filter_map(|q| q.as_str())
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect::<Vec<_>>();

        Some(Decomposition {
            sub_queries: queries,
            reasoning: value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
    }

    fn fallback(query: &str) -> Decomposition {
        Decomposition {
            sub_queries: vec![query.to_string()],
            reasoning: "fallback - using original query".to_string(),
        }
    }
}
