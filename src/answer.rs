//! Candidate answer synthesis
//!
//! Turns one sub-query plus its evidence snippets into an attributed
//! candidate answer via a single oracle call.

use crate::error::OrchestrationError;
use crate::models::{CandidateAnswer, EvidenceSnippet};
use crate::oracle::{parse_json_reply, Oracle};
use crate::Result;
use std::sync::Arc;

pub struct AnswerSynthesizer {
    oracle: Arc<dyn Oracle>,
}

impl AnswerSynthesizer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    fn format_evidence(evidence: &[EvidenceSnippet]) -> String {
        evidence
            .iter()
            .map(|s| format!("[Source: {}]\n{}", s.source_id, s.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn build_prompt(sub_query: &str, evidence: &[EvidenceSnippet]) -> String {
        format!(
            r#"You are a professional pharmacy assistant. Answer the question using
ONLY the provided context. If the context does not contain the answer, say so.

Return ONLY valid JSON:
{{"answer": "...", "source": "..."}}

CONTEXT:
{}

QUESTION:
{}"#,
            Self::format_evidence(evidence),
            sub_query
        )
    }

    /// One oracle call. Failures propagate to the worker, which treats
    /// them like an empty retrieval and escalates to the web fallback.
    pub async fn synthesize(
        &self,
        sub_query: &str,
        evidence: &[EvidenceSnippet],
    ) -> Result<CandidateAnswer> {
        let reply = self
            .oracle
            .generate(&Self::build_prompt(sub_query, evidence))
            .await?;

        let value = parse_json_reply(&reply)?;

        let text = value
            .get("answer")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                OrchestrationError::OracleFailure("answer field missing".to_string())
            })?;

        let source = value
            .get("source")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| {
                evidence
                    .first()
                    .map(|s| s.source_id.clone())
                    .unwrap_or_else(|| "knowledge_base".to_string())
            });

        Ok(CandidateAnswer {
            text: text.to_string(),
            source,
            origin_sub_query: sub_query.to_string(),
        })
    }
}
