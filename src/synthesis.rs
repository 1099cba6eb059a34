//! Final answer synthesis
//!
//! Merges the resolved candidates (in submission order) into one answer via
//! a single oracle call over all of them at once. Sources are the
//! deduplicated, first-seen-order union of the candidates' attributions.

use crate::models::{clamp_score, dedup_sources, CandidateAnswer, FinalAnswer};
use crate::oracle::{parse_json_reply, Oracle};
use std::sync::Arc;
use tracing::{info, warn};

/// Confidence reported when the oracle is down and the first candidate is
/// returned verbatim.
const DEGRADED_CONFIDENCE: f32 = 0.6;

pub struct FinalAnswerSynthesizer {
    oracle: Arc<dyn Oracle>,
}

impl FinalAnswerSynthesizer {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    fn format_candidates(candidates: &[CandidateAnswer]) -> String {
        candidates
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[Source {}: {}]\n{}", i + 1, c.source, c.text))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    fn build_prompt(query: &str, candidates: &[CandidateAnswer]) -> String {
        format!(
            r#"You are a professional pharmacy assistant. Combine the partial
answers below into one final answer for the user.

Principles:
- Merge information from ALL sources coherently.
- Drop duplicates, keep what matters.
- Answer the question directly, no long preamble.

Return ONLY valid JSON:
{{"answer": "...", "confidence": 0.0-1.0}}

QUESTION:
{}

PARTIAL ANSWERS:
{}"#,
            query,
            Self::format_candidates(candidates)
        )
    }

    /// One oracle call over all candidates at once. Degrades to the first
    /// candidate verbatim; an empty candidate list yields the fixed
    /// no-information answer with confidence 0.0.
    pub async fn synthesize(
        &self,
        query: &str,
        candidates: &[CandidateAnswer],
        trace: Vec<String>,
    ) -> FinalAnswer {
        if candidates.is_empty() {
            return FinalAnswer::no_information(trace);
        }

        let sources = dedup_sources(candidates.iter().map(|c| c.source.as_str()));

        match self
            .oracle
            .generate(&Self::build_prompt(query, candidates))
            .await
        {
            Ok(reply) => match Self::parse_reply(&reply) {
                Some((text, confidence)) => {
                    info!(candidates = candidates.len(), "Generated final answer");
                    FinalAnswer {
                        text,
                        sources,
                        confidence,
                        trace,
                    }
                }
                None => {
                    warn!("Final synthesis reply unusable, degrading to first candidate");
                    Self::degraded(candidates, sources, trace)
                }
            },
            Err(e) => {
                warn!("Error generating final answer: {}", e);
                Self::degraded(candidates, sources, trace)
            }
        }
    }

    fn parse_reply(reply: &str) -> Option<(String, f32)> {
        let value = parse_json_reply(reply).ok()?;
        let text = value.get("answer")?.as_str()?.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let confidence = clamp_score(
            value
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(DEGRADED_CONFIDENCE as f64) as f32,
        );
        Some((text, confidence))
    }

    fn degraded(
        candidates: &[CandidateAnswer],
        sources: Vec<String>,
        trace: Vec<String>,
    ) -> FinalAnswer {
        let first = &candidates[0];
        FinalAnswer {
            text: first.text.clone(),
            sources: if sources.is_empty() {
                dedup_sources(std::iter::once(first.source.as_str()))
            } else {
                sources
            },
            confidence: DEGRADED_CONFIDENCE,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FailingOracle, MockOracle};

    fn candidate(text: &str, source: &str) -> CandidateAnswer {
        CandidateAnswer {
            text: text.to_string(),
            source: source.to_string(),
            origin_sub_query: "q".to_string(),
        }
    }

    #[tokio::test]
    async fn test_synthesize_merges_all_candidates() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"answer": "Combined answer.", "confidence": 0.88}"#,
        ]));
        let synthesizer = FinalAnswerSynthesizer::new(oracle);

        let candidates = vec![
            candidate("Part one.", "drugbank"),
            candidate("Part two.", "who"),
            candidate("Part three.", "drugbank"),
        ];
        let answer = synthesizer.synthesize("question", &candidates, vec![]).await;

        assert_eq!(answer.text, "Combined answer.");
        assert_eq!(answer.sources, vec!["drugbank", "who"]);
        assert!((answer.confidence - 0.88).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_candidates_yield_no_information() {
        let synthesizer = FinalAnswerSynthesizer::new(Arc::new(FailingOracle));

        let answer = synthesizer.synthesize("question", &[], vec!["step".to_string()]).await;
        assert_eq!(answer.confidence, 0.0);
        assert!(answer.sources.is_empty());
        assert!(!answer.text.is_empty());
        assert_eq!(answer.trace, vec!["step".to_string()]);
    }

    #[tokio::test]
    async fn test_oracle_failure_degrades_to_first_candidate() {
        let synthesizer = FinalAnswerSynthesizer::new(Arc::new(FailingOracle));

        let candidates = vec![
            candidate("First answer.", "drugbank"),
            candidate("Second answer.", "who"),
        ];
        let answer = synthesizer.synthesize("question", &candidates, vec![]).await;

        assert_eq!(answer.text, "First answer.");
        assert_eq!(answer.confidence, 0.6);
        assert_eq!(answer.sources, vec!["drugbank", "who"]);
    }

    #[tokio::test]
    async fn test_confidence_clamped() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"answer": "A.", "confidence": 42.0}"#,
        ]));
        let synthesizer = FinalAnswerSynthesizer::new(oracle);

        let answer = synthesizer
            .synthesize("q", &[candidate("A.", "s")], vec![])
            .await;
        assert_eq!(answer.confidence, 1.0);
    }
}
