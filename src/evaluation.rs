//! Answer quality evaluation
//!
//! Scores a candidate answer and decides accept / retry / escalate. The
//! oracle's verdict is trusted except for one hard local rule: once the
//! try budget is spent, a retry is never requested again.

use crate::models::{clamp_score, CandidateAnswer, EvaluationResult};
use crate::oracle::{parse_json_reply, Oracle};
use std::sync::Arc;
use tracing::{info, warn};

pub struct QualityEvaluator {
    oracle: Arc<dyn Oracle>,
    max_retries: u32,
}

impl QualityEvaluator {
    pub fn new(oracle: Arc<dyn Oracle>, max_retries: u32) -> Self {
        Self {
            oracle,
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn build_prompt(&self, sub_query: &str, candidate: &CandidateAnswer, try_count: u32) -> String {
        format!(
            r#"Evaluate whether the answer satisfies the question. This is attempt
{} of {}.

Return ONLY valid JSON:
{{"satisfactory": true|false, "score": 0.0-1.0, "should_retry": true|false, "reasoning": "..."}}

QUESTION:
{}

ANSWER:
{}"#,
            try_count, self.max_retries, sub_query, candidate.text
        )
    }

    /// One oracle call wrapped into an `EvaluationResult`. The local
    /// `try_count >= max_retries` rule overrides the oracle on retries.
    pub async fn evaluate(
        &self,
        sub_query: &str,
        candidate: &CandidateAnswer,
        try_count: u32,
    ) -> EvaluationResult {
        let mut result = match self
            .oracle
            .generate(&self.build_prompt(sub_query, candidate, try_count))
            .await
        {
            Ok(reply) => Self::parse_reply(&reply).unwrap_or_else(|| {
                warn!("Evaluator reply unusable, using conservative default");
                self.conservative_default(try_count)
            }),
            Err(e) => {
                warn!("Error in evaluating answer: {}", e);
                self.conservative_default(try_count)
            }
        };

        if try_count >= self.max_retries {
            if result.should_retry {
                info!(
                    max_retries = self.max_retries,
                    "Max tries reached, should not retry"
                );
            }
            result.should_retry = false;
        }

        info!(
            satisfactory = result.satisfactory,
            score = result.score,
            should_retry = result.should_retry,
            try_count,
            max_retries = self.max_retries,
            "Answer evaluation"
        );

        result
    }

    fn parse_reply(reply: &str) -> Option<EvaluationResult> {
        let value = parse_json_reply(reply).ok()?;

        Some(EvaluationResult {
            satisfactory: value.get("satisfactory")?.as_bool()?,
            score: clamp_score(value.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32),
            should_retry: value
                .get("should_retry")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            reasoning: value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        })
    }

    fn conservative_default(&self, try_count: u32) -> EvaluationResult {
        EvaluationResult {
            satisfactory: false,
            score: 0.0,
            should_retry: try_count < self.max_retries,
            reasoning: format!("evaluation unavailable (attempt {})", try_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FailingOracle, MockOracle};

    fn candidate() -> CandidateAnswer {
        CandidateAnswer {
            text: "Take 500mg every 6 hours.".to_string(),
            source: "drugbank".to_string(),
            origin_sub_query: "dosage?".to_string(),
        }
    }

    #[tokio::test]
    async fn test_satisfactory_answer_accepted() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"satisfactory": true, "score": 0.85, "should_retry": false, "reasoning": "complete"}"#,
        ]));
        let evaluator = QualityEvaluator::new(oracle, 3);

        let result = evaluator.evaluate("dosage?", &candidate(), 1).await;
        assert!(result.satisfactory);
        assert!((result.score - 0.85).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_retry_forced_off_at_max_tries() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"satisfactory": false, "score": 0.3, "should_retry": true, "reasoning": "weak"}"#,
        ]));
        let evaluator = QualityEvaluator::new(oracle, 2);

        let result = evaluator.evaluate("dosage?", &candidate(), 2).await;
        assert!(!result.satisfactory);
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn test_oracle_failure_below_max_allows_retry() {
        let evaluator = QualityEvaluator::new(Arc::new(FailingOracle), 3);

        let result = evaluator.evaluate("dosage?", &candidate(), 1).await;
        assert!(!result.satisfactory);
        assert!(result.should_retry);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_oracle_failure_at_max_blocks_retry() {
        let evaluator = QualityEvaluator::new(Arc::new(FailingOracle), 3);

        let result = evaluator.evaluate("dosage?", &candidate(), 3).await;
        assert!(!result.should_retry);
    }

    #[tokio::test]
    async fn test_score_clamped_into_unit_range() {
        let oracle = Arc::new(MockOracle::new(vec![
            r#"{"satisfactory": true, "score": 3.5, "should_retry": false, "reasoning": "odd"}"#,
        ]));
        let evaluator = QualityEvaluator::new(oracle, 3);

        let result = evaluator.evaluate("dosage?", &candidate(), 1).await;
        assert_eq!(result.score, 1.0);
    }
}
