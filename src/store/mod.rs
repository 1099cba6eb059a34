//! Structured warehouse branch
//!
//! Natural-language questions about stock, prices and statistics are
//! answered by planning a read-only query against the relational drug
//! warehouse. Generated query text is untrusted and must pass the
//! read-only validator before it gets anywhere near the store.

pub mod chart;
pub mod planner;
pub mod warehouse;

pub use planner::StructuredQueryPlanner;
pub use warehouse::{InMemoryWarehouse, PostgresWarehouse};

use crate::error::OrchestrationError;
use crate::models::TableResult;
use crate::Result;

/// Read/execute-only access to the relational store.
#[async_trait::async_trait]
pub trait RelationalStore: Send + Sync {
    async fn describe_schema(&self) -> Result<String>;

    /// Execute a validated read-only statement. Implementations must
    /// re-check the statement; defense does not rely on the caller.
    async fn execute_read_only(&self, sql: &str) -> Result<TableResult>;
}

/// Statement keywords that disqualify a generated query outright.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate",
    "replace", "merge", "attach", "pragma", "grant", "revoke", "copy",
    "vacuum",
];

/// Reject any generated statement that is not a single read-only query.
///
/// This is the trust boundary of the structured branch: a rejected plan is
/// fatal for the request, never silently executed or downgraded.
pub fn validate_read_only(sql: &str) -> Result<()> {
    let trimmed = sql.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return Err(OrchestrationError::PlanValidationFailure(
            "empty statement".to_string(),
        ));
    }

    if trimmed.contains(';') {
        return Err(OrchestrationError::PlanValidationFailure(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let lowered = trimmed.to_lowercase();
    let first_word = lowered.split_whitespace().next().unwrap_or("");
    if first_word != "select" && first_word != "with" {
        return Err(OrchestrationError::PlanValidationFailure(format!(
            "statement must start with SELECT or WITH, got '{}'",
            first_word
        )));
    }

    // Word-boundary scan: identifiers like `last_update` stay legal.
    for token in lowered.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if FORBIDDEN_KEYWORDS.contains(&token) {
            return Err(OrchestrationError::PlanValidationFailure(format!(
                "forbidden keyword '{}'",
                token
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        assert!(validate_read_only("SELECT name, stock FROM drugs ORDER BY stock DESC").is_ok());
        assert!(validate_read_only("  select 1;  ").is_ok());
        assert!(validate_read_only("WITH top AS (SELECT * FROM drugs) SELECT * FROM top").is_ok());
    }

    #[test]
    fn test_rejects_mutating_statements() {
        for sql in [
            "INSERT INTO drugs VALUES (1)",
            "UPDATE drugs SET stock = 0",
            "DELETE FROM drugs",
            "DROP TABLE drugs",
            "ALTER TABLE drugs ADD COLUMN x int",
            "TRUNCATE drugs",
        ] {
            assert!(validate_read_only(sql).is_err(), "should reject: {}", sql);
        }
    }

    #[test]
    fn test_rejects_embedded_mutation() {
        assert!(validate_read_only("SELECT 1; DROP TABLE drugs").is_err());
        assert!(validate_read_only("SELECT * FROM drugs WHERE id IN (DELETE FROM x)").is_err());
    }

    #[test]
    fn test_identifier_containing_keyword_is_legal() {
        assert!(validate_read_only("SELECT last_update, created_at FROM drugs").is_ok());
    }

    #[test]
    fn test_rejects_empty_and_non_select() {
        assert!(validate_read_only("   ").is_err());
        assert!(validate_read_only("EXPLAIN SELECT 1").is_err());
    }
}
