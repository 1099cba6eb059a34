//! Error types for the medical query orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Oracle failure: {0}")]
    OracleFailure(String),

    #[error("Retrieval failure: {0}")]
    RetrievalFailure(String),

    #[error("Web fetch failure: {0}")]
    WebFetchFailure(String),

    #[error("Plan validation failure: {0}")]
    PlanValidationFailure(String),

    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    #[error("Aggregation failure: {0}")]
    AggregationFailure(String),

    #[error("History error: {0}")]
    HistoryError(String),

    #[error("Chart error: {0}")]
    ChartError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// True for the one failure class that must surface to the user
    /// instead of degrading to a default value.
    pub fn is_fatal_for_request(&self) -> bool {
        matches!(self, OrchestrationError::PlanValidationFailure(_))
    }
}
