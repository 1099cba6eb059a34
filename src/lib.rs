//! Medical Query Orchestrator
//!
//! A pharmacy assistant backend that:
//! - Routes each question to a RAG branch or a warehouse-database branch
//! - Decomposes complex questions into independent sub-queries
//! - Resolves each sub-query through a quality-gated retry loop with a
//!   live web-search fallback
//! - Synthesizes one attributed final answer from the resolved parts
//! - Keeps bounded, self-compacting conversational memory per session
//!
//! PIPELINE:
//! QUERY → ROUTE → SPLIT → RETRIEVE → EVALUATE → {RETRY | WEB} → SYNTHESIZE

pub mod agent;
pub mod answer;
pub mod api;
pub mod decompose;
pub mod dispatch;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod models;
pub mod oracle;
pub mod retrieval;
pub mod router;
pub mod store;
pub mod synthesis;
pub mod web;
pub mod worker;

pub use error::Result;

// Re-export common types
pub use agent::{OrchestratorConfig, QueryOrchestrator};
pub use models::*;
