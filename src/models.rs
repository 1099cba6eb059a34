//! Core data models for the medical query orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Routing =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Datasource {
    KnowledgeDomain,
    StructuredStore,
}

impl Datasource {
    /// Parse an oracle-emitted label. Unknown labels route to the
    /// knowledge branch so a misbehaving oracle can never strand a query.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "structured_store" | "store_database" => Datasource::StructuredStore,
            "knowledge_domain" | "medical_knowledge" => Datasource::KnowledgeDomain,
            _ => Datasource::KnowledgeDomain,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub datasource: Datasource,
    pub reasoning: String,
}

//
// ================= Retrieval =================
//

/// A scored passage from the similarity-search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSnippet {
    pub text: String,
    pub score: f32,
    pub source_id: String,
}

//
// ================= Answers =================
//

/// Unverified, attributed answer for one sub-query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAnswer {
    pub text: String,
    pub source: String,
    pub origin_sub_query: String,
}

impl CandidateAnswer {
    /// Fixed neutral candidate used when both retrieval and web fallback
    /// come up empty.
    pub fn no_information(sub_query: &str) -> Self {
        Self {
            text: "Sorry, I could not find reliable information to answer this question."
                .to_string(),
            source: "none".to_string(),
            origin_sub_query: sub_query.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub satisfactory: bool,
    pub score: f32,
    pub should_retry: bool,
    pub reasoning: String,
}

/// Final answer returned to the user for the knowledge branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// Deduplicated, first-seen order.
    pub sources: Vec<String>,
    pub confidence: f32,
    pub trace: Vec<String>,
}

impl FinalAnswer {
    /// Fixed answer for the zero-candidates case.
    pub fn no_information(trace: Vec<String>) -> Self {
        Self {
            text: "Sorry, I could not find any information to answer your question."
                .to_string(),
            sources: vec![],
            confidence: 0.0,
            trace,
        }
    }
}

/// Merge candidate attributions into a deduplicated, first-seen-order list.
pub fn dedup_sources<'a, I: IntoIterator<Item = &'a str>>(sources: I) -> Vec<String> {
    let mut seen = Vec::new();
    for source in sources {
        let source = source.trim();
        if source.is_empty() {
            continue;
        }
        if !seen.iter().any(|s: &String| s == source) {
            seen.push(source.to_string());
        }
    }
    seen
}

/// Clamp an oracle-reported score into [0, 1].
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

//
// ================= Structured branch =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Bar,
    Pie,
    HorizontalBar,
    Area,
}

impl ChartKind {
    /// Parse an oracle-emitted chart label; unknown labels fall back to `Bar`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "line" => ChartKind::Line,
            "bar" => ChartKind::Bar,
            "pie" => ChartKind::Pie,
            "horizontal_bar" | "barh" => ChartKind::HorizontalBar,
            "area" => ChartKind::Area,
            _ => ChartKind::Bar,
        }
    }
}

/// Generated, untrusted read-only query plan for the warehouse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub query_text: String,
    pub needs_visualization: bool,
    pub chart: Option<ChartKind>,
    pub x_field: Option<String>,
    pub y_field: Option<String>,
    pub title: Option<String>,
}

/// Tabular result of a validated read-only query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Response for the structured branch: text plus an optional rendered chart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub text: String,
    pub is_image: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    pub trace: Vec<String>,
}

//
// ================= Unified resolution =================
//

/// What `resolve` hands back: one of the two branch outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Answer(FinalAnswer),
    Structured(StructuredResponse),
}

impl Resolution {
    pub fn text(&self) -> &str {
        match self {
            Resolution::Answer(a) => &a.text,
            Resolution::Structured(s) => &s.text,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Resolution::Answer(a) => a.confidence,
            // Original surface reported fixed confidences for the
            // database branch: 0.9 with a chart, 0.85 text-only.
            Resolution::Structured(s) => {
                if s.is_image {
                    0.9
                } else {
                    0.85
                }
            }
        }
    }

    pub fn sources(&self) -> Vec<String> {
        match self {
            Resolution::Answer(a) => a.sources.clone(),
            Resolution::Structured(_) => vec!["Database".to_string()],
        }
    }

    pub fn trace(&self) -> &[String] {
        match self {
            Resolution::Answer(a) => &a.trace,
            Resolution::Structured(s) => &s.trace,
        }
    }
}

//
// ================= History =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub message: String,
}

impl fmt::Display for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Datasource::KnowledgeDomain => "knowledge_domain",
            Datasource::StructuredStore => "structured_store",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for HistoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HistoryRole::User => "user",
            HistoryRole::Assistant => "assistant",
            HistoryRole::Summary => "summary",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_parse_default_arm() {
        assert_eq!(Datasource::parse("structured_store"), Datasource::StructuredStore);
        assert_eq!(Datasource::parse("knowledge_domain"), Datasource::KnowledgeDomain);
        assert_eq!(Datasource::parse("something_else"), Datasource::KnowledgeDomain);
        assert_eq!(Datasource::parse(""), Datasource::KnowledgeDomain);
    }

    #[test]
    fn test_chart_kind_parse_default_arm() {
        assert_eq!(ChartKind::parse("pie"), ChartKind::Pie);
        assert_eq!(ChartKind::parse("horizontal_bar"), ChartKind::HorizontalBar);
        assert_eq!(ChartKind::parse("scatter3d"), ChartKind::Bar);
    }

    #[test]
    fn test_dedup_sources_first_seen_order() {
        let sources = vec!["drugbank", "who", "drugbank", "", "pubmed", "who"];
        let deduped = dedup_sources(sources.iter().map(|s| *s));
        assert_eq!(deduped, vec!["drugbank", "who", "pubmed"]);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(1.7), 1.0);
        assert_eq!(clamp_score(-0.3), 0.0);
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(0.85), 0.85);
    }

    #[test]
    fn test_structured_resolution_confidence() {
        let with_chart = Resolution::Structured(StructuredResponse {
            text: "chart".into(),
            is_image: true,
            image: Some(vec![1, 2, 3]),
            trace: vec![],
        });
        assert_eq!(with_chart.confidence(), 0.9);

        let text_only = Resolution::Structured(StructuredResponse {
            text: "rows".into(),
            is_image: false,
            image: None,
            trace: vec![],
        });
        assert_eq!(text_only.confidence(), 0.85);
        assert_eq!(text_only.sources(), vec!["Database".to_string()]);
    }
}
