//! Structured query planning and execution
//!
//! One oracle call turns a warehouse question into an untrusted
//! `QueryPlan`; the plan is validated as strictly read-only, executed, and
//! answered as text or as a chart with a bounded table preview.

use crate::models::{ChartKind, QueryPlan, StructuredResponse, TableResult};
use crate::oracle::{parse_json_reply, Oracle};
use crate::store::chart::{derive_chart_spec, ChartRenderer};
use crate::store::{validate_read_only, RelationalStore};
use crate::Result;
use crate::error::OrchestrationError;
use std::sync::Arc;
use tracing::{info, warn};

/// Preview bounds for text answers and chart captions.
const TEXT_PREVIEW_ROWS: usize = 50;
const CHART_PREVIEW_ROWS: usize = 10;

/// Markdown preview of a result table, truncated with an explicit marker.
pub fn table_preview(table: &TableResult, max_rows: usize) -> String {
    if table.is_empty() {
        return "No matching data.".to_string();
    }

    let mut out = String::new();
    if table.row_count() > max_rows {
        out.push_str(&format!(
            "{} rows total, showing first {}.\n\n",
            table.row_count(),
            max_rows
        ));
    }

    out.push_str(&format!("| {} |\n", table.columns.join(" | ")));
    out.push_str(&format!(
        "|{}|\n",
        table
            .columns
            .iter()
            .map(|_| "---")
            .collect::<Vec<_>>()
            .join("|")
    ));
    for row in table.rows.iter().take(max_rows) {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }

    out
}

pub struct StructuredQueryPlanner {
    oracle: Arc<dyn Oracle>,
    store: Arc<dyn RelationalStore>,
    renderer: Arc<dyn ChartRenderer>,
}

impl StructuredQueryPlanner {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        store: Arc<dyn RelationalStore>,
        renderer: Arc<dyn ChartRenderer>,
    ) -> Self {
        Self {
            oracle,
            store,
            renderer,
        }
    }

    fn build_plan_prompt(question: &str, schema: &str) -> String {
        format!(
            r#"You plan read-only queries for a drug warehouse database.

Rules:
- Exactly one SELECT statement (WITH allowed), nothing else.
- Decide whether the user wants a chart; pick chart type and axes.

Return ONLY valid JSON:
{{"query_text": "SELECT ...", "needs_visualization": true|false,
  "chart": "line"|"bar"|"pie"|"horizontal_bar"|"area",
  "x_field": "...", "y_field": "...", "title": "..."}}

SCHEMA:
{}

QUESTION:
{}"#,
            schema, question
        )
    }

    /// One oracle call producing the untrusted plan.
    pub async fn plan(&self, question: &str, schema: &str) -> Result<QueryPlan> {
        let reply = self
            .oracle
            .generate(&Self::build_plan_prompt(question, schema))
            .await?;
        let value = parse_json_reply(&reply)?;

        let query_text = value
            .get("query_text")
            .or_else(|| value.get("sql"))
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                OrchestrationError::OracleFailure("plan is missing query_text".to_string())
            })?
            .trim()
            .to_string();

        let get_string = |key: &str| {
            value
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .filter(|s| !s.trim().is_empty())
        };

        Ok(QueryPlan {
            query_text,
            needs_visualization: value
                .get("needs_visualization")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            chart: get_string("chart").map(|label| ChartKind::parse(&label)),
            x_field: get_string("x_field"),
            y_field: get_string("y_field"),
            title: get_string("title"),
        })
    }

    /// Full structured branch: plan → validate → execute → answer.
    ///
    /// Errors out of this function mean the branch could not start
    /// (schema/planning failure) or the plan was rejected; the caller
    /// decides what those mean. Execution and chart failures degrade to a
    /// textual response here.
    pub async fn run(&self, question: &str) -> Result<StructuredResponse> {
        let mut trace = Vec::new();

        let schema = self.store.describe_schema().await?;

        let plan = self.plan(question, &schema).await?;
        trace.push(format!(
            "plan: {} (chart: {})",
            plan.query_text,
            if plan.needs_visualization { "yes" } else { "no" }
        ));
        info!(query_text = %plan.query_text, needs_visualization = plan.needs_visualization, "Generated query plan");

        // Trust boundary: fatal for the request when it fails.
        validate_read_only(&plan.query_text)?;

        let table = match self.store.execute_read_only(&plan.query_text).await {
            Ok(table) => table,
            Err(e) => {
                warn!(question, "Warehouse execution failed: {}", e);
                trace.push("execute: failed".to_string());
                return Ok(StructuredResponse {
                    text: "The database query failed to execute. Please try rephrasing your question."
                        .to_string(),
                    is_image: false,
                    image: None,
                    trace,
                });
            }
        };
        trace.push(format!("execute: {} rows", table.row_count()));

        if !plan.needs_visualization {
            return Ok(self.text_answer(question, &table, trace).await);
        }

        let render_error = match derive_chart_spec(&plan, &table) {
            Ok(spec) => match self.renderer.render(&spec, &table).await {
                Ok(image) => {
                    trace.push(format!("chart: rendered {:?}", spec.kind));
                    let text = format!(
                        "**{}**\n\n{}",
                        spec.title,
                        table_preview(&table, CHART_PREVIEW_ROWS)
                    );
                    return Ok(StructuredResponse {
                        text,
                        is_image: true,
                        image: Some(image),
                        trace,
                    });
                }
                Err(e) => e,
            },
            Err(e) => e,
        };

        // Chart failure is never fatal: fall back to the text path with a
        // visible note.
        warn!(question, "Chart generation failed: {}", render_error);
        trace.push("chart: failed, falling back to text".to_string());
        let mut response = self.text_answer(question, &table, trace).await;
        response
            .text
            .push_str(&format!("\n\n(chart could not be rendered: {})", render_error));
        Ok(response)
    }

    /// Text answer from a bounded preview of the table. The oracle failure
    /// default is the preview itself.
    async fn text_answer(
        &self,
        question: &str,
        table: &TableResult,
        mut trace: Vec<String>,
    ) -> StructuredResponse {
        let preview = table_preview(table, TEXT_PREVIEW_ROWS);

        let prompt = format!(
            r#"Answer the user's question from the query result below. Be precise
with numbers and keep it short.

Return ONLY valid JSON: {{"answer": "..."}}

RESULT:
{}

QUESTION:
{}"#,
            preview, question
        );

        let text = match self.oracle.generate(&prompt).await {
            Ok(reply) => parse_json_reply(&reply)
                .ok()
                .and_then(|v| v.get("answer").and_then(|a| a.as_str()).map(|s| s.to_string()))
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| preview.clone()),
            Err(e) => {
                warn!("Text answer synthesis failed: {}", e);
                preview.clone()
            }
        };

        trace.push("answer: text generated from result preview".to_string());

        StructuredResponse {
            text,
            is_image: false,
            image: None,
            trace,
        }
    }
}
