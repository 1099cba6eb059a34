//! Chart derivation for warehouse statistics
//!
//! Derives a concrete chart specification from a query plan and the
//! executed table. Rendering itself is an external collaborator behind
//! `ChartRenderer`.

use crate::error::OrchestrationError;
use crate::models::{ChartKind, QueryPlan, TableResult};
use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub kind: ChartKind,
    pub x_field: String,
    pub y_field: String,
    pub title: String,
}

/// Resolve the plan's chart fields against the actual result table.
/// Missing or unknown fields fall back to the first/second column.
pub fn derive_chart_spec(plan: &QueryPlan, table: &TableResult) -> Result<ChartSpec> {
    if table.columns.is_empty() || table.is_empty() {
        return Err(OrchestrationError::ChartError(
            "no data to chart".to_string(),
        ));
    }

    let pick = |requested: &Option<String>, fallback_idx: usize| -> String {
        requested
            .as_deref()
            .filter(|name| table.columns.iter().any(|c| c == name))
            .map(|name| name.to_string())
            .unwrap_or_else(|| {
                table
                    .columns
                    .get(fallback_idx)
                    .or_else(|| table.columns.first())
                    .cloned()
                    .unwrap_or_default()
            })
    };

    Ok(ChartSpec {
        kind: plan.chart.unwrap_or(ChartKind::Bar),
        x_field: pick(&plan.x_field, 0),
        y_field: pick(&plan.y_field, 1),
        title: plan
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Statistics chart".to_string()),
    })
}

/// External chart rendering capability.
#[async_trait::async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, spec: &ChartSpec, table: &TableResult) -> Result<Vec<u8>>;
}

/// Renderer stand-in for deployments without a chart service; always
/// fails, which degrades the chart path to a text answer.
pub struct NullChartRenderer;

#[async_trait::async_trait]
impl ChartRenderer for NullChartRenderer {
    async fn render(&self, _spec: &ChartSpec, _table: &TableResult) -> Result<Vec<u8>> {
        Err(OrchestrationError::ChartError(
            "no chart renderer configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableResult {
        TableResult {
            columns: vec!["supplier".to_string(), "import_value".to_string()],
            rows: vec![
                vec!["Acme Pharma".to_string(), "120000".to_string()],
                vec!["MediSupply".to_string(), "90000".to_string()],
            ],
        }
    }

    fn plan(x: Option<&str>, y: Option<&str>) -> QueryPlan {
        QueryPlan {
            query_text: "SELECT supplier, import_value FROM imports".to_string(),
            needs_visualization: true,
            chart: Some(ChartKind::Bar),
            x_field: x.map(|s| s.to_string()),
            y_field: y.map(|s| s.to_string()),
            title: None,
        }
    }

    #[test]
    fn test_derive_uses_plan_fields_when_valid() {
        let spec = derive_chart_spec(&plan(Some("supplier"), Some("import_value")), &table()).unwrap();
        assert_eq!(spec.x_field, "supplier");
        assert_eq!(spec.y_field, "import_value");
        assert_eq!(spec.kind, ChartKind::Bar);
    }

    #[test]
    fn test_derive_falls_back_to_first_columns() {
        let spec = derive_chart_spec(&plan(Some("ghost"), None), &table()).unwrap();
        assert_eq!(spec.x_field, "supplier");
        assert_eq!(spec.y_field, "import_value");
        assert_eq!(spec.title, "Statistics chart");
    }

    #[test]
    fn test_derive_rejects_empty_table() {
        let empty = TableResult::default();
        assert!(derive_chart_spec(&plan(None, None), &empty).is_err());
    }

    #[tokio::test]
    async fn test_null_renderer_fails() {
        let spec = derive_chart_spec(&plan(None, None), &table()).unwrap();
        assert!(NullChartRenderer.render(&spec, &table()).await.is_err());
    }
}
