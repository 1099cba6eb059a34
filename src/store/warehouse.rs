//! Relational store backends
//!
//! Postgres for deployments, in-memory for development & tests. Both sit
//! behind `RelationalStore` and both re-validate statements before
//! touching any data.

use crate::error::OrchestrationError;
use crate::models::TableResult;
use crate::store::{validate_read_only, RelationalStore};
use crate::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use std::env;
use tracing::{info, warn};

/// Postgres-backed drug warehouse.
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lazily-connecting pool from `DATABASE_URL` / `POSTGRES_URL`.
    pub fn from_env() -> Option<Self> {
        let url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()?;

        match PgPoolOptions::new().max_connections(5).connect_lazy(&url) {
            Ok(pool) => {
                info!("Warehouse backend: postgres");
                Some(Self { pool })
            }
            Err(error) => {
                warn!("Failed to initialize warehouse pool: {}", error);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl RelationalStore for PostgresWarehouse {
    async fn describe_schema(&self) -> Result<String> {
        let rows = sqlx::query(
            r#"
            SELECT table_name, column_name, data_type
            FROM information_schema.columns
            WHERE table_schema = 'public'
            ORDER BY table_name, ordinal_position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::ExecutionFailure(format!("schema introspection failed: {}", e))
        })?;

        let mut schema = String::new();
        let mut current_table = String::new();

        for row in rows {
            let table: String = row.try_get("table_name").unwrap_or_default();
            let column: String = row.try_get("column_name").unwrap_or_default();
            let data_type: String = row.try_get("data_type").unwrap_or_default();

            if table != current_table {
                if !current_table.is_empty() {
                    schema.push('\n');
                }
                schema.push_str(&format!("TABLE {}:", table));
                current_table = table;
            }
            schema.push_str(&format!("\n  {} {}", column, data_type));
        }

        if schema.is_empty() {
            schema.push_str("(no tables)");
        }

        Ok(schema)
    }

    async fn execute_read_only(&self, sql: &str) -> Result<TableResult> {
        validate_read_only(sql)?;

        let rows = sqlx::query(sql).fetch_all(&self.pool).await.map_err(|e| {
            OrchestrationError::ExecutionFailure(format!("query failed: {}", e))
        })?;

        let columns = rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let data = rows
            .iter()
            .map(|row| {
                (0..row.columns().len())
                    .map(|idx| cell_to_string(row, idx))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        Ok(TableResult {
            columns,
            rows: data,
        })
    }
}

/// Render one result cell as text, whatever its SQL type turned out to be.
fn cell_to_string(row: &PgRow, idx: usize) -> String {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<uuid::Uuid>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return v.map(|x| x.to_string()).unwrap_or_default();
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return v.map(|x| x.to_rfc3339()).unwrap_or_default();
    }
    String::new()
}

/// Fixed-content warehouse for development & testing.
pub struct InMemoryWarehouse {
    schema: String,
    table: TableResult,
}

impl InMemoryWarehouse {
    pub fn new(schema: String, table: TableResult) -> Self {
        Self { schema, table }
    }
}

#[async_trait::async_trait]
impl RelationalStore for InMemoryWarehouse {
    async fn describe_schema(&self) -> Result<String> {
        Ok(self.schema.clone())
    }

    async fn execute_read_only(&self, sql: &str) -> Result<TableResult> {
        validate_read_only(sql)?;
        Ok(self.table.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> InMemoryWarehouse {
        InMemoryWarehouse::new(
            "TABLE drugs:\n  name text\n  stock integer".to_string(),
            TableResult {
                columns: vec!["name".to_string(), "stock".to_string()],
                rows: vec![vec!["Paracetamol".to_string(), "230".to_string()]],
            },
        )
    }

    #[tokio::test]
    async fn test_in_memory_executes_select() {
        let table = warehouse()
            .execute_read_only("SELECT name, stock FROM drugs")
            .await
            .unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.columns, vec!["name", "stock"]);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_mutation_at_store_seam() {
        let result = warehouse().execute_read_only("DELETE FROM drugs").await;
        assert!(matches!(
            result,
            Err(OrchestrationError::PlanValidationFailure(_))
        ));
    }
}
