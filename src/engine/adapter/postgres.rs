//! PostgreSQL Adapter
//!
//! Implements SqlAdapter over a sqlx connection pool. Result rows are decoded
//! dynamically by column type into JSON values.
//!
//! Set `EVDATA_TEST_POSTGRES_URL` to run the live tests against a server.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, QueryBuilder, Row as _, Statement, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::debug;

use super::dialect::{ColumnDef, DialectGenerator, SqlDialect};
use super::{AdapterError, AdapterResult, ResultSet, Row, SqlAdapter};

/// Rows per INSERT statement; keeps bind parameters well under the protocol limit
const INSERT_CHUNK: usize = 1000;

pub struct PostgresAdapter {
    pool: PgPool,
    display: String,
}

impl PostgresAdapter {
    /// Connect with typed options. `shown` is the password-free description.
    pub async fn connect(options: PgConnectOptions, shown: &str) -> AdapterResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        debug!(connection = %shown, "postgres pool ready");
        Ok(Self {
            pool,
            display: shown.to_string(),
        })
    }

    /// Column names from the prepared statement, for results with no rows
    async fn described_columns(&self, sql: &str) -> Vec<String> {
        match Executor::prepare(&self.pool, sql).await {
            Ok(statement) => statement.columns().iter().map(|c| c.name().to_string()).collect(),
            Err(e) => {
                debug!(error = %e, "could not describe empty result");
                Vec::new()
            }
        }
    }

    /// Decode one cell by its Postgres type name
    fn cell_to_json(row: &PgRow, idx: usize) -> Value {
        let raw = match row.try_get_raw(idx) {
            Ok(raw) => raw,
            Err(_) => return Value::Null,
        };
        if raw.is_null() {
            return Value::Null;
        }
        let type_name = raw.type_info().name().to_uppercase();

        match type_name.as_str() {
            "BOOL" => row.try_get::<bool, _>(idx).map(Value::from).unwrap_or(Value::Null),
            "INT2" => row.try_get::<i16, _>(idx).map(Value::from).unwrap_or(Value::Null),
            "INT4" => row.try_get::<i32, _>(idx).map(Value::from).unwrap_or(Value::Null),
            "INT8" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<f32, _>(idx)
                .map(|f| json!(f as f64))
                .unwrap_or(Value::Null),
            "FLOAT8" => row.try_get::<f64, _>(idx).map(|f| json!(f)).unwrap_or(Value::Null),
            "NUMERIC" => row
                .try_get::<sqlx::types::BigDecimal, _>(idx)
                .ok()
                .and_then(|d| d.to_string().parse::<f64>().ok())
                .map(|f| json!(f))
                .unwrap_or(Value::Null),
            "DATE" => row
                .try_get::<chrono::NaiveDate, _>(idx)
                .map(|d| json!(d.to_string()))
                .unwrap_or(Value::Null),
            "TIMESTAMP" => row
                .try_get::<chrono::NaiveDateTime, _>(idx)
                .map(|d| json!(d.format("%Y-%m-%dT%H:%M:%S").to_string()))
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
                .map(|d| json!(d.to_rfc3339()))
                .unwrap_or(Value::Null),
            "JSON" | "JSONB" => row.try_get::<Value, _>(idx).unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(idx)
                .map(Value::String)
                .unwrap_or(Value::Null),
        }
    }

    fn cast_target(col_type: &str) -> &'static str {
        let upper = col_type.to_uppercase();
        if upper.starts_with("INT") {
            "INTEGER"
        } else if upper == "BIGINT" {
            "BIGINT"
        } else if upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC") {
            "NUMERIC"
        } else if upper == "BOOLEAN" {
            "BOOLEAN"
        } else {
            "TEXT"
        }
    }
}

#[async_trait]
impl SqlAdapter for PostgresAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    fn describe(&self) -> String {
        self.display.clone()
    }

    async fn query(&self, sql: &str) -> AdapterResult<ResultSet> {
        let start = Instant::now();

        let pg_rows: Vec<PgRow> = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        // An empty result carries no column metadata through the row API
        let columns: Vec<String> = match pg_rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.described_columns(sql).await,
        };

        let rows: Vec<Row> = pg_rows
            .iter()
            .map(|pg_row| {
                let mut map = Row::new();
                for (i, name) in columns.iter().enumerate() {
                    map.insert(name.clone(), Self::cell_to_json(pg_row, i));
                }
                map
            })
            .collect();

        Ok(ResultSet {
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str) -> AdapterResult<u64> {
        let result = sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(result.rows_affected())
    }

    async fn execute_batch(&self, sql: &str) -> AdapterResult<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Vec<Option<String>>],
    ) -> AdapterResult<u64> {
        let gen = DialectGenerator::new(SqlDialect::Postgres);
        let col_names: Vec<String> = columns.iter().map(|c| gen.quote_ident(&c.name)).collect();
        let casts: Vec<&'static str> = columns.iter().map(|c| Self::cast_target(&c.col_type)).collect();
        let mut inserted = 0u64;

        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                gen.quote_ident(table),
                col_names.join(", ")
            ));

            builder.push_values(chunk, |mut b, row| {
                for (i, cast) in casts.iter().enumerate() {
                    let cell: Option<String> = row.get(i).cloned().unwrap_or(None);
                    b.push("CAST(");
                    b.push_bind_unseparated(cell);
                    b.push_unseparated(format!(" AS {})", cast));
                }
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| AdapterError::Query(e.to_string()))?;
            inserted += result.rows_affected();
        }

        Ok(inserted)
    }

    async fn test_connection(&self) -> AdapterResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cast_targets() {
        assert_eq!(PostgresAdapter::cast_target("INTEGER"), "INTEGER");
        assert_eq!(PostgresAdapter::cast_target("DECIMAL(15,4)"), "NUMERIC");
        assert_eq!(PostgresAdapter::cast_target("VARCHAR(100)"), "TEXT");
        assert_eq!(PostgresAdapter::cast_target("TEXT"), "TEXT");
    }

    async fn live_adapter() -> Option<PostgresAdapter> {
        let url = std::env::var("EVDATA_TEST_POSTGRES_URL").ok()?;
        let options: PgConnectOptions = url.parse().ok()?;
        PostgresAdapter::connect(options, "test").await.ok()
    }

    #[tokio::test]
    async fn test_empty_result_keeps_column_names() {
        let Some(adapter) = live_adapter().await else {
            return;
        };
        let rs = adapter
            .query("SELECT 1 AS year, 'Norway'::text AS region WHERE false")
            .await
            .unwrap();
        assert!(rs.is_empty());
        assert_eq!(rs.columns, vec!["year", "region"]);
    }
}
