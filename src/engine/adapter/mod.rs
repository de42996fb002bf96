//! Database Adapter Layer
//!
//! Provides a trait-based abstraction over the relational and document backends.
//! Relational: PostgreSQL and SQLite. Document: MongoDB and local JSON collections.

pub mod dialect;
pub mod local;
pub mod mongo;
pub mod postgres;
pub mod sqlite;

pub use dialect::{ColumnDef, DialectGenerator, SqlDialect};
pub use local::LocalDocumentAdapter;
pub use mongo::MongoAdapter;
pub use postgres::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Universal result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// A row keyed by column name
pub type Row = Map<String, Value>;

/// Relational backend. Query text is executed as-is.
#[async_trait]
pub trait SqlAdapter: Send + Sync {
    /// Which SQL dialect this adapter uses
    fn dialect(&self) -> SqlDialect;

    /// Connection description without credentials
    fn describe(&self) -> String;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str) -> AdapterResult<ResultSet>;

    /// Execute a single statement and return the affected row count
    async fn execute(&self, sql: &str) -> AdapterResult<u64>;

    /// Execute multiple statements as a batch
    async fn execute_batch(&self, sql: &str) -> AdapterResult<()>;

    /// Drop `table` if present and create it with `columns`
    async fn create_table(&self, table: &str, columns: &[ColumnDef]) -> AdapterResult<()> {
        let gen = DialectGenerator::new(self.dialect());
        self.execute(&gen.drop_table(table)).await?;
        self.execute(&gen.create_table(table, columns)).await?;
        Ok(())
    }

    /// Insert rows of text values; `None` is stored as NULL and other values
    /// are converted to each column's declared type.
    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Vec<Option<String>>],
    ) -> AdapterResult<u64>;

    /// Test the connection is alive
    async fn test_connection(&self) -> AdapterResult<()>;
}

/// Document backend. Pipelines are arrays of aggregation stage objects.
#[async_trait]
pub trait DocumentAdapter: Send + Sync {
    /// Connection description without credentials
    fn describe(&self) -> String;

    /// Run an aggregation pipeline against a collection
    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AdapterResult<ResultSet>;

    /// Drop a collection and fill it with `docs`
    async fn replace_collection(&self, name: &str, docs: Vec<Value>) -> AdapterResult<u64>;

    /// Test the connection is alive
    async fn test_connection(&self) -> AdapterResult<()>;
}

/// Rows returned by either backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub execution_time_ms: u64,
}

impl ResultSet {
    /// Build a result set, collecting column names in first-seen order
    pub fn from_rows(rows: Vec<Row>, execution_time_ms: u64) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        Self {
            columns,
            rows,
            execution_time_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Database adapter errors
#[derive(Debug)]
pub enum AdapterError {
    Connection(String),
    Query(String),
    Schema(String),
    NotFound(String),
    Validation(String),
    Internal(String),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterError::Connection(e) => write!(f, "Connection error: {}", e),
            AdapterError::Query(e) => write!(f, "Query error: {}", e),
            AdapterError::Schema(e) => write!(f, "Schema error: {}", e),
            AdapterError::NotFound(e) => write!(f, "Not found: {}", e),
            AdapterError::Validation(e) => write!(f, "Validation error: {}", e),
            AdapterError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for AdapterError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_set_columns_first_seen_order() {
        let rows = vec![
            json!({"b": 1, "a": 2}).as_object().cloned().unwrap(),
            json!({"a": 3, "c": 4}).as_object().cloned().unwrap(),
        ];
        let set = ResultSet::from_rows(rows, 5);
        assert_eq!(set.len(), 2);
        assert!(set.columns.contains(&"c".to_string()));
        assert_eq!(set.columns.len(), 3);
    }

    #[test]
    fn test_adapter_error_display() {
        let err = AdapterError::Query("syntax error".into());
        assert_eq!(err.to_string(), "Query error: syntax error");
    }
}
