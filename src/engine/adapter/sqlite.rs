//! SQLite Adapter
//!
//! Implements SqlAdapter for SQLite using rusqlite + r2d2 connection pooling.
//! Used for offline runs of the relational side and by the test suite.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::dialect::{ColumnDef, DialectGenerator, SqlDialect};
use super::{AdapterError, AdapterResult, ResultSet, Row, SqlAdapter};

type DbPool = Pool<SqliteConnectionManager>;
type DbConn = PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct SqliteAdapter {
    pool: DbPool,
    db_path: PathBuf,
}

impl SqliteAdapter {
    pub fn new(db_path: &Path) -> AdapterResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        let adapter = Self {
            pool,
            db_path: db_path.to_path_buf(),
        };
        adapter.init_pragmas()?;
        Ok(adapter)
    }

    pub fn in_memory() -> AdapterResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AdapterError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            db_path: PathBuf::from(":memory:"),
        })
    }

    fn init_pragmas(&self) -> AdapterResult<()> {
        let conn = self.get_conn()?;
        let _: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| AdapterError::Schema(e.to_string()))?;
        Ok(())
    }

    fn get_conn(&self) -> AdapterResult<DbConn> {
        self.pool
            .get()
            .map_err(|e| AdapterError::Connection(e.to_string()))
    }

    /// Run `f` with a pooled connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> AdapterResult<T>
    where
        T: Send + 'static,
        F: FnOnce(DbConn) -> AdapterResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| AdapterError::Connection(e.to_string()))?;
            f(conn)
        })
        .await
        .map_err(|e| AdapterError::Internal(format!("blocking task failed: {}", e)))?
    }

    /// Convert a rusqlite ValueRef to serde_json Value
    fn value_ref_to_json(val: rusqlite::types::ValueRef<'_>) -> Value {
        match val {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(i) => json!(i),
            rusqlite::types::ValueRef::Real(f) => json!(f),
            rusqlite::types::ValueRef::Text(t) => {
                json!(String::from_utf8_lossy(t).to_string())
            }
            rusqlite::types::ValueRef::Blob(b) => {
                json!(format!("BLOB({} bytes)", b.len()))
            }
        }
    }

    /// Convert a text cell to the SQLite value matching the declared column type
    fn text_to_sql(value: &Option<String>, col_type: &str) -> rusqlite::types::Value {
        use rusqlite::types::Value as SqlValue;

        let Some(text) = value else {
            return SqlValue::Null;
        };
        let upper = col_type.to_uppercase();
        if upper.starts_with("INT") || upper == "BIGINT" {
            if let Ok(i) = text.trim().parse::<i64>() {
                return SqlValue::Integer(i);
            }
        } else if upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC") || upper == "REAL" {
            if let Ok(f) = text.trim().parse::<f64>() {
                return SqlValue::Real(f);
            }
        }
        SqlValue::Text(text.clone())
    }

    fn query_blocking(conn: &DbConn, sql: &str) -> AdapterResult<(Vec<String>, Vec<Row>)> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows: Vec<Row> = stmt
            .query_map([], |row| {
                let mut map = Row::new();
                for (i, col_name) in column_names.iter().enumerate() {
                    let val = row.get_ref(i).unwrap_or(rusqlite::types::ValueRef::Null);
                    map.insert(col_name.clone(), Self::value_ref_to_json(val));
                }
                Ok(map)
            })
            .map_err(|e| AdapterError::Query(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        Ok((column_names, rows))
    }
}

#[async_trait]
impl SqlAdapter for SqliteAdapter {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    fn describe(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }

    async fn query(&self, sql: &str) -> AdapterResult<ResultSet> {
        let sql = sql.to_string();
        let start = Instant::now();

        let (columns, rows) = self.with_conn(move |conn| Self::query_blocking(&conn, &sql)).await?;

        Ok(ResultSet {
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute(&self, sql: &str) -> AdapterResult<u64> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            let affected = conn
                .execute(&sql, [])
                .map_err(|e| AdapterError::Query(e.to_string()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> AdapterResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| AdapterError::Query(e.to_string()))
        })
        .await
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Vec<Option<String>>],
    ) -> AdapterResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let gen = DialectGenerator::new(SqlDialect::Sqlite);
        let col_names: Vec<String> = columns.iter().map(|c| gen.quote_ident(&c.name)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| gen.placeholder(i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            gen.quote_ident(table),
            col_names.join(", "),
            placeholders.join(", ")
        );
        let col_types: Vec<String> = columns.iter().map(|c| c.col_type.clone()).collect();
        let rows = rows.to_vec();

        self.with_conn(move |mut conn| {
            let tx = conn
                .transaction()
                .map_err(|e| AdapterError::Query(e.to_string()))?;
            {
                let mut stmt = tx
                    .prepare(&sql)
                    .map_err(|e| AdapterError::Query(e.to_string()))?;

                for row in &rows {
                    let values: Vec<rusqlite::types::Value> = col_types
                        .iter()
                        .enumerate()
                        .map(|(i, col_type)| {
                            let cell = row.get(i).cloned().unwrap_or(None);
                            Self::text_to_sql(&cell, col_type)
                        })
                        .collect();
                    stmt.execute(rusqlite::params_from_iter(values.iter()))
                        .map_err(|e| AdapterError::Query(e.to_string()))?;
                }
            }
            tx.commit()
                .map_err(|e| AdapterError::Query(e.to_string()))?;

            Ok(rows.len() as u64)
        })
        .await
    }

    async fn test_connection(&self) -> AdapterResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch("SELECT 1")
                .map_err(|e| AdapterError::Connection(e.to_string()))
        })
        .await
    }
}
