//! SQL Dialect Generator
//!
//! Generates backend-specific DDL for the loader and the index analyzer.
//! Supports SQLite and PostgreSQL dialects.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Sqlite => write!(f, "sqlite"),
            SqlDialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl SqlDialect {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(SqlDialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(SqlDialect::Postgres),
            _ => None,
        }
    }
}

/// Column definition used when creating tables from data files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
}

impl ColumnDef {
    pub fn new(name: &str, col_type: &str) -> Self {
        Self {
            name: name.to_string(),
            col_type: col_type.to_string(),
        }
    }
}

/// SQL dialect-aware code generator
pub struct DialectGenerator {
    pub dialect: SqlDialect,
}

impl DialectGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Map a guessed column type to the dialect-specific type
    pub fn map_type(&self, universal_type: &str) -> String {
        let upper = universal_type.to_uppercase();
        match (self.dialect, upper.as_str()) {
            (SqlDialect::Sqlite, "BOOLEAN") => "INTEGER".into(),
            (SqlDialect::Sqlite, "DOUBLE PRECISION") => "REAL".into(),

            // VARCHAR with size
            _ if upper.starts_with("VARCHAR") => match self.dialect {
                SqlDialect::Sqlite => "TEXT".into(),
                SqlDialect::Postgres => universal_type.to_string(),
            },

            // DECIMAL with precision
            _ if upper.starts_with("DECIMAL") || upper.starts_with("NUMERIC") => {
                match self.dialect {
                    SqlDialect::Sqlite => "REAL".into(),
                    SqlDialect::Postgres => universal_type.to_string(),
                }
            }

            // Pass through unchanged
            _ => universal_type.to_string(),
        }
    }

    /// Quote an identifier (table or column name)
    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Generate CREATE TABLE SQL
    pub fn create_table(&self, table: &str, columns: &[ColumnDef]) -> String {
        let col_defs: Vec<String> = columns
            .iter()
            .map(|col| format!("{} {}", self.quote_ident(&col.name), self.map_type(&col.col_type)))
            .collect();

        format!(
            "CREATE TABLE {} ({})",
            self.quote_ident(table),
            col_defs.join(", ")
        )
    }

    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_ident(table))
    }

    /// Generate CREATE INDEX SQL. `columns` is an expression list taken verbatim,
    /// so expression indexes like `CAST(power_kw AS NUMERIC)` work on both dialects.
    pub fn create_index(&self, table: &str, index_name: &str, columns: &str) -> String {
        format!("CREATE INDEX {} ON {} ({})", index_name, table, columns)
    }

    pub fn drop_index(&self, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {}", index_name)
    }

    /// Placeholder for the n-th (1-based) bound parameter
    pub fn placeholder(&self, n: usize) -> String {
        match self.dialect {
            SqlDialect::Sqlite => format!("?{}", n),
            SqlDialect::Postgres => format!("${}", n),
        }
    }
}
