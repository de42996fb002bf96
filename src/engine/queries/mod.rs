//! Query Corpus
//!
//! Loads SQL and aggregation-pipeline query files laid out as
//! `<dir>/sql/<phase>/<name>.sql` and `<dir>/mongodb/<phase>/<name>.json`.

pub mod catalog;
pub mod loader;

pub use catalog::collection_for;
pub use loader::{Catalog, PipelineQuery, QueryFile, QueryLoader};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Query file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid query file {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Invalid query reference '{0}', expected phase:name")]
    InvalidRef(String),
}

/// Which backend a query file targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Sql,
    Mongodb,
}

impl Engine {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Engine::Sql => "sql",
            Engine::Mongodb => "mongodb",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Engine::Sql => "sql",
            Engine::Mongodb => "json",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// A query identified by phase directory and file stem
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryRef {
    pub phase: String,
    pub name: String,
}

impl QueryRef {
    pub fn new(phase: &str, name: &str) -> Self {
        Self {
            phase: phase.to_string(),
            name: name.to_string(),
        }
    }

    /// Parse `phase:name`
    pub fn parse(spec: &str) -> Result<Self, QueryError> {
        match spec.split_once(':') {
            Some((phase, name)) if !phase.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Self::new(phase.trim(), name.trim()))
            }
            _ => Err(QueryError::InvalidRef(spec.to_string())),
        }
    }

    /// Human title: `Q1_1_market_growth_trajectory` → `Q1 1 Market Growth Trajectory`
    pub fn display_title(&self) -> String {
        self.name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }

    pub fn collection(&self) -> &'static str {
        collection_for(&self.name)
    }
}

impl fmt::Display for QueryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_ref() {
        let q = QueryRef::parse("phase_1:Q1_1_market_growth_trajectory").unwrap();
        assert_eq!(q.phase, "phase_1");
        assert_eq!(q.name, "Q1_1_market_growth_trajectory");
        assert_eq!(q.to_string(), "phase_1/Q1_1_market_growth_trajectory");
        assert_eq!(q.collection(), "ev_sales_data");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(QueryRef::parse("phase_1"), Err(QueryError::InvalidRef(_))));
        assert!(QueryRef::parse(":Q1").is_err());
        assert!(QueryRef::parse("phase_1:").is_err());
    }

    #[test]
    fn test_display_title() {
        let q = QueryRef::new("phase_5", "Q5_2_italy_vs_global_giants");
        assert_eq!(q.display_title(), "Q5 2 Italy Vs Global Giants");
    }
}
