//! Unified Query Executor
//!
//! Runs a corpus query against the relational backend, the document backend,
//! or both, timing each side and capturing per-engine failures.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::adapter::{DocumentAdapter, ResultSet, SqlAdapter};
use super::compare::{compare, CompareOptions, Comparison};
use super::normalize::{normalize, NormalizeOptions};
use super::queries::{Engine, QueryLoader, QueryRef};

/// Which backends a run targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Sql,
    Mongodb,
    Both,
}

impl Target {
    pub fn includes(&self, engine: Engine) -> bool {
        matches!(
            (self, engine),
            (Target::Both, _) | (Target::Sql, Engine::Sql) | (Target::Mongodb, Engine::Mongodb)
        )
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Sql => write!(f, "sql"),
            Target::Mongodb => write!(f, "mongodb"),
            Target::Both => write!(f, "both"),
        }
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Result of running one query on one engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineRun {
    pub engine: Engine,
    pub rows: usize,
    #[serde(skip)]
    pub result: Option<ResultSet>,
    /// Wall clock around load and execution
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineRun {
    fn failed(engine: Engine, elapsed: Duration, collection: Option<String>, error: String) -> Self {
        Self {
            engine,
            rows: 0,
            result: None,
            elapsed,
            collection,
            error: Some(error),
        }
    }

    fn succeeded(engine: Engine, elapsed: Duration, collection: Option<String>, result: ResultSet) -> Self {
        Self {
            engine,
            rows: result.len(),
            result: Some(result),
            elapsed,
            collection,
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub query: QueryRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<EngineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mongodb: Option<EngineRun>,
}

impl ExecutionOutcome {
    pub fn runs(&self) -> impl Iterator<Item = &EngineRun> {
        self.sql.iter().chain(self.mongodb.iter())
    }

    pub fn has_errors(&self) -> bool {
        self.runs().any(|r| !r.is_ok())
    }

    /// The faster engine and its speedup, when both ran successfully with
    /// non-zero timings
    pub fn faster_engine(&self) -> Option<(Engine, f64)> {
        let (sql, mongo) = (self.sql.as_ref()?, self.mongodb.as_ref()?);
        if !sql.is_ok() || !mongo.is_ok() {
            return None;
        }
        speedup(sql.elapsed, mongo.elapsed).map(|(sql_faster, ratio)| {
            if sql_faster {
                (Engine::Sql, ratio)
            } else {
                (Engine::Mongodb, ratio)
            }
        })
    }
}

/// `(first_is_faster, max/min)` for two positive timings
pub fn speedup(first: Duration, second: Duration) -> Option<(bool, f64)> {
    let (a, b) = (first.as_secs_f64(), second.as_secs_f64());
    if a <= 0.0 || b <= 0.0 {
        return None;
    }
    Some((a <= b, a.max(b) / a.min(b)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyStatus {
    Consistent,
    Inconsistent,
    /// One or both engines failed, so no comparison was made
    Incomplete,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub query: QueryRef,
    pub status: ConsistencyStatus,
    pub sql: Option<EngineRun>,
    pub mongodb: Option<EngineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.status == ConsistencyStatus::Consistent
    }
}

pub struct UnifiedExecutor {
    loader: QueryLoader,
    sql: Result<Box<dyn SqlAdapter>, String>,
    documents: Result<Box<dyn DocumentAdapter>, String>,
    normalize_options: NormalizeOptions,
}

impl UnifiedExecutor {
    pub fn new(loader: QueryLoader) -> Self {
        Self {
            loader,
            sql: Err("relational backend not configured".to_string()),
            documents: Err("document backend not configured".to_string()),
            normalize_options: NormalizeOptions::default(),
        }
    }

    pub fn with_sql(mut self, adapter: Box<dyn SqlAdapter>) -> Self {
        self.sql = Ok(adapter);
        self
    }

    pub fn with_documents(mut self, adapter: Box<dyn DocumentAdapter>) -> Self {
        self.documents = Ok(adapter);
        self
    }

    /// Record why the relational backend is unavailable; runs report it
    pub fn with_sql_unavailable(mut self, reason: String) -> Self {
        self.sql = Err(reason);
        self
    }

    pub fn with_documents_unavailable(mut self, reason: String) -> Self {
        self.documents = Err(reason);
        self
    }

    pub fn with_normalize_options(mut self, options: NormalizeOptions) -> Self {
        self.normalize_options = options;
        self
    }

    pub fn loader(&self) -> &QueryLoader {
        &self.loader
    }

    pub fn sql_adapter(&self) -> Option<&dyn SqlAdapter> {
        self.sql.as_ref().ok().map(|a| &**a)
    }

    /// Execute a query on the targeted engines. A failure on one engine is
    /// recorded in its run and does not prevent the other from running.
    pub async fn execute(&self, query: &QueryRef, target: Target) -> ExecutionOutcome {
        info!(query = %query, engines = %target, "executing query");
        let sql = if target.includes(Engine::Sql) {
            Some(self.run_sql(query).await)
        } else {
            None
        };
        let mongodb = if target.includes(Engine::Mongodb) {
            Some(self.run_pipeline(query).await)
        } else {
            None
        };
        ExecutionOutcome {
            query: query.clone(),
            sql,
            mongodb,
        }
    }

    /// Run a query on one engine
    pub async fn run_engine(&self, query: &QueryRef, engine: Engine) -> EngineRun {
        match engine {
            Engine::Sql => self.run_sql(query).await,
            Engine::Mongodb => self.run_pipeline(query).await,
        }
    }

    async fn run_sql(&self, query: &QueryRef) -> EngineRun {
        let start = Instant::now();
        let adapter = match &self.sql {
            Ok(adapter) => adapter,
            Err(reason) => return EngineRun::failed(Engine::Sql, start.elapsed(), None, reason.clone()),
        };

        let outcome = match self.loader.load_sql(query) {
            Ok(sql) => adapter.query(&sql).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok(result) => {
                debug!(query = %query, rows = result.len(), elapsed_ms = elapsed.as_millis() as u64, "sql done");
                EngineRun::succeeded(Engine::Sql, elapsed, None, result)
            }
            Err(e) => {
                warn!(query = %query, error = %e, "sql failed");
                EngineRun::failed(Engine::Sql, elapsed, None, e)
            }
        }
    }

    async fn run_pipeline(&self, query: &QueryRef) -> EngineRun {
        let start = Instant::now();
        let adapter = match &self.documents {
            Ok(adapter) => adapter,
            Err(reason) => return EngineRun::failed(Engine::Mongodb, start.elapsed(), None, reason.clone()),
        };

        let loaded = match self.loader.load_pipeline(query) {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(query = %query, error = %e, "pipeline load failed");
                return EngineRun::failed(Engine::Mongodb, start.elapsed(), None, e.to_string());
            }
        };
        let collection = Some(loaded.collection.clone());
        let outcome = adapter.aggregate(&loaded.collection, &loaded.pipeline).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(result) => {
                debug!(query = %query, collection = %loaded.collection, rows = result.len(), "pipeline done");
                EngineRun::succeeded(Engine::Mongodb, elapsed, collection, result)
            }
            Err(e) => {
                warn!(query = %query, error = %e, "pipeline failed");
                EngineRun::failed(Engine::Mongodb, elapsed, collection, e.to_string())
            }
        }
    }

    /// Run a query on both engines and diff the normalized results
    pub async fn compare(&self, query: &QueryRef, options: &CompareOptions) -> ConsistencyReport {
        let outcome = self.execute(query, Target::Both).await;
        self.compare_outcome(outcome, options)
    }

    /// Diff an outcome that already holds both engine runs
    pub fn compare_outcome(&self, outcome: ExecutionOutcome, options: &CompareOptions) -> ConsistencyReport {
        let comparison = match (&outcome.sql, &outcome.mongodb) {
            (Some(sql), Some(mongo)) => match (&sql.result, &mongo.result) {
                (Some(left), Some(right)) => {
                    let left = normalize(left, &self.normalize_options);
                    let right = normalize(right, &self.normalize_options);
                    Some(compare(&left, &right, options))
                }
                _ => None,
            },
            _ => None,
        };

        let status = match &comparison {
            Some(c) if c.values_agree() => ConsistencyStatus::Consistent,
            Some(_) => ConsistencyStatus::Inconsistent,
            None => ConsistencyStatus::Incomplete,
        };
        info!(query = %outcome.query, status = ?status, "consistency check");

        ConsistencyReport {
            query: outcome.query,
            status,
            sql: outcome.sql,
            mongodb: outcome.mongodb,
            comparison,
        }
    }
}
