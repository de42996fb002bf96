//! Query Test Runner
//!
//! Executes every discovered corpus query on each engine it exists for,
//! tallies successes and failures, and optionally checks that both engines
//! return the same answer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::compare::CompareOptions;
use super::executor::{ConsistencyStatus, EngineRun, Target, UnifiedExecutor};
use super::queries::{Engine, QueryRef};

#[derive(Debug, Clone, Default)]
pub struct TestRunOptions {
    pub check_consistency: bool,
    pub compare: CompareOptions,
}

/// Outcome of one query on one engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineTest {
    pub success: bool,
    pub execution_time: f64,
    pub row_count: usize,
    pub error: Option<String>,
}

impl From<&EngineRun> for EngineTest {
    fn from(run: &EngineRun) -> Self {
        Self {
            success: run.is_ok(),
            execution_time: run.elapsed.as_secs_f64(),
            row_count: run.rows,
            error: run.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryTestResult {
    pub phase: String,
    pub query_name: String,
    pub sql_result: Option<EngineTest>,
    pub mongodb_result: Option<EngineTest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencyStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency_detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedQuery {
    pub phase: String,
    pub query: String,
    pub database: Engine,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Coverage {
    pub both: usize,
    pub sql_only: usize,
    pub mongodb_only: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencySummary {
    pub checked: usize,
    pub consistent: usize,
    pub inconsistent: usize,
    pub incomplete: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds
    pub duration: f64,
    /// Query files found
    pub total_queries: usize,
    pub unique_queries: usize,
    pub sql_success: usize,
    pub sql_failures: usize,
    pub mongodb_success: usize,
    pub mongodb_failures: usize,
    pub failed_queries: Vec<FailedQuery>,
    pub coverage: Coverage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencySummary>,
    pub query_results: Vec<QueryTestResult>,
}

fn rate(success: usize, failures: usize) -> Option<f64> {
    let total = success + failures;
    (total > 0).then(|| success as f64 / total as f64 * 100.0)
}

impl TestReport {
    pub fn sql_success_rate(&self) -> Option<f64> {
        rate(self.sql_success, self.sql_failures)
    }

    pub fn mongodb_success_rate(&self) -> Option<f64> {
        rate(self.mongodb_success, self.mongodb_failures)
    }

    pub fn overall_success_rate(&self) -> Option<f64> {
        rate(
            self.sql_success + self.mongodb_success,
            self.sql_failures + self.mongodb_failures,
        )
    }

    pub fn inconsistent_count(&self) -> usize {
        self.consistency.as_ref().map(|c| c.inconsistent).unwrap_or(0)
    }

    /// 1 when any query failed or disagreed between engines
    pub fn exit_code(&self) -> i32 {
        if self.failed_queries.is_empty() && self.inconsistent_count() == 0 {
            0
        } else {
            1
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

pub struct QueryTestRunner<'a> {
    executor: &'a UnifiedExecutor,
    options: TestRunOptions,
}

impl<'a> QueryTestRunner<'a> {
    pub fn new(executor: &'a UnifiedExecutor, options: TestRunOptions) -> Self {
        Self { executor, options }
    }

    /// Run every discovered query. `progress` sees each result as it completes
    /// along with its 1-based position and the number of unique queries.
    pub async fn run<F>(&self, mut progress: F) -> TestReport
    where
        F: FnMut(usize, usize, &QueryTestResult),
    {
        let start_time = Utc::now();
        let files = self.executor.loader().discover();

        let mut groups: BTreeMap<QueryRef, (bool, bool)> = BTreeMap::new();
        for file in &files {
            let entry = groups.entry(file.query_ref()).or_insert((false, false));
            match file.engine {
                Engine::Sql => entry.0 = true,
                Engine::Mongodb => entry.1 = true,
            }
        }
        info!(files = files.len(), unique = groups.len(), "starting query test run");

        let mut report = TestReport {
            start_time,
            end_time: start_time,
            duration: 0.0,
            total_queries: files.len(),
            unique_queries: groups.len(),
            sql_success: 0,
            sql_failures: 0,
            mongodb_success: 0,
            mongodb_failures: 0,
            failed_queries: Vec::new(),
            coverage: Coverage::default(),
            consistency: self.options.check_consistency.then(ConsistencySummary::default),
            query_results: Vec::new(),
        };

        let total = groups.len();
        for (index, (query, (has_sql, has_mongo))) in groups.into_iter().enumerate() {
            let result = self.test_query(&query, has_sql, has_mongo, &mut report).await;
            progress(index + 1, total, &result);
            report.query_results.push(result);
        }

        report.end_time = Utc::now();
        report.duration = (report.end_time - report.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        info!(
            failures = report.failed_queries.len(),
            duration = report.duration,
            "query test run finished"
        );
        report
    }

    async fn test_query(
        &self,
        query: &QueryRef,
        has_sql: bool,
        has_mongo: bool,
        report: &mut TestReport,
    ) -> QueryTestResult {
        let target = match (has_sql, has_mongo) {
            (true, true) => Target::Both,
            (true, false) => Target::Sql,
            _ => Target::Mongodb,
        };
        let outcome = self.executor.execute(query, target).await;

        match target {
            Target::Both => report.coverage.both += 1,
            Target::Sql => report.coverage.sql_only += 1,
            Target::Mongodb => report.coverage.mongodb_only += 1,
        }

        for run in outcome.runs() {
            let (success, failures) = match run.engine {
                Engine::Sql => (&mut report.sql_success, &mut report.sql_failures),
                Engine::Mongodb => (&mut report.mongodb_success, &mut report.mongodb_failures),
            };
            match &run.error {
                None => *success += 1,
                Some(error) => {
                    *failures += 1;
                    report.failed_queries.push(FailedQuery {
                        phase: query.phase.clone(),
                        query: query.name.clone(),
                        database: run.engine,
                        error: error.clone(),
                    });
                }
            }
        }

        let mut result = QueryTestResult {
            phase: query.phase.clone(),
            query_name: query.name.clone(),
            sql_result: outcome.sql.as_ref().map(EngineTest::from),
            mongodb_result: outcome.mongodb.as_ref().map(EngineTest::from),
            consistency: None,
            consistency_detail: None,
        };

        if target == Target::Both {
            if let Some(summary) = report.consistency.as_mut() {
                let checked = self.executor.compare_outcome(outcome, &self.options.compare);
                summary.checked += 1;
                match checked.status {
                    ConsistencyStatus::Consistent => summary.consistent += 1,
                    ConsistencyStatus::Inconsistent => summary.inconsistent += 1,
                    ConsistencyStatus::Incomplete => summary.incomplete += 1,
                }
                result.consistency = Some(checked.status);
                result.consistency_detail = checked.comparison.as_ref().map(|c| c.summary());
            }
        }

        result
    }
}
