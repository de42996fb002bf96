//! Index Performance Analyzer
//!
//! Times relational queries before and after creating a set of indexes and
//! reports the speedup for each. Created indexes are always dropped again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::adapter::{DialectGenerator, SqlAdapter};
use super::error::{EngineError, Result};
use super::executor::UnifiedExecutor;
use super::queries::{Engine, QueryRef};

/// Speedup above which a query counts as improved
pub const DEFAULT_IMPROVEMENT_THRESHOLD: f64 = 1.05;
pub const DEFAULT_ITERATIONS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    /// Column or expression list, used verbatim
    pub columns: String,
}

impl IndexDef {
    pub fn new(name: &str, table: &str, columns: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.to_string(),
        }
    }
}

pub fn default_indexes() -> Vec<IndexDef> {
    vec![
        IndexDef::new("idx_ev_sales_region_year", "ev_sales", "region_name, year"),
        IndexDef::new("idx_ev_sales_parameter", "ev_sales", "parameter, unit"),
        IndexDef::new("idx_charging_country", "charging_stations", "country_code"),
        IndexDef::new("idx_charging_power", "charging_stations", "CAST(power_kw AS NUMERIC)"),
        IndexDef::new("idx_population_state", "ev_population", "state, make"),
        IndexDef::new("idx_population_year", "ev_population", "model_year"),
    ]
}

/// Queries whose access paths the default indexes cover
pub fn default_queries() -> Vec<QueryRef> {
    [
        ("phase_1", "Q1_1_market_growth_trajectory"),
        ("phase_1", "Q2_1_infrastructure_density"),
        ("phase_2", "Q1_2_market_share_evolution"),
        ("phase_2", "Q3_1_price_range_correlation"),
        ("phase_4", "Q1_3_regional_adoption_rate"),
        ("phase_4", "Q2_3_network_coverage_analysis"),
    ]
    .iter()
    .map(|(phase, name)| QueryRef::new(phase, name))
    .collect()
}

/// Parse `phase:name` entries, skipping malformed ones with a warning
pub fn parse_query_specs(specs: &[String]) -> Vec<QueryRef> {
    specs
        .iter()
        .filter_map(|spec| match QueryRef::parse(spec) {
            Ok(query) => Some(query),
            Err(e) => {
                warn!(error = %e, "skipping query, use phase_1:Q1_1_market_growth_trajectory");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryImprovement {
    pub query: String,
    pub baseline_time: f64,
    pub indexed_time: f64,
    pub speedup: f64,
    pub improvement_percent: f64,
    pub improved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub queries_improved: usize,
    pub average_speedup: f64,
    pub indexes_created: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexAnalysis {
    pub timestamp: DateTime<Utc>,
    pub queries_tested: usize,
    /// Average seconds per query, keyed `phase/name`, in test order
    pub baseline_results: Vec<(String, f64)>,
    pub indexed_results: Vec<(String, f64)>,
    pub indexes_created: usize,
    pub improvements: Vec<QueryImprovement>,
    pub summary: AnalysisSummary,
}

impl IndexAnalysis {
    /// Write `index_analysis_<ts>.json` and `index_report_<ts>.md` into `dir`
    pub fn save(&self, dir: &Path) -> Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let stamp = self.timestamp.format("%Y%m%d_%H%M%S");

        let json_path = dir.join(format!("index_analysis_{}.json", stamp));
        std::fs::write(&json_path, serde_json::to_string_pretty(self)?)?;

        let report_path = dir.join(format!("index_report_{}.md", stamp));
        std::fs::write(&report_path, self.to_markdown())?;

        info!(json = %json_path.display(), report = %report_path.display(), "index analysis saved");
        Ok((json_path, report_path))
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Index Performance Analysis Report\n\n");
        out.push_str(&format!("**Generated:** {}\n", self.timestamp.to_rfc3339()));
        out.push_str(&format!("**Queries Tested:** {}\n", self.queries_tested));
        out.push_str(&format!("**Indexes Created:** {}\n", self.summary.indexes_created));
        out.push_str(&format!("**Queries Improved:** {}\n", self.summary.queries_improved));
        out.push_str(&format!("**Average Speedup:** {:.2}x\n\n", self.summary.average_speedup));
        out.push_str("## Detailed Results\n\n");
        out.push_str("| Query | Baseline | With Index | Improvement |\n");
        out.push_str("|-------|----------|------------|-------------|\n");
        for item in &self.improvements {
            let title = item
                .query
                .split_once('/')
                .map(|(phase, name)| QueryRef::new(phase, name).display_title())
                .unwrap_or_else(|| item.query.clone());
            out.push_str(&format!(
                "| {} | {:.3}s | {:.3}s | {:.1}% |\n",
                title, item.baseline_time, item.indexed_time, item.improvement_percent
            ));
        }
        out
    }
}

/// Compare baseline and indexed averages. Queries with a zero timing on
/// either side are left out of the improvements.
pub fn compute_improvements(
    baseline: &[(String, f64)],
    indexed: &[(String, f64)],
    threshold: f64,
) -> Vec<QueryImprovement> {
    baseline
        .iter()
        .filter_map(|(key, base)| {
            let (_, with_index) = indexed.iter().find(|(k, _)| k == key)?;
            if *base <= 0.0 || *with_index <= 0.0 {
                return None;
            }
            let speedup = base / with_index;
            Some(QueryImprovement {
                query: key.clone(),
                baseline_time: *base,
                indexed_time: *with_index,
                speedup,
                improvement_percent: (speedup - 1.0) * 100.0,
                improved: speedup > threshold,
            })
        })
        .collect()
}

pub struct IndexAnalyzer<'a> {
    executor: &'a UnifiedExecutor,
    indexes: Vec<IndexDef>,
    iterations: u32,
    improvement_threshold: f64,
    created: Vec<String>,
}

impl<'a> IndexAnalyzer<'a> {
    pub fn new(executor: &'a UnifiedExecutor) -> Self {
        Self {
            executor,
            indexes: default_indexes(),
            iterations: DEFAULT_ITERATIONS,
            improvement_threshold: DEFAULT_IMPROVEMENT_THRESHOLD,
            created: Vec::new(),
        }
    }

    pub fn with_indexes(mut self, indexes: Vec<IndexDef>) -> Self {
        self.indexes = indexes;
        self
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.improvement_threshold = threshold;
        self
    }

    fn adapter(&self) -> Result<&'a dyn SqlAdapter> {
        self.executor
            .sql_adapter()
            .ok_or_else(|| EngineError::Message("index analysis needs a relational backend".into()))
    }

    /// Average SQL seconds over the configured iterations. Failed and zero
    /// timings are ignored; 0 when no run succeeded.
    pub async fn average_time(&self, query: &QueryRef) -> f64 {
        let mut times = Vec::new();
        for _ in 0..self.iterations {
            let run = self.executor.run_engine(query, Engine::Sql).await;
            let secs = run.elapsed.as_secs_f64();
            if run.is_ok() && secs > 0.0 {
                times.push(secs);
            }
        }
        if times.is_empty() {
            0.0
        } else {
            times.iter().sum::<f64>() / times.len() as f64
        }
    }

    /// Drop-then-create each index, returning how many were created
    pub async fn create_indexes(&mut self) -> Result<usize> {
        let adapter = self.adapter()?;
        let gen = DialectGenerator::new(adapter.dialect());
        let mut created = 0;

        for index in &self.indexes {
            let outcome = async {
                adapter.execute(&gen.drop_index(&index.name)).await?;
                adapter
                    .execute(&gen.create_index(&index.table, &index.name, &index.columns))
                    .await
            }
            .await;
            match outcome {
                Ok(_) => {
                    info!(index = %index.name, table = %index.table, "index created");
                    self.created.push(index.name.clone());
                    created += 1;
                }
                Err(e) => warn!(index = %index.name, error = %e, "index creation failed"),
            }
        }
        Ok(created)
    }

    /// Drop every index this analyzer created
    pub async fn drop_indexes(&mut self) -> Result<()> {
        if self.created.is_empty() {
            return Ok(());
        }
        let adapter = self.adapter()?;
        let gen = DialectGenerator::new(adapter.dialect());
        for name in self.created.drain(..) {
            match adapter.execute(&gen.drop_index(&name)).await {
                Ok(_) => info!(index = %name, "index dropped"),
                Err(e) => warn!(index = %name, error = %e, "index drop failed"),
            }
        }
        Ok(())
    }

    async fn time_all(&self, queries: &[QueryRef]) -> Vec<(String, f64)> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let avg = self.average_time(query).await;
            info!(query = %query, seconds = avg, "timed");
            results.push((query.to_string(), avg));
        }
        results
    }

    /// Baseline timing, index creation, indexed timing, then cleanup
    pub async fn run(&mut self, queries: &[QueryRef]) -> Result<IndexAnalysis> {
        let timestamp = Utc::now();
        self.adapter()?;
        info!(queries = queries.len(), iterations = self.iterations, "baseline performance");
        let baseline_results = self.time_all(queries).await;

        let measured = self.measure_indexed(queries).await;
        let cleanup = self.drop_indexes().await;
        let (indexes_created, indexed_results) = measured?;
        cleanup?;

        let improvements = compute_improvements(&baseline_results, &indexed_results, self.improvement_threshold);
        let total_speedup: f64 = improvements.iter().map(|i| i.speedup).sum();
        let average_speedup = if queries.is_empty() {
            0.0
        } else {
            total_speedup / queries.len() as f64
        };
        let summary = AnalysisSummary {
            queries_improved: improvements.iter().filter(|i| i.improved).count(),
            average_speedup,
            indexes_created,
        };
        info!(
            improved = summary.queries_improved,
            average_speedup = summary.average_speedup,
            "index analysis finished"
        );

        Ok(IndexAnalysis {
            timestamp,
            queries_tested: queries.len(),
            baseline_results,
            indexed_results,
            indexes_created,
            improvements,
            summary,
        })
    }

    async fn measure_indexed(&mut self, queries: &[QueryRef]) -> Result<(usize, Vec<(String, f64)>)> {
        let created = self.create_indexes().await?;
        info!(created, "performance with indexes");
        Ok((created, self.time_all(queries).await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::SqliteAdapter;
    use crate::engine::queries::QueryLoader;

    async fn executor(dir: &Path) -> UnifiedExecutor {
        let sql_dir = dir.join("sql").join("phase_1");
        std::fs::create_dir_all(&sql_dir).unwrap();
        std::fs::write(
            sql_dir.join("Q2_1_infrastructure_density.sql"),
            "SELECT country_code, COUNT(*) AS n FROM charging_stations GROUP BY country_code",
        )
        .unwrap();

        let sqlite = SqliteAdapter::in_memory().unwrap();
        sqlite
            .execute_batch(
                "CREATE TABLE charging_stations (country_code TEXT, power_kw TEXT);
                 INSERT INTO charging_stations VALUES ('DE', '150'), ('FR', '22');
                 CREATE TABLE ev_sales (region_name TEXT, year INTEGER, parameter TEXT, unit TEXT);",
            )
            .await
            .unwrap();
        UnifiedExecutor::new(QueryLoader::new(dir)).with_sql(Box::new(sqlite))
    }

    async fn index_names(executor: &UnifiedExecutor) -> Vec<String> {
        let rs = executor
            .sql_adapter()
            .unwrap()
            .query("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name")
            .await
            .unwrap();
        rs.rows.iter().map(|r| r["name"].as_str().unwrap().to_string()).collect()
    }

    #[test]
    fn test_parse_query_specs_skips_malformed() {
        let specs = vec![
            "phase_1:Q1_1_market_growth_trajectory".to_string(),
            "Q2_1_no_phase".to_string(),
            "phase_4:Q2_3_network_coverage_analysis".to_string(),
        ];
        let parsed = parse_query_specs(&specs);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].phase, "phase_4");
        assert_eq!(default_queries().len(), 6);
        assert_eq!(default_indexes().len(), 6);
    }

    #[test]
    fn test_compute_improvements() {
        let baseline = vec![("p/a".to_string(), 0.2), ("p/b".to_string(), 0.1), ("p/c".to_string(), 0.0)];
        let indexed = vec![("p/a".to_string(), 0.1), ("p/b".to_string(), 0.099), ("p/c".to_string(), 0.05)];
        let improvements = compute_improvements(&baseline, &indexed, DEFAULT_IMPROVEMENT_THRESHOLD);
        assert_eq!(improvements.len(), 2);
        assert!((improvements[0].speedup - 2.0).abs() < 1e-9);
        assert!((improvements[0].improvement_percent - 100.0).abs() < 1e-9);
        assert!(improvements[0].improved);
        assert!(!improvements[1].improved);
    }

    #[tokio::test]
    async fn test_create_counts_successes_and_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path()).await;
        let mut analyzer = IndexAnalyzer::new(&executor);

        // ev_population is missing, so its two indexes fail
        let created = analyzer.create_indexes().await.unwrap();
        assert_eq!(created, 4);
        assert_eq!(index_names(&executor).await.len(), 4);

        analyzer.drop_indexes().await.unwrap();
        assert!(index_names(&executor).await.is_empty());
    }

    #[tokio::test]
    async fn test_custom_index_set() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path()).await;
        let mut analyzer = IndexAnalyzer::new(&executor)
            .with_indexes(vec![IndexDef::new("idx_station_power", "charging_stations", "power_kw")]);

        assert_eq!(analyzer.create_indexes().await.unwrap(), 1);
        assert_eq!(index_names(&executor).await, vec!["idx_station_power"]);
        analyzer.drop_indexes().await.unwrap();
        assert!(index_names(&executor).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_and_save_report() {
        let dir = tempfile::tempdir().unwrap();
        let executor = executor(dir.path()).await;
        let queries = vec![
            QueryRef::new("phase_1", "Q2_1_infrastructure_density"),
            QueryRef::new("phase_1", "Q_missing"),
        ];
        let mut analyzer = IndexAnalyzer::new(&executor).with_iterations(2);
        let analysis = analyzer.run(&queries).await.unwrap();

        assert_eq!(analysis.queries_tested, 2);
        assert_eq!(analysis.indexes_created, 4);
        assert_eq!(analysis.baseline_results[1], ("phase_1/Q_missing".to_string(), 0.0));
        assert!(analysis.baseline_results[0].1 > 0.0);
        assert_eq!(analysis.improvements.len(), 1);
        assert!(index_names(&executor).await.is_empty());

        let out = dir.path().join("reports");
        let (json_path, md_path) = analysis.save(&out).unwrap();
        assert!(json_path.file_name().unwrap().to_str().unwrap().starts_with("index_analysis_"));
        let md = std::fs::read_to_string(md_path).unwrap();
        assert!(md.contains("| Q2 1 Infrastructure Density |"));
    }

    #[tokio::test]
    async fn test_run_without_relational_backend_fails() {
        let dir = tempfile::tempdir().unwrap();
        let executor = UnifiedExecutor::new(QueryLoader::new(dir.path()));
        let mut analyzer = IndexAnalyzer::new(&executor);
        assert!(analyzer.run(&default_queries()).await.is_err());
    }

    #[test]
    fn test_markdown_report_and_save() {
        let analysis = IndexAnalysis {
            timestamp: Utc::now(),
            queries_tested: 1,
            baseline_results: vec![("phase_1/Q2_1_infrastructure_density".into(), 0.2)],
            indexed_results: vec![("phase_1/Q2_1_infrastructure_density".into(), 0.1)],
            indexes_created: 2,
            improvements: vec![QueryImprovement {
                query: "phase_1/Q2_1_infrastructure_density".into(),
                baseline_time: 0.2,
                indexed_time: 0.1,
                speedup: 2.0,
                improvement_percent: 50.0,
                improved: true,
            }],
            summary: AnalysisSummary {
                queries_improved: 1,
                average_speedup: 2.0,
                indexes_created: 2,
            },
        };

        let report = analysis.to_markdown();
        assert!(report.starts_with("# Index Performance Analysis Report\n\n"));
        assert!(report.contains("**Average Speedup:** 2.00x\n"));
        assert!(report.ends_with("| Q2 1 Infrastructure Density | 0.200s | 0.100s | 50.0% |\n"));

        let dir = tempfile::tempdir().unwrap();
        let (json_path, report_path) = analysis.save(dir.path()).unwrap();
        assert!(json_path.is_file());
        assert_eq!(std::fs::read_to_string(report_path).unwrap(), report);
    }
}
