//! Database loading
//!
//! Loads `sql/*.csv` into relational tables with guessed column types and
//! `nosql/*.json` into document collections.

use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::{file_stem, files_with_extension, DataLayout, EtlError, EtlResult};
use crate::engine::adapter::{AdapterResult, ColumnDef, DocumentAdapter, SqlAdapter};
use crate::engine::connections::ConnectionManager;

pub const SAMPLE_ROWS: usize = 100;
pub const BATCH_SIZE: usize = 1000;
pub const READY_ATTEMPTS: u32 = 30;
pub const READY_DELAY: Duration = Duration::from_secs(1);

/// Data file stems and the (table, collection) names the queries use
const FILE_TARGETS: [(&str, &str, &str); 3] = [
    ("IEA Global EV Data 2024", "ev_sales", "ev_sales_data"),
    ("charging_stations_2025_world", "charging_stations", "charging_stations"),
    ("Electric_Vehicle_Population_Data", "ev_population", "ev_population_data"),
];

/// Table name for a CSV file stem; unknown stems are used as-is
pub fn table_for_stem(stem: &str) -> String {
    FILE_TARGETS
        .iter()
        .find(|(s, _, _)| *s == stem)
        .map(|(_, table, _)| table.to_string())
        .unwrap_or_else(|| stem.to_string())
}

/// Collection name for a JSON file stem; unknown stems are used as-is
pub fn collection_for_stem(stem: &str) -> String {
    FILE_TARGETS
        .iter()
        .find(|(s, _, _)| *s == stem)
        .map(|(_, _, collection)| collection.to_string())
        .unwrap_or_else(|| stem.to_string())
}

/// Guess a column type from sample values
pub fn guess_column_type(values: &[&str]) -> &'static str {
    let non_empty: Vec<&str> = values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
    if non_empty.is_empty() {
        return "TEXT";
    }

    let mut has_decimal = false;
    let all_numeric = non_empty.iter().all(|v| match v.parse::<f64>() {
        Ok(f) if f.is_finite() => {
            if v.contains('.') || f.fract() != 0.0 {
                has_decimal = true;
            }
            true
        }
        _ => false,
    });
    if all_numeric {
        return if has_decimal { "DECIMAL(15,4)" } else { "INTEGER" };
    }

    let max_len = non_empty.iter().take(50).map(|v| v.chars().count()).max().unwrap_or(0);
    match max_len {
        0..=50 => "VARCHAR(100)",
        51..=150 => "VARCHAR(200)",
        _ => "TEXT",
    }
}

/// Column definitions from the header and the first sample rows
pub fn infer_columns(path: &Path) -> EtlResult<Vec<ColumnDef>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let samples: Vec<csv::StringRecord> = reader
        .records()
        .take(SAMPLE_ROWS)
        .collect::<Result<_, _>>()?;

    Ok(headers
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values: Vec<&str> = samples.iter().map(|r| r.get(i).unwrap_or("")).collect();
            ColumnDef::new(name, guess_column_type(&values))
        })
        .collect())
}

/// Pad or truncate to `width`; blank cells become NULL
fn to_row(record: &csv::StringRecord, width: usize) -> Vec<Option<String>> {
    (0..width)
        .map(|i| {
            record
                .get(i)
                .filter(|v| !v.trim().is_empty())
                .map(str::to_string)
        })
        .collect()
}

/// Recreate `table` from a CSV file and insert every row in batches
pub async fn load_csv(adapter: &dyn SqlAdapter, path: &Path, table: &str) -> EtlResult<u64> {
    let columns = infer_columns(path)?;
    if columns.is_empty() {
        return Err(EtlError::InvalidData(format!("{} has no header", path.display())));
    }
    adapter.create_table(table, &columns).await?;
    info!(table, columns = columns.len(), "created table with typed columns");

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut batch: Vec<Vec<Option<String>>> = Vec::with_capacity(BATCH_SIZE);
    let mut total = 0u64;

    for record in reader.records() {
        batch.push(to_row(&record?, columns.len()));
        if batch.len() >= BATCH_SIZE {
            total += adapter.insert_rows(table, &columns, &batch).await?;
            batch.clear();
            if total % 10_000 == 0 {
                info!(table, rows = total, "imported");
            }
        }
    }
    if !batch.is_empty() {
        total += adapter.insert_rows(table, &columns, &batch).await?;
    }
    Ok(total)
}

/// Replace `collection` with the contents of a JSON file. A top-level
/// object is stored as a single document.
pub async fn load_json(adapter: &dyn DocumentAdapter, path: &Path, collection: &str) -> EtlResult<u64> {
    let content = std::fs::read_to_string(path)?;
    let docs = match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(adapter.replace_collection(collection, docs).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedFile {
    pub file: String,
    pub target: String,
    pub records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub relational: Vec<LoadedFile>,
    pub document: Vec<LoadedFile>,
    /// Set when a backend never became ready
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.unavailable.is_empty() && self.relational.iter().chain(&self.document).all(|f| f.error.is_none())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

pub struct DatabaseSetup {
    layout: DataLayout,
    attempts: u32,
    delay: Duration,
}

impl DatabaseSetup {
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            attempts: READY_ATTEMPTS,
            delay: READY_DELAY,
        }
    }

    /// Override the readiness probe schedule
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts;
        self.delay = delay;
        self
    }

    async fn wait_sql(&self, adapter: &dyn SqlAdapter) -> AdapterResult<()> {
        ConnectionManager::wait_until_ready(&adapter.describe(), self.attempts, self.delay, || {
            adapter.test_connection()
        })
        .await
    }

    async fn wait_documents(&self, adapter: &dyn DocumentAdapter) -> AdapterResult<()> {
        ConnectionManager::wait_until_ready(&adapter.describe(), self.attempts, self.delay, || {
            adapter.test_connection()
        })
        .await
    }

    /// Load every `sql/*.csv`; a failing file does not stop the rest
    pub async fn load_relational(&self, adapter: &dyn SqlAdapter, report: &mut LoadReport) -> EtlResult<()> {
        if let Err(e) = self.wait_sql(adapter).await {
            warn!(error = %e, "relational backend not ready");
            report.unavailable.push(format!("{}: {}", adapter.describe(), e));
            return Ok(());
        }

        for path in files_with_extension(&self.layout.sql(), "csv")? {
            let table = table_for_stem(&file_stem(&path));
            info!(file = %path.display(), table = %table, "loading csv");
            let outcome = load_csv(adapter, &path, &table).await;
            report.relational.push(loaded(&path, table, outcome));
        }
        Ok(())
    }

    /// Load every `nosql/*.json`; a failing file does not stop the rest
    pub async fn load_documents(&self, adapter: &dyn DocumentAdapter, report: &mut LoadReport) -> EtlResult<()> {
        if let Err(e) = self.wait_documents(adapter).await {
            warn!(error = %e, "document backend not ready");
            report.unavailable.push(format!("{}: {}", adapter.describe(), e));
            return Ok(());
        }

        for path in files_with_extension(&self.layout.nosql(), "json")? {
            let collection = collection_for_stem(&file_stem(&path));
            info!(file = %path.display(), collection = %collection, "loading json");
            let outcome = load_json(adapter, &path, &collection).await;
            report.document.push(loaded(&path, collection, outcome));
        }
        Ok(())
    }

    /// Load both backends
    pub async fn run(&self, sql: &dyn SqlAdapter, documents: &dyn DocumentAdapter) -> EtlResult<LoadReport> {
        let mut report = LoadReport::default();
        self.load_relational(sql, &mut report).await?;
        self.load_documents(documents, &mut report).await?;
        info!(ok = report.is_ok(), "database setup finished");
        Ok(report)
    }
}

fn loaded(path: &Path, target: String, outcome: EtlResult<u64>) -> LoadedFile {
    match outcome {
        Ok(records) => {
            info!(destination = %target, records, "loaded");
            LoadedFile {
                file: file_name(path),
                target,
                records,
                error: None,
            }
        }
        Err(e) => {
            warn!(file = %path.display(), error = %e, "load failed");
            LoadedFile {
                file: file_name(path),
                target,
                records: 0,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::adapter::{LocalDocumentAdapter, SqliteAdapter};
    use serde_json::json;

    #[test]
    fn test_guess_column_type() {
        assert_eq!(guess_column_type(&["1", "2", ""]), "INTEGER");
        assert_eq!(guess_column_type(&["1", "2.5"]), "DECIMAL(15,4)");
        assert_eq!(guess_column_type(&["150.0"]), "DECIMAL(15,4)");
        assert_eq!(guess_column_type(&["", " "]), "TEXT");
        assert_eq!(guess_column_type(&["Norway", "1"]), "VARCHAR(100)");
        let long = "x".repeat(120);
        assert_eq!(guess_column_type(&[long.as_str()]), "VARCHAR(200)");
        let longer = "x".repeat(151);
        assert_eq!(guess_column_type(&[longer.as_str()]), "TEXT");
    }

    #[test]
    fn test_stem_mapping() {
        assert_eq!(table_for_stem("IEA Global EV Data 2024"), "ev_sales");
        assert_eq!(collection_for_stem("Electric_Vehicle_Population_Data"), "ev_population_data");
        assert_eq!(table_for_stem("custom"), "custom");
    }

    #[tokio::test]
    async fn test_load_csv_batches_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IEA Global EV Data 2024.csv");
        let mut content = String::from("region,year,value\n");
        for i in 0..1500 {
            content.push_str(&format!("R{},{},{}.5\n", i % 7, 2010 + i % 10, i));
        }
        content.push_str("Norway,,\n");
        content.push_str("Italy\n");
        std::fs::write(&path, content).unwrap();

        let sqlite = SqliteAdapter::in_memory().unwrap();
        let loaded = load_csv(&sqlite, &path, "ev_sales").await.unwrap();
        assert_eq!(loaded, 1502);

        let rs = sqlite
            .query("SELECT COUNT(*) AS n, SUM(year IS NULL) AS missing FROM ev_sales")
            .await
            .unwrap();
        assert_eq!(rs.rows[0]["n"], json!(1502));
        assert_eq!(rs.rows[0]["missing"], json!(2));
    }

    #[tokio::test]
    async fn test_setup_loads_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_all().unwrap();
        std::fs::write(
            layout.sql().join("charging_stations_2025_world.csv"),
            "country_code,power_kw\nDE,150.0\nFR,22.0\n",
        )
        .unwrap();
        std::fs::write(layout.sql().join("broken.csv"), "").unwrap();
        std::fs::write(
            layout.nosql().join("charging_stations_2025_world.json"),
            r#"[{"country_code": "DE"}, {"country_code": "FR"}]"#,
        )
        .unwrap();
        std::fs::write(layout.nosql().join("meta.json"), r#"{"source": "test"}"#).unwrap();

        let sqlite = SqliteAdapter::in_memory().unwrap();
        let docs = LocalDocumentAdapter::in_memory();
        let setup = DatabaseSetup::new(layout).with_retry(1, Duration::from_millis(1));
        let report = setup.run(&sqlite, &docs).await.unwrap();

        assert_eq!(report.relational.len(), 2);
        let stations = report.relational.iter().find(|f| f.target == "charging_stations").unwrap();
        assert_eq!(stations.records, 2);
        assert!(report.relational.iter().any(|f| f.error.is_some()));
        assert!(!report.is_ok());

        assert_eq!(report.document.len(), 2);
        assert!(report.document.iter().all(|f| f.error.is_none()));
        let rs = docs.aggregate("meta", &[]).await.unwrap();
        assert_eq!(rs.len(), 1);
    }
}
