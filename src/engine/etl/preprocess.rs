//! Raw dataset cleaning
//!
//! Each known dataset has a cleaner that normalizes field names and values
//! and drops unusable rows. Cleaned records are written as a CSV with a
//! sorted header (processed + sql copies) and as a JSON array for the
//! document store.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{info, warn};

use super::{file_stem, files_with_extension, DataLayout, EtlResult};

pub type RawRow = HashMap<String, String>;
pub type Record = Map<String, Value>;

const NULL_MARKERS: [&str; 6] = ["", "NULL", "null", "None", "N/A", "n/a"];

/// Trimmed string without control characters; null markers become `None`
pub fn clean_string(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if NULL_MARKERS.contains(&trimmed) {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| !c.is_control()).collect();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Number with `$`, `,` and `%` stripped
pub fn clean_numeric(value: &str) -> Option<f64> {
    let cleaned: String = value.chars().filter(|c| !matches!(c, '$' | ',' | '%')).collect();
    let cleaned = cleaned.trim();
    if matches!(cleaned.to_lowercase().as_str(), "" | "null" | "none" | "n/a" | "nan") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Integer via float, truncating any fraction
pub fn clean_int(value: &str) -> Option<i64> {
    clean_numeric(value).map(|f| f.trunc() as i64)
}

/// Model or data year within 1990..=2030
pub fn clean_year(value: &str) -> Option<i64> {
    clean_int(value).filter(|y| (1990..=2030).contains(y))
}

const MAKE_NAMES: [(&str, &str); 18] = [
    ("bmw", "BMW"),
    ("tesla", "Tesla"),
    ("audi", "Audi"),
    ("mercedes", "Mercedes-Benz"),
    ("mercedes-benz", "Mercedes-Benz"),
    ("volkswagen", "Volkswagen"),
    ("vw", "Volkswagen"),
    ("nissan", "Nissan"),
    ("hyundai", "Hyundai"),
    ("kia", "Kia"),
    ("ford", "Ford"),
    ("chevrolet", "Chevrolet"),
    ("chevy", "Chevrolet"),
    ("byd", "BYD"),
    ("nio", "NIO"),
    ("lucid", "Lucid Motors"),
    ("rivian", "Rivian"),
    ("polestar", "Polestar"),
];

/// Capitalize the first letter of every alphabetic run
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

/// Canonical manufacturer name
pub fn standardize_make(make: &str) -> Option<String> {
    let make = clean_string(make)?;
    let lower = make.to_lowercase();
    Some(
        MAKE_NAMES
            .iter()
            .find(|(k, _)| *k == lower)
            .map(|(_, v)| v.to_string())
            .unwrap_or_else(|| title_case(&make)),
    )
}

/// Both coordinates parse and fall within valid ranges
pub fn validate_coordinates(lat: &str, lng: &str) -> Option<(f64, f64)> {
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)).then_some((lat, lng))
}

/// First non-empty value among alternative column names
fn field<'a>(row: &'a RawRow, names: &[&str]) -> &'a str {
    names
        .iter()
        .filter_map(|n| row.get(*n))
        .find(|v| !v.is_empty())
        .map(String::as_str)
        .unwrap_or("")
}

fn put_string(record: &mut Record, key: &str, value: Option<String>) {
    if let Some(v) = value {
        record.insert(key.to_string(), Value::String(v));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    EvPopulation,
    ChargingStations,
    EvSales,
    Generic,
}

impl Dataset {
    /// Classify a raw file by its name
    pub fn detect(file_name: &str) -> Self {
        let lower = file_name.to_lowercase();
        if lower.contains("population") || lower.contains("vehicle") {
            Dataset::EvPopulation
        } else if lower.contains("station") {
            Dataset::ChargingStations
        } else if lower.contains("sales") || lower.contains("iea") || lower.contains("global") {
            Dataset::EvSales
        } else {
            Dataset::Generic
        }
    }

    /// Clean raw rows, or `None` for unclassified data
    pub fn clean(&self, rows: &[RawRow]) -> Option<Vec<Record>> {
        match self {
            Dataset::EvPopulation => Some(clean_ev_population(rows)),
            Dataset::ChargingStations => Some(clean_charging_stations(rows)),
            Dataset::EvSales => Some(clean_ev_sales(rows)),
            Dataset::Generic => None,
        }
    }
}

/// Registrations need make, model and a state or city
pub fn clean_ev_population(rows: &[RawRow]) -> Vec<Record> {
    rows.iter()
        .filter_map(|row| {
            let make = standardize_make(field(row, &["make", "Make"]))?;
            let model = clean_string(field(row, &["model", "Model"]))?;

            let mut record = Record::new();
            record.insert("make".into(), Value::String(make));
            record.insert("model".into(), Value::String(model));

            if let Some(year) = clean_year(field(row, &["model_year", "Model Year", "year", "Year"])) {
                record.insert("model_year".into(), year.into());
            }
            put_string(
                &mut record,
                "electric_vehicle_type",
                clean_string(field(row, &["electric_vehicle_type", "Electric Vehicle Type", "EV Type"])),
            );
            if let Some(range) = clean_int(field(row, &["electric_range", "Electric Range", "range"])).filter(|r| *r > 0) {
                record.insert("electric_range".into(), range.into());
            }
            if let Some(price) = clean_numeric(field(row, &["base_msrp", "Base MSRP", "MSRP", "price"])).filter(|p| *p > 0.0) {
                record.insert("base_msrp".into(), price.into());
            }
            put_string(&mut record, "state", clean_string(field(row, &["state", "State"])));
            put_string(&mut record, "city", clean_string(field(row, &["city", "City"])));
            put_string(&mut record, "county", clean_string(field(row, &["county", "County"])));
            put_string(
                &mut record,
                "vin_1_10",
                clean_string(field(row, &["vin_1_10", "VIN (1-10)", "VIN", "vin"])).filter(|v| v.chars().count() >= 10),
            );

            (record.contains_key("state") || record.contains_key("city")).then_some(record)
        })
        .collect()
}

/// Stations need valid coordinates and a country
pub fn clean_charging_stations(rows: &[RawRow]) -> Vec<Record> {
    rows.iter()
        .filter_map(|row| {
            let (lat, lng) = validate_coordinates(field(row, &["latitude"]), field(row, &["longitude"]))?;
            let country = clean_string(field(row, &["country_code", "country"]))?;

            let mut record = Record::new();
            record.insert("latitude".into(), lat.into());
            record.insert("longitude".into(), lng.into());
            record.insert("country_code".into(), Value::String(country.to_uppercase()));
            put_string(&mut record, "city", clean_string(field(row, &["city"])));

            if let Some(power) = clean_numeric(field(row, &["power_kw", "power"])).filter(|p| *p > 0.0) {
                record.insert("power_kw".into(), power.into());
            }
            if let Some(ports) = clean_int(field(row, &["ports"])).filter(|p| *p > 0) {
                record.insert("ports".into(), ports.into());
            }
            put_string(&mut record, "power_class", clean_string(field(row, &["power_class"])));
            if let Some(flag) = row.get("is_fast_dc") {
                let fast = matches!(flag.trim().to_uppercase().as_str(), "TRUE" | "YES" | "1" | "T");
                record.insert("is_fast_dc".into(), Value::Bool(fast));
            }
            put_string(&mut record, "connector_type", clean_string(field(row, &["connector_type"])));
            put_string(&mut record, "network", clean_string(field(row, &["network", "operator"])));
            put_string(&mut record, "status", clean_string(field(row, &["status"])));
            Some(record)
        })
        .collect()
}

/// Sales rows need a region and a valid year
pub fn clean_ev_sales(rows: &[RawRow]) -> Vec<Record> {
    rows.iter()
        .filter_map(|row| {
            let region = clean_string(field(row, &["region", "country"]))?;
            let year = clean_year(field(row, &["year"]))?;

            let mut record = Record::new();
            record.insert("region".into(), Value::String(region));
            record.insert("year".into(), year.into());
            put_string(&mut record, "parameter", clean_string(field(row, &["parameter", "category"])));
            if let Some(value) = clean_numeric(field(row, &["value"])) {
                record.insert("value".into(), value.into());
            }
            put_string(&mut record, "unit", clean_string(field(row, &["unit"])));
            put_string(&mut record, "mode", clean_string(field(row, &["mode"])));
            put_string(&mut record, "powertrain", clean_string(field(row, &["powertrain"])));
            Some(record)
        })
        .collect()
}

/// Read a CSV into header-keyed rows. Unreadable rows are skipped.
pub fn load_csv_rows(path: &Path) -> EtlResult<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        match record {
            Ok(record) => rows.push(
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect(),
            ),
            Err(e) => warn!(file = %path.display(), line = line + 2, error = %e, "skipping unreadable row"),
        }
    }
    Ok(rows)
}

/// CSV cell text. Whole floats keep a decimal point so they still read as decimals.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".into(),
        Value::Bool(false) => "False".into(),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or_default();
            if f.fract() == 0.0 {
                format!("{:.1}", f)
            } else {
                f.to_string()
            }
        }
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Give every record the union of fields, in sorted order, with nulls for gaps
pub fn standardize(records: &[Record]) -> (Vec<String>, Vec<Record>) {
    let fields: Vec<String> = records
        .iter()
        .flat_map(|r| r.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let rows = records
        .iter()
        .map(|r| {
            fields
                .iter()
                .map(|f| (f.clone(), r.get(f).cloned().unwrap_or(Value::Null)))
                .collect()
        })
        .collect();
    (fields, rows)
}

fn write_csv(path: &Path, fields: &[String], rows: &[Record]) -> EtlResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(fields)?;
    for row in rows {
        writer.write_record(fields.iter().map(|f| csv_cell(row.get(f).unwrap_or(&Value::Null))))?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub file: String,
    pub dataset: Dataset,
    pub raw_records: usize,
    pub cleaned_records: usize,
    /// Why nothing was written for this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl FileStats {
    pub fn retention_rate(&self) -> Option<f64> {
        (self.raw_records > 0).then(|| self.cleaned_records as f64 / self.raw_records as f64 * 100.0)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreprocessStats {
    pub files: Vec<FileStats>,
    pub total_original: usize,
    pub total_processed: usize,
}

impl PreprocessStats {
    pub fn retention_rate(&self) -> Option<f64> {
        (self.total_original > 0).then(|| self.total_processed as f64 / self.total_original as f64 * 100.0)
    }
}

pub struct Preprocessor {
    layout: DataLayout,
}

impl Preprocessor {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    /// Clean every CSV under `raw/`
    pub fn process_all(&self) -> EtlResult<PreprocessStats> {
        self.layout.create_all()?;
        let files = files_with_extension(&self.layout.raw(), "csv")?;
        info!(files = files.len(), dir = %self.layout.raw().display(), "preprocessing raw files");

        let mut stats = PreprocessStats::default();
        for path in files {
            let file_stats = self.process_file(&path)?;
            stats.total_original += file_stats.raw_records;
            if file_stats.skipped.is_none() {
                stats.total_processed += file_stats.cleaned_records;
            }
            stats.files.push(file_stats);
        }
        info!(
            original = stats.total_original,
            processed = stats.total_processed,
            "preprocessing completed"
        );
        Ok(stats)
    }

    fn process_file(&self, path: &Path) -> EtlResult<FileStats> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let stem = file_stem(path);
        let dataset = Dataset::detect(&stem);

        let mut file_stats = FileStats {
            file: name,
            dataset,
            raw_records: 0,
            cleaned_records: 0,
            skipped: None,
        };

        let rows = match load_csv_rows(path) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to load raw file");
                file_stats.skipped = Some(e.to_string());
                return Ok(file_stats);
            }
        };
        file_stats.raw_records = rows.len();
        if rows.is_empty() {
            file_stats.skipped = Some("no data".into());
            return Ok(file_stats);
        }

        let Some(cleaned) = dataset.clean(&rows) else {
            warn!(file = %file_stats.file, "unknown dataset type, skipping");
            file_stats.skipped = Some("unknown dataset type".into());
            return Ok(file_stats);
        };
        file_stats.cleaned_records = cleaned.len();
        if cleaned.is_empty() {
            file_stats.skipped = Some("no valid records after cleaning".into());
            return Ok(file_stats);
        }

        self.save(&cleaned, &stem)?;
        info!(
            file = %file_stats.file,
            dataset = ?dataset,
            raw = file_stats.raw_records,
            cleaned = file_stats.cleaned_records,
            "cleaned"
        );
        Ok(file_stats)
    }

    /// Write `processed/<stem>.csv`, `sql/<stem>.csv` and `nosql/<stem>.json`
    pub fn save(&self, records: &[Record], stem: &str) -> EtlResult<()> {
        let (fields, rows) = standardize(records);
        write_csv(&self.layout.processed().join(format!("{}.csv", stem)), &fields, &rows)?;
        write_csv(&self.layout.sql().join(format!("{}.csv", stem)), &fields, &rows)?;
        let json = serde_json::to_string_pretty(&rows)?;
        std::fs::write(self.layout.nosql().join(format!("{}.json", stem)), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(pairs: &[(&str, &str)]) -> RawRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_value_cleaners() {
        assert_eq!(clean_string("  Oslo\u{7}  "), Some("Oslo".into()));
        assert_eq!(clean_string("N/A"), None);
        assert_eq!(clean_numeric("$45,000"), Some(45000.0));
        assert_eq!(clean_numeric("12.5%"), Some(12.5));
        assert_eq!(clean_numeric("nan"), None);
        assert_eq!(clean_int("2019.7"), Some(2019));
        assert_eq!(clean_year("1985"), None);
        assert_eq!(clean_year("2031"), None);
        assert_eq!(clean_year("2024"), Some(2024));
        assert_eq!(standardize_make("chevy"), Some("Chevrolet".into()));
        assert_eq!(standardize_make("ROLLS-ROYCE"), Some("Rolls-Royce".into()));
        assert_eq!(validate_coordinates("59.9", "10.7"), Some((59.9, 10.7)));
        assert_eq!(validate_coordinates("91", "10"), None);
        assert_eq!(validate_coordinates("", "10"), None);
    }

    #[test]
    fn test_dataset_detection() {
        assert_eq!(Dataset::detect("Electric_Vehicle_Population_Data"), Dataset::EvPopulation);
        assert_eq!(Dataset::detect("charging_stations_2025_world"), Dataset::ChargingStations);
        assert_eq!(Dataset::detect("IEA Global EV Data 2024"), Dataset::EvSales);
        assert_eq!(Dataset::detect("weather"), Dataset::Generic);
    }

    #[test]
    fn test_population_cleaner_requires_location() {
        let rows = vec![
            row(&[("Make", "TESLA"), ("Model", "Model 3"), ("Model Year", "2022"), ("State", "WA"), ("Electric Range", "0"), ("VIN (1-10)", "5YJ3E1EA1K")]),
            row(&[("Make", "kia"), ("Model", "EV6")]),
            row(&[("Make", ""), ("Model", "Leaf"), ("State", "WA")]),
        ];
        let cleaned = clean_ev_population(&rows);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0]["make"], json!("Tesla"));
        assert_eq!(cleaned[0]["model_year"], json!(2022));
        assert_eq!(cleaned[0]["vin_1_10"], json!("5YJ3E1EA1K"));
        assert!(!cleaned[0].contains_key("electric_range"));
    }

    #[test]
    fn test_station_and_sales_cleaners() {
        let stations = clean_charging_stations(&[
            row(&[("latitude", "48.1"), ("longitude", "11.5"), ("country_code", "de"), ("power_kw", "150"), ("is_fast_dc", "TRUE")]),
            row(&[("latitude", "x"), ("longitude", "11.5"), ("country_code", "DE")]),
        ]);
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0]["country_code"], json!("DE"));
        assert_eq!(stations[0]["is_fast_dc"], json!(true));

        let sales = clean_ev_sales(&[
            row(&[("region", "Norway"), ("year", "2023"), ("value", "1,200"), ("parameter", "EV sales")]),
            row(&[("region", "Norway"), ("year", "1970")]),
        ]);
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0]["value"], json!(1200.0));
    }

    #[test]
    fn test_process_all_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_all().unwrap();
        std::fs::write(
            layout.raw().join("charging_stations_2025_world.csv"),
            "latitude,longitude,country_code,power_kw,city\n48.1,11.5,DE,150,Munich\n91,0,FR,22,\n45.4,9.2,IT,,Milan\n",
        )
        .unwrap();
        std::fs::write(layout.raw().join("weather.csv"), "a,b\n1,2\n").unwrap();

        let stats = Preprocessor::new(layout.clone()).process_all().unwrap();
        assert_eq!(stats.total_original, 4);
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.files.len(), 2);
        assert!(stats.files.iter().any(|f| f.skipped.as_deref() == Some("unknown dataset type")));

        let csv = std::fs::read_to_string(layout.sql().join("charging_stations_2025_world.csv")).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("city,country_code,latitude,longitude,power_kw"));
        assert_eq!(lines.next(), Some("Munich,DE,48.1,11.5,150.0"));
        assert_eq!(lines.next(), Some("Milan,IT,45.4,9.2,"));

        let docs: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(layout.nosql().join("charging_stations_2025_world.json")).unwrap())
                .unwrap();
        assert_eq!(docs[1]["power_kw"], Value::Null);
        assert!(layout.processed().join("charging_stations_2025_world.csv").exists());
    }
}
