//! Dataset Downloads
//!
//! Fetches the charging-station CSV over HTTP with resume support and the
//! Kaggle datasets through the `kaggle` CLI.

use futures_util::StreamExt;
use reqwest::header::RANGE;
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::{files_with_extension, file_stem, DataLayout, EtlError, EtlResult};

pub const CHARGING_STATIONS_URL: &str =
    "https://huggingface.co/datasets/TarekMasryo/Global-EV-Charging-Stations/resolve/main/data/";
pub const CHARGING_STATIONS_FILE: &str = "charging_stations_2025_world.csv";

/// IEA sales/stock series and the vehicle population registry
pub const KAGGLE_DATASETS: [&str; 2] = [
    "alphaamadoubalde/iea-global-ev-data-2024",
    "utkarshx27/electric-vehicle-population-data",
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// `~/.kaggle/kaggle.json`
pub fn kaggle_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".kaggle").join("kaggle.json"))
}

pub struct DatasetDownloader {
    layout: DataLayout,
    client: reqwest::Client,
}

impl DatasetDownloader {
    pub fn new(layout: DataLayout) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("evdata/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { layout, client }
    }

    /// Download `url` into `raw/<filename>`, resuming a previous partial file
    pub async fn download_file<F>(&self, url: &str, filename: &str, mut on_progress: F) -> EtlResult<PathBuf>
    where
        F: FnMut(u64, u64),
    {
        let dest = self.layout.raw().join(filename);
        let partial_path = dest.with_extension("partial");
        if let Some(parent) = partial_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut start_byte = 0;
        let mut file = if partial_path.exists() {
            start_byte = fs::metadata(&partial_path)?.len();
            fs::OpenOptions::new().append(true).open(&partial_path)?
        } else {
            File::create(&partial_path)?
        };

        let mut request = self.client.get(url);
        if start_byte > 0 {
            request = request.header(RANGE, format!("bytes={}-", start_byte));
        }
        info!(url, resume_from = start_byte, "downloading");

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::Download(format!("{}: HTTP {}", filename, status)));
        }
        // Server ignored the range request, start over
        if start_byte > 0 && status.as_u16() != 206 {
            file = File::create(&partial_path)?;
            start_byte = 0;
        }

        let total = response.content_length().map(|len| len + start_byte).unwrap_or(0);
        let mut downloaded = start_byte;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            on_progress(downloaded, total);
        }
        file.flush()?;
        drop(file);

        fs::rename(&partial_path, &dest)?;
        info!(file = %dest.display(), bytes = downloaded, "downloaded");
        Ok(dest)
    }

    pub async fn download_charging_stations(&self) -> EtlResult<PathBuf> {
        let url = format!("{}{}", CHARGING_STATIONS_URL, CHARGING_STATIONS_FILE);
        self.download_file(&url, CHARGING_STATIONS_FILE, |_, _| {}).await
    }

    /// Download and unzip a Kaggle dataset, moving its CSV files into `raw/`
    pub async fn download_kaggle_dataset(&self, dataset: &str) -> EtlResult<Vec<PathBuf>> {
        let config = kaggle_config_path().filter(|p| p.exists()).ok_or_else(|| {
            EtlError::Download(format!(
                "Kaggle API not configured, place kaggle.json in ~/.kaggle to fetch {}",
                dataset
            ))
        })?;
        let kaggle = which::which("kaggle")
            .map_err(|_| EtlError::Download("kaggle CLI not found on PATH".into()))?;
        info!(dataset, config = %config.display(), "downloading kaggle dataset");

        let temp_dir = self.layout.root().join("temp");
        fs::create_dir_all(&temp_dir)?;

        let output = tokio::process::Command::new(kaggle)
            .args(["datasets", "download", "-d", dataset, "-p"])
            .arg(&temp_dir)
            .arg("--unzip")
            .output()
            .await?;
        if !output.status.success() {
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(EtlError::Download(format!(
                "{}: {}",
                dataset,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = self.layout.raw();
        fs::create_dir_all(&raw)?;
        let mut moved = Vec::new();
        for csv_file in files_with_extension(&temp_dir, "csv")? {
            if let Some(name) = csv_file.file_name() {
                let target = raw.join(name);
                fs::rename(&csv_file, &target)?;
                info!(file = %target.display(), "downloaded");
                moved.push(target);
            }
        }
        let _ = fs::remove_dir_all(&temp_dir);
        Ok(moved)
    }

    /// Fetch every dataset; individual failures are logged and skipped
    pub async fn download_all(&self) -> EtlResult<Vec<PathBuf>> {
        self.layout.create_all()?;
        let mut files = Vec::new();

        match self.download_charging_stations().await {
            Ok(path) => files.push(path),
            Err(e) => warn!(error = %e, "charging stations download failed"),
        }
        for dataset in KAGGLE_DATASETS {
            match self.download_kaggle_dataset(dataset).await {
                Ok(paths) => files.extend(paths),
                Err(e) => warn!(dataset, error = %e, "kaggle download failed"),
            }
        }
        info!(files = files.len(), "downloads finished");
        Ok(files)
    }
}

/// Convert a CSV to a JSON array of string-valued objects
pub fn csv_to_json(csv_path: &Path, json_path: &Path) -> EtlResult<usize> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();
    let mut docs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let doc: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        docs.push(Value::Object(doc));
    }
    fs::write(json_path, serde_json::to_string_pretty(&docs)?)?;
    Ok(docs.len())
}

/// Copy raw CSVs to `sql/` and convert them to `nosql/` JSON without cleaning.
/// Returns (copied, converted).
pub fn process_raw_files(layout: &DataLayout) -> EtlResult<(usize, usize)> {
    layout.create_all()?;
    let csv_files = files_with_extension(&layout.raw(), "csv")?;
    let mut copied = 0;
    let mut converted = 0;

    for csv_file in &csv_files {
        let Some(name) = csv_file.file_name() else {
            continue;
        };
        fs::copy(csv_file, layout.sql().join(name))?;
        copied += 1;

        let json_file = layout.nosql().join(format!("{}.json", file_stem(csv_file)));
        match csv_to_json(csv_file, &json_file) {
            Ok(records) => {
                info!(file = %json_file.display(), records, "converted");
                converted += 1;
            }
            Err(e) => warn!(file = %csv_file.display(), error = %e, "conversion failed"),
        }
    }

    if copied != converted {
        warn!(raw = csv_files.len(), sql = copied, nosql = converted, "output directories out of step");
    }
    Ok((copied, converted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_csv_to_json_keeps_strings() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("in.csv");
        fs::write(&csv_path, "region,value\nNorway,12\nItaly,\n").unwrap();
        let json_path = dir.path().join("out.json");

        assert_eq!(csv_to_json(&csv_path, &json_path).unwrap(), 2);
        let docs: Value = serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(docs[0], json!({"region": "Norway", "value": "12"}));
        assert_eq!(docs[1]["value"], json!(""));
    }

    #[test]
    fn test_process_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_all().unwrap();
        fs::write(layout.raw().join("charging_stations_2025_world.csv"), "a,b\n1,2\n").unwrap();
        fs::write(layout.raw().join("IEA Global EV Data 2024.csv"), "region\nWorld\n").unwrap();

        let (copied, converted) = process_raw_files(&layout).unwrap();
        assert_eq!((copied, converted), (2, 2));
        assert!(layout.sql().join("IEA Global EV Data 2024.csv").exists());
        assert!(layout.nosql().join("charging_stations_2025_world.json").exists());
    }

    #[test]
    fn test_kaggle_config_location() {
        if let Some(path) = kaggle_config_path() {
            assert!(path.ends_with(".kaggle/kaggle.json"));
        }
    }
}
