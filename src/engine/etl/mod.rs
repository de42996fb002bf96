//! Data Pipeline
//!
//! Download, clean and load the EV datasets into both backends.
//! Files move through `<data>/raw` → `<data>/processed`, `<data>/sql` (CSV)
//! and `<data>/nosql` (JSON).

pub mod download;
pub mod preprocess;
pub mod setup;

pub use download::DatasetDownloader;
pub use preprocess::{Dataset, PreprocessStats, Preprocessor};
pub use setup::{DatabaseSetup, LoadReport};

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::adapter::AdapterError;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Invalid data file: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(PathBuf),
}

pub type EtlResult<T> = Result<T, EtlError>;

/// Directory layout under the project data dir
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn processed(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn sql(&self) -> PathBuf {
        self.root.join("sql")
    }

    pub fn nosql(&self) -> PathBuf {
        self.root.join("nosql")
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in [self.raw(), self.processed(), self.sql(), self.nosql()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Files in `dir` with extension `ext`, sorted by name
pub fn files_with_extension(dir: &Path, ext: &str) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(ext))
        .collect();
    files.sort();
    Ok(files)
}

/// File stem as UTF-8, or an empty string
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(dir.path());
        layout.create_all().unwrap();
        assert!(layout.nosql().is_dir());

        std::fs::write(layout.raw().join("b.csv"), "x").unwrap();
        std::fs::write(layout.raw().join("a.csv"), "x").unwrap();
        std::fs::write(layout.raw().join("notes.txt"), "x").unwrap();
        let files = files_with_extension(&layout.raw(), "csv").unwrap();
        assert_eq!(files.iter().map(|p| file_stem(p)).collect::<Vec<_>>(), vec!["a", "b"]);

        assert!(files_with_extension(&dir.path().join("missing"), "csv").unwrap().is_empty());
    }
}
