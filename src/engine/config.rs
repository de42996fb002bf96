//! evdata Configuration Module
//! Handles loading evdata.config.json and applying environment overrides

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::connections::AdapterConfig;

pub const CONFIG_FILE: &str = "evdata.config.json";
pub const ENV_FILE: &str = ".env";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid env file {path}: {message}")]
    EnvFile { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub relational: AdapterConfig,
    pub document: AdapterConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub harness: HarnessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_queries_dir")]
    pub queries_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_abs_tolerance")]
    pub abs_tolerance: f64,
    #[serde(default = "default_rel_tolerance")]
    pub rel_tolerance: f64,
    /// Speedup above which an index counts as an improvement
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    /// Read numeric-looking text as numbers before comparing results
    #[serde(default)]
    pub coerce_numeric_text: bool,
}

fn default_queries_dir() -> PathBuf {
    PathBuf::from("queries")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_iterations() -> u32 {
    3
}

fn default_abs_tolerance() -> f64 {
    1e-6
}

fn default_rel_tolerance() -> f64 {
    1e-4
}

fn default_improvement_threshold() -> f64 {
    1.05
}

pub fn default_postgres_port() -> u16 {
    5432
}

pub fn default_mongo_port() -> u16 {
    27017
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            queries_dir: default_queries_dir(),
            data_dir: default_data_dir(),
            reports_dir: default_reports_dir(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            abs_tolerance: default_abs_tolerance(),
            rel_tolerance: default_rel_tolerance(),
            improvement_threshold: default_improvement_threshold(),
            coerce_numeric_text: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            relational: AdapterConfig::Postgres {
                host: "localhost".to_string(),
                port: default_postgres_port(),
                database: "ev_global_analysis".to_string(),
                username: "ev_admin".to_string(),
                password: "ev_password123".to_string(),
            },
            document: AdapterConfig::Mongo {
                host: "localhost".to_string(),
                port: default_mongo_port(),
                database: "ev_global_analysis".to_string(),
                username: "ev_admin".to_string(),
                password: "ev_password123".to_string(),
            },
            paths: PathsConfig::default(),
            harness: HarnessConfig::default(),
        }
    }
}

impl Config {
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load the project config, falling back to defaults when the file is
    /// absent, then apply environment overrides
    pub fn load_or_default(project_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = match Self::load(project_dir) {
            Ok(config) => config,
            Err(ConfigError::NotFound(_)) => Self::default(),
            Err(e) => return Err(e),
        };
        config.apply_env(project_dir)?;
        Ok(config)
    }

    pub fn save(&self, project_dir: &Path) -> Result<(), ConfigError> {
        let config_path = project_dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Offline layout: SQLite file plus a directory of JSON collections
    pub fn default_for_project(project_dir: &Path) -> Self {
        let data_dir = project_dir.join(default_data_dir());
        Self {
            relational: AdapterConfig::Sqlite {
                path: data_dir.join("evdata.db"),
            },
            document: AdapterConfig::LocalDocuments {
                dir: data_dir.join("collections"),
            },
            ..Self::default()
        }
    }

    /// Apply POSTGRES_* and MONGO_* overrides from the process environment,
    /// then from `<project>/.env` for keys the process does not set
    pub fn apply_env(&mut self, project_dir: &Path) -> Result<(), ConfigError> {
        let file_env = read_env_file(project_dir)?;
        self.apply_env_from(|key| std::env::var(key).ok().or_else(|| file_env.get(key).cloned()))
    }

    /// Apply overrides from any key lookup. Only server backends are affected.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let AdapterConfig::Postgres {
            host,
            port,
            database,
            username,
            password,
        } = &mut self.relational
        {
            override_string(&lookup, "POSTGRES_HOST", host);
            override_port(&lookup, "POSTGRES_PORT", port)?;
            override_string(&lookup, "POSTGRES_DB", database);
            override_string(&lookup, "POSTGRES_USER", username);
            override_string(&lookup, "POSTGRES_PASSWORD", password);
        }

        if let AdapterConfig::Mongo {
            host,
            port,
            database,
            username,
            password,
        } = &mut self.document
        {
            override_string(&lookup, "MONGO_HOST", host);
            override_port(&lookup, "MONGO_PORT", port)?;
            override_string(&lookup, "MONGO_DB", database);
            override_string(&lookup, "MONGO_USER", username);
            override_string(&lookup, "MONGO_PASSWORD", password);
        }
        Ok(())
    }

    /// Copy with every file-system path made absolute against `project_dir`
    pub fn resolved(&self, project_dir: &Path) -> Self {
        let mut config = self.clone();
        for adapter in [&mut config.relational, &mut config.document] {
            match adapter {
                AdapterConfig::Sqlite { path } => *path = Self::resolve(project_dir, path),
                AdapterConfig::LocalDocuments { dir } => *dir = Self::resolve(project_dir, dir),
                _ => {}
            }
        }
        config.paths.queries_dir = Self::resolve(project_dir, &config.paths.queries_dir);
        config.paths.data_dir = Self::resolve(project_dir, &config.paths.data_dir);
        config.paths.reports_dir = Self::resolve(project_dir, &config.paths.reports_dir);
        config
    }

    /// Resolve a configured path against the project directory
    pub fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_dir.join(path)
        }
    }
}

/// Key/value pairs from `<project>/.env`; empty when the file is absent
pub fn read_env_file(project_dir: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let path = project_dir.join(ENV_FILE);
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    dotenvy::from_path_iter(&path)
        .and_then(|iter| iter.collect::<Result<HashMap<_, _>, _>>())
        .map_err(|e| ConfigError::EnvFile {
            path,
            message: e.to_string(),
        })
}

fn override_string<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, target: &mut String) {
    if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
        *target = value;
    }
}

fn override_port<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    target: &mut u16,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
        *target = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
        })?;
    }
    Ok(())
}
