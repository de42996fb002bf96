//! Engine Error Types

use std::io;
use thiserror::Error;

use super::adapter::AdapterError;
use super::config::ConfigError;
use super::etl::EtlError;
use super::pipeline::PipelineError;
use super::queries::QueryError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Etl(#[from] EtlError),

    #[error("{0}")]
    Message(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
