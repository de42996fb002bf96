//! Aggregation Pipeline Evaluator
//!
//! Runs MongoDB-style aggregation pipelines over in-memory JSON documents.
//! Backs the local document store so query corpora can be checked without
//! a running MongoDB server.

pub mod expr;
pub mod matcher;
pub mod stages;
pub mod value;

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

pub use value::compare_values;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unsupported pipeline operator: {0}")]
    Unsupported(String),

    #[error("Invalid stage: {0}")]
    InvalidStage(String),

    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Run every stage of `pipeline` over `docs` in order
pub fn run(docs: Vec<Value>, pipeline: &[Value]) -> PipelineResult<Vec<Value>> {
    let mut current = docs;
    for stage in pipeline {
        let (name, spec) = stage_parts(stage)?;
        trace!(stage = name, input = current.len(), "pipeline stage");
        current = stages::apply(name, spec, current)?;
    }
    Ok(current)
}

/// Split `{"$stage": spec}` into its name and spec
fn stage_parts(stage: &Value) -> PipelineResult<(&str, &Value)> {
    let obj = stage
        .as_object()
        .ok_or_else(|| PipelineError::InvalidStage(format!("stage must be an object: {}", stage)))?;
    if obj.len() != 1 {
        return Err(PipelineError::InvalidStage(format!(
            "stage must have exactly one field, found {}",
            obj.len()
        )));
    }
    let (name, spec) = obj
        .iter()
        .next()
        .ok_or_else(|| PipelineError::InvalidStage("empty stage".into()))?;
    Ok((name.as_str(), spec))
}
