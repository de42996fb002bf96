// evdata Engine - Core module structure
pub mod adapter;
pub mod cli;
pub mod compare;
pub mod config;
pub mod connections;
pub mod error;
pub mod etl;
pub mod executor;
pub mod index_analyzer;
pub mod normalize;
pub mod pipeline;
pub mod queries;
pub mod test_runner;

pub use config::Config;
pub use error::{EngineError, Result};
pub use executor::{Target, UnifiedExecutor};
