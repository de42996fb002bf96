//! evdata CLI Module
//! Command-line interface for running and validating the query corpus

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::executor::Target;

#[derive(Parser, Debug)]
#[command(name = "evdata")]
#[command(author = "evdata Team")]
#[command(version)]
#[command(about = "Cross-database EV analytics query harness", long_about = None)]
pub struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a config for an offline project (SQLite + local JSON collections)
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// List available queries per engine and phase
    List,

    /// Run one query
    Run {
        /// Query name, e.g. Q1_1_market_growth_trajectory
        #[arg(short, long)]
        query: String,

        /// Phase directory, e.g. phase_1
        #[arg(short, long)]
        phase: String,

        /// Which database to run on
        #[arg(short, long, value_enum, default_value = "both")]
        database: Target,
    },

    /// Run a query on both databases and diff the results
    Compare {
        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        phase: String,

        /// Compare rows in order instead of as a multiset
        #[arg(long)]
        ordered: bool,

        /// Columns to leave out of the diff
        #[arg(long = "ignore-column")]
        ignore_columns: Vec<String>,

        /// Read numeric-looking text as numbers before diffing
        #[arg(long)]
        coerce_numeric: bool,
    },

    /// Run every query and report failures
    TestAll {
        /// Only print the summary
        #[arg(short, long)]
        quiet: bool,

        /// Save a JSON report
        #[arg(short, long)]
        save_report: bool,

        /// Report file name
        #[arg(short, long, default_value = "test_report.json")]
        report_file: PathBuf,

        /// Also diff results of queries present for both databases
        #[arg(long)]
        check_consistency: bool,

        /// Read numeric-looking text as numbers before diffing
        #[arg(long)]
        coerce_numeric: bool,
    },

    /// Measure relational query times with and without indexes
    IndexAnalyze {
        /// Queries as phase:name
        #[arg(long, num_args = 1..)]
        queries: Vec<String>,

        /// Runs per query and state
        #[arg(short, long)]
        iterations: Option<u32>,
    },

    /// Show queries, their results and timings
    Demo {
        /// Run the presentation suite
        #[arg(short, long)]
        suite: bool,

        #[arg(short, long)]
        query: Option<String>,

        #[arg(short, long)]
        phase: Option<String>,

        #[arg(short, long, value_enum, default_value = "both")]
        database: Target,

        /// Write the output to a file instead of the terminal
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Clean raw CSV files into processed, sql and nosql outputs
    Preprocess,

    /// Load cleaned data into both databases
    Setup,

    /// Download the raw datasets
    Download {
        /// Copy and convert raw files without cleaning
        #[arg(long)]
        skip_preprocess: bool,
    },

    /// Show configuration and backend reachability
    Status,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_and_index_analyze() {
        let cli = Cli::try_parse_from(["evdata", "--project", "/tmp/ev", "run", "-q", "Q1", "-p", "phase_1", "-d", "sql"])
            .unwrap();
        assert_eq!(cli.get_project_dir(), PathBuf::from("/tmp/ev"));
        match cli.command {
            Commands::Run { query, phase, database } => {
                assert_eq!((query.as_str(), phase.as_str()), ("Q1", "phase_1"));
                assert_eq!(database, Target::Sql);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from(["evdata", "index-analyze", "--queries", "phase_1:Q1", "phase_2:Q2"]).unwrap();
        match cli.command {
            Commands::IndexAnalyze { queries, iterations } => {
                assert_eq!(queries.len(), 2);
                assert!(iterations.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
