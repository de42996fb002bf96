//! evdata CLI - Main entry point for CLI binary
//!
//! This binary provides the `evdata-cli` tool for running, comparing and
//! benchmarking the EV query corpus.

use evdata_lib::engine::{
    adapter::{DocumentAdapter, SqlAdapter},
    cli::{
        formatter::{format_rate, format_seconds, format_size, indent, render_documents, render_table, CliFormatter},
        Cli, Commands, OutputFormat,
    },
    compare::CompareOptions,
    config::{Config, CONFIG_FILE},
    connections::ConnectionManager,
    etl::{download, preprocess::Preprocessor, setup::DatabaseSetup, DataLayout, DatasetDownloader},
    executor::{ConsistencyStatus, EngineRun, Target, UnifiedExecutor},
    index_analyzer::{self, IndexAnalyzer},
    normalize::NormalizeOptions,
    queries::{catalog::known_query_count, Engine, QueryLoader, QueryRef},
    test_runner::{QueryTestRunner, TestRunOptions},
};
use clap::Parser;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match run_cli(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            CliFormatter::error(&e.to_string());
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evdata=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_cli(cli: Cli) -> CliResult<i32> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { force } => cmd_init(&project_dir, force, json_output),
        Commands::List => cmd_list(&project_dir, json_output),
        Commands::Run { query, phase, database } => {
            cmd_run(&project_dir, &QueryRef::new(&phase, &query), database, json_output).await
        }
        Commands::Compare {
            query,
            phase,
            ordered,
            ignore_columns,
            coerce_numeric,
        } => {
            cmd_compare(
                &project_dir,
                &QueryRef::new(&phase, &query),
                ordered,
                ignore_columns,
                coerce_numeric,
                json_output,
            )
            .await
        }
        Commands::TestAll {
            quiet,
            save_report,
            report_file,
            check_consistency,
            coerce_numeric,
        } => {
            cmd_test_all(
                &project_dir,
                quiet,
                save_report.then_some(report_file),
                check_consistency,
                coerce_numeric,
                json_output,
            )
            .await
        }
        Commands::IndexAnalyze { queries, iterations } => {
            cmd_index_analyze(&project_dir, &queries, iterations, json_output).await
        }
        Commands::Demo {
            suite,
            query,
            phase,
            database,
            output,
        } => cmd_demo(&project_dir, suite, query, phase, database, output).await,
        Commands::Preprocess => cmd_preprocess(&project_dir, json_output),
        Commands::Setup => cmd_setup(&project_dir, json_output).await,
        Commands::Download { skip_preprocess } => cmd_download(&project_dir, skip_preprocess, json_output).await,
        Commands::Status => cmd_status(&project_dir, json_output).await,
    }
}

/// Project config with env overrides and absolute paths
fn load_config(project_dir: &Path) -> CliResult<Config> {
    Ok(Config::load_or_default(project_dir)?.resolved(project_dir))
}

/// Connect both backends. A backend that fails to connect is recorded on
/// the executor so runs against it report the reason.
async fn build_executor(config: &Config) -> UnifiedExecutor {
    let mut executor = UnifiedExecutor::new(QueryLoader::new(&config.paths.queries_dir)).with_normalize_options(
        NormalizeOptions {
            coerce_numeric_text: config.harness.coerce_numeric_text,
            ..NormalizeOptions::default()
        },
    );
    executor = match ConnectionManager::create_sql_adapter(&config.relational).await {
        Ok(adapter) => executor.with_sql(adapter),
        Err(e) => executor.with_sql_unavailable(format!("{}: {}", config.relational.display_string(), e)),
    };
    match ConnectionManager::create_document_adapter(&config.document).await {
        Ok(adapter) => executor.with_documents(adapter),
        Err(e) => executor.with_documents_unavailable(format!("{}: {}", config.document.display_string(), e)),
    }
}

fn compare_options(config: &Config) -> CompareOptions {
    CompareOptions {
        abs_tolerance: config.harness.abs_tolerance,
        rel_tolerance: config.harness.rel_tolerance,
        ..CompareOptions::default()
    }
}

fn cmd_init(project_dir: &Path, force: bool, json: bool) -> CliResult<i32> {
    let config_path = project_dir.join(CONFIG_FILE);
    if config_path.exists() && !force {
        return Err(format!("Config already exists: {} (use --force to overwrite)", config_path.display()).into());
    }

    std::fs::create_dir_all(project_dir)?;
    let config = Config::default_for_project(project_dir);
    config.save(project_dir)?;

    let resolved = config.resolved(project_dir);
    for dir in [&resolved.paths.queries_dir, &resolved.paths.reports_dir] {
        std::fs::create_dir_all(dir)?;
    }
    for engine in [Engine::Sql, Engine::Mongodb] {
        std::fs::create_dir_all(resolved.paths.queries_dir.join(engine.dir_name()))?;
    }
    DataLayout::new(&resolved.paths.data_dir).create_all()?;

    if json {
        println!(
            "{}",
            json!({
                "success": true,
                "config": config_path.display().to_string(),
                "relational": config.relational.display_string(),
                "document": config.document.display_string(),
            })
        );
    } else {
        CliFormatter::success(&format!("Created {}", config_path.display()));
        CliFormatter::kv("Relational", &config.relational.display_string());
        CliFormatter::kv("Documents", &config.document.display_string());
        CliFormatter::blank();
        CliFormatter::info("Next steps: evdata-cli download, evdata-cli setup, evdata-cli test-all");
    }
    Ok(0)
}

fn cmd_list(project_dir: &Path, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let loader = QueryLoader::new(&config.paths.queries_dir);
    let catalog = loader.list_queries();

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(0);
    }

    for (title, phases) in [("SQL Queries", &catalog.sql), ("MongoDB Queries", &catalog.mongodb)] {
        CliFormatter::header(title);
        if phases.is_empty() {
            CliFormatter::item("none found");
        }
        for (phase, names) in phases {
            CliFormatter::kv(phase, &format!("{} queries", names.len()));
            for (i, name) in names.iter().enumerate() {
                CliFormatter::numbered_item(i + 1, &format!("{} - {}", name, QueryRef::new(phase, name).display_title()));
            }
        }
    }
    CliFormatter::blank();
    CliFormatter::info(&format!(
        "{} query files ({} mapped analyses)",
        catalog.total(),
        known_query_count()
    ));
    Ok(0)
}

fn run_json(run: &EngineRun) -> serde_json::Value {
    let mut value = serde_json::to_value(run).unwrap_or_default();
    if let (Some(obj), Some(result)) = (value.as_object_mut(), &run.result) {
        obj.insert("results".into(), json!(result.rows));
    }
    value
}

fn print_run(run: &EngineRun) {
    let label = match run.engine {
        Engine::Sql => "SQL",
        Engine::Mongodb => "MongoDB",
    };
    CliFormatter::header(&format!("{} Results", label));
    if let Some(collection) = &run.collection {
        CliFormatter::kv("Collection", collection);
    }
    match (&run.result, &run.error) {
        (Some(result), _) => {
            let rendered = match run.engine {
                Engine::Sql => render_table(result),
                Engine::Mongodb => render_documents(result),
            };
            println!("{}", rendered);
        }
        (None, Some(error)) => CliFormatter::error(error),
        (None, None) => {}
    }
    CliFormatter::kv("Execution time", &format_seconds(run.elapsed.as_secs_f64()));
}

async fn cmd_run(project_dir: &Path, query: &QueryRef, target: Target, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let executor = build_executor(&config).await;
    let outcome = executor.execute(query, target).await;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "query": outcome.query,
                "sql": outcome.sql.as_ref().map(run_json),
                "mongodb": outcome.mongodb.as_ref().map(run_json),
            }))?
        );
    } else {
        CliFormatter::header(&query.display_title());
        CliFormatter::kv("Phase", &query.phase);
        for run in outcome.runs() {
            print_run(run);
        }
        if let Some((engine, ratio)) = outcome.faster_engine() {
            CliFormatter::divider();
            CliFormatter::success(&format!("{} is {:.2}x faster", engine, ratio));
        }
    }
    Ok(if outcome.has_errors() { 1 } else { 0 })
}

async fn cmd_compare(
    project_dir: &Path,
    query: &QueryRef,
    ordered: bool,
    ignore_columns: Vec<String>,
    coerce_numeric: bool,
    json: bool,
) -> CliResult<i32> {
    let mut config = load_config(project_dir)?;
    config.harness.coerce_numeric_text |= coerce_numeric;
    let executor = build_executor(&config).await;
    let options = CompareOptions {
        ignore_order: !ordered,
        ignore_columns,
        ..compare_options(&config)
    };
    let report = executor.compare(query, &options).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(if report.is_consistent() { 0 } else { 1 });
    }

    CliFormatter::header(&format!("Consistency: {}", query.display_title()));
    for run in report.sql.iter().chain(report.mongodb.iter()) {
        let text = match &run.error {
            None => format!("{}: {} rows in {}", run.engine, run.rows, format_seconds(run.elapsed.as_secs_f64())),
            Some(e) => format!("{}: {}", run.engine, e),
        };
        CliFormatter::outcome(run.is_ok(), &text);
    }

    match &report.comparison {
        Some(comparison) => {
            CliFormatter::kv("Result", &comparison.summary());
            if !comparison.row_diffs.is_empty() {
                CliFormatter::table_header(&["row", "column", "sql", "mongodb"]);
                for diff in &comparison.row_diffs {
                    CliFormatter::table_row(&[
                        &diff.row.to_string(),
                        &diff.column,
                        &diff.left.to_string(),
                        &diff.right.to_string(),
                    ]);
                }
                if comparison.diff_count > comparison.row_diffs.len() {
                    CliFormatter::item(&format!(
                        "{} more differences not shown",
                        comparison.diff_count - comparison.row_diffs.len()
                    ));
                }
            }
        }
        None => CliFormatter::warning("Comparison skipped because a query failed"),
    }

    match report.status {
        ConsistencyStatus::Consistent => CliFormatter::success("Results are consistent"),
        ConsistencyStatus::Inconsistent => CliFormatter::error("Results differ"),
        ConsistencyStatus::Incomplete => CliFormatter::warning("Consistency could not be checked"),
    }
    Ok(if report.is_consistent() { 0 } else { 1 })
}

async fn cmd_test_all(
    project_dir: &Path,
    quiet: bool,
    report_file: Option<PathBuf>,
    check_consistency: bool,
    coerce_numeric: bool,
    json: bool,
) -> CliResult<i32> {
    let mut config = load_config(project_dir)?;
    config.harness.coerce_numeric_text |= coerce_numeric;
    let executor = build_executor(&config).await;
    let options = TestRunOptions {
        check_consistency,
        compare: compare_options(&config),
    };

    let show_progress = !quiet && !json;
    if show_progress {
        CliFormatter::header("Testing all queries");
    }
    let report = QueryTestRunner::new(&executor, options)
        .run(|index, total, result| {
            if !show_progress {
                return;
            }
            CliFormatter::progress(index, total, &format!("{}/{}", result.phase, result.query_name));
            for (label, engine) in [("SQL", &result.sql_result), ("MongoDB", &result.mongodb_result)] {
                if let Some(test) = engine {
                    let text = match &test.error {
                        None => format!("{}: {} rows in {}", label, test.row_count, format_seconds(test.execution_time)),
                        Some(e) => format!("{}: {}", label, e),
                    };
                    CliFormatter::outcome(test.success, &text);
                }
            }
            if let Some(status) = result.consistency {
                let detail = result.consistency_detail.as_deref().unwrap_or("not compared");
                CliFormatter::outcome(status == ConsistencyStatus::Consistent, &format!("consistency: {}", detail));
            }
        })
        .await;

    let saved = match report_file {
        Some(file) => {
            let path = Config::resolve(&config.paths.reports_dir, &file);
            report.save(&path)?;
            Some(path)
        }
        None => None,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.exit_code());
    }

    CliFormatter::header("Summary");
    CliFormatter::kv("Duration", &format_seconds(report.duration));
    CliFormatter::kv(
        "Query files",
        &format!("{} ({} unique)", report.total_queries, report.unique_queries),
    );
    CliFormatter::kv(
        "SQL",
        &format!(
            "{} passed, {} failed ({})",
            report.sql_success,
            report.sql_failures,
            format_rate(report.sql_success_rate())
        ),
    );
    CliFormatter::kv(
        "MongoDB",
        &format!(
            "{} passed, {} failed ({})",
            report.mongodb_success,
            report.mongodb_failures,
            format_rate(report.mongodb_success_rate())
        ),
    );
    CliFormatter::kv("Overall", &format_rate(report.overall_success_rate()));
    CliFormatter::kv(
        "Coverage",
        &format!(
            "{} both, {} SQL only, {} MongoDB only",
            report.coverage.both, report.coverage.sql_only, report.coverage.mongodb_only
        ),
    );
    if let Some(consistency) = &report.consistency {
        CliFormatter::kv(
            "Consistency",
            &format!(
                "{} checked, {} consistent, {} inconsistent, {} incomplete",
                consistency.checked, consistency.consistent, consistency.inconsistent, consistency.incomplete
            ),
        );
    }

    if !report.failed_queries.is_empty() {
        CliFormatter::header("Failed queries");
        for failure in &report.failed_queries {
            CliFormatter::item(&format!(
                "{}/{} [{}]: {}",
                failure.phase, failure.query, failure.database, failure.error
            ));
        }
    }
    if let Some(path) = saved {
        CliFormatter::info(&format!("Report saved to {}", path.display()));
    }

    CliFormatter::blank();
    if report.exit_code() == 0 {
        CliFormatter::success("All queries passed");
    } else {
        CliFormatter::error("Some queries failed");
    }
    Ok(report.exit_code())
}

async fn cmd_index_analyze(
    project_dir: &Path,
    specs: &[String],
    iterations: Option<u32>,
    json: bool,
) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let executor = build_executor(&config).await;
    let queries = if specs.is_empty() {
        index_analyzer::default_queries()
    } else {
        index_analyzer::parse_query_specs(specs)
    };
    if queries.is_empty() {
        return Err("No valid queries given, use phase_1:Q1_1_market_growth_trajectory".into());
    }

    let mut analyzer = IndexAnalyzer::new(&executor)
        .with_iterations(iterations.unwrap_or(config.harness.iterations))
        .with_threshold(config.harness.improvement_threshold);
    let analysis = analyzer.run(&queries).await?;
    let (json_path, report_path) = analysis.save(&config.paths.reports_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(0);
    }

    CliFormatter::header("Index Performance Analysis");
    CliFormatter::table_header(&["query", "baseline", "indexed", "change"]);
    for (key, baseline) in &analysis.baseline_results {
        let indexed = analysis
            .indexed_results
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| *t)
            .unwrap_or(0.0);
        let change = analysis
            .improvements
            .iter()
            .find(|i| &i.query == key)
            .map(|i| format!("{:+.1}% ({:.2}x)", i.improvement_percent, i.speedup))
            .unwrap_or_else(|| "n/a".into());
        CliFormatter::table_row(&[key, &format_seconds(*baseline), &format_seconds(indexed), &change]);
    }
    CliFormatter::header("Summary");
    CliFormatter::kv("Queries tested", &analysis.queries_tested.to_string());
    CliFormatter::kv("Indexes created", &analysis.summary.indexes_created.to_string());
    CliFormatter::kv("Queries improved", &analysis.summary.queries_improved.to_string());
    CliFormatter::kv("Average speedup", &format!("{:.2}x", analysis.summary.average_speedup));
    CliFormatter::blank();
    CliFormatter::info(&format!("Results saved to {}", json_path.display()));
    CliFormatter::info(&format!("Report saved to {}", report_path.display()));
    Ok(0)
}

/// Show the query text for one engine
fn demo_query_text(executor: &UnifiedExecutor, query: &QueryRef, engine: Engine) -> String {
    let loader = executor.loader();
    match engine {
        Engine::Sql => match loader.load_sql(query) {
            Ok(sql) => format!("\nSQL Query:\n{}", indent(sql.trim_end(), "   ")),
            Err(e) => format!("   WARNING: Could not load query: {}", e),
        },
        Engine::Mongodb => match loader.load_pipeline(query) {
            Ok(loaded) => format!(
                "\nMongoDB Pipeline ({}):\n{}",
                loaded.collection,
                indent(&serde_json::to_string_pretty(&loaded.pipeline).unwrap_or_default(), "   ")
            ),
            Err(e) => format!("   WARNING: Could not load query: {}", e),
        },
    }
}

async fn demo_query(
    executor: &UnifiedExecutor,
    query: &QueryRef,
    target: Target,
    out: &mut dyn Write,
) -> std::io::Result<()> {
    let rule = "=".repeat(60);
    writeln!(out, "\n{}\nEV DATA DEMO: {}\n{}", rule, query.display_title(), rule)?;
    writeln!(out, "Phase: {}", query.phase)?;

    let outcome = executor.execute(query, target).await;
    for run in outcome.runs() {
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "\n{} EXECUTION", run.engine.to_string().to_uppercase())?;
        writeln!(out, "{}", demo_query_text(executor, query, run.engine))?;
        match (&run.result, &run.error) {
            (Some(result), _) => {
                let rendered = match run.engine {
                    Engine::Sql => render_table(result),
                    Engine::Mongodb => render_documents(result),
                };
                writeln!(out, "\nResults:\n{}", rendered)?;
            }
            (None, Some(e)) => writeln!(out, "\nERROR: {}", e)?,
            (None, None) => {}
        }
        writeln!(out, "\nExecution Time: {:.3} seconds", run.elapsed.as_secs_f64())?;
    }

    if let Some((engine, ratio)) = outcome.faster_engine() {
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "\nPERFORMANCE COMPARISON")?;
        writeln!(out, "Winner: {}", engine.to_string().to_uppercase())?;
        writeln!(out, "{} is {:.2}x faster", engine, ratio)?;
    }
    Ok(())
}

async fn cmd_demo(
    project_dir: &Path,
    suite: bool,
    query: Option<String>,
    phase: Option<String>,
    target: Target,
    output: Option<PathBuf>,
) -> CliResult<i32> {
    let queries = match (suite, query, phase) {
        (true, _, _) => index_analyzer::default_queries(),
        (false, Some(query), Some(phase)) => vec![QueryRef::new(&phase, &query)],
        _ => return Err("Use --suite or give both --query and --phase".into()),
    };
    let target = if suite { Target::Both } else { target };

    let config = load_config(project_dir)?;
    let executor = build_executor(&config).await;

    let mut out: Box<dyn Write> = match &output {
        Some(path) => {
            CliFormatter::info(&format!("Saving output to: {}", path.display()));
            Box::new(std::io::BufWriter::new(std::fs::File::create(path)?))
        }
        None => Box::new(std::io::stdout()),
    };

    for query in &queries {
        demo_query(&executor, query, target, out.as_mut()).await?;
    }
    if suite {
        writeln!(out, "\n{}\nDemo completed.\n{}", "=".repeat(60), "=".repeat(60))?;
    }
    out.flush()?;
    Ok(0)
}

fn cmd_preprocess(project_dir: &Path, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let layout = DataLayout::new(&config.paths.data_dir);
    let stats = Preprocessor::new(layout.clone()).process_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(0);
    }

    CliFormatter::header("EV Data Preprocessing");
    for file in &stats.files {
        match &file.skipped {
            None => CliFormatter::outcome(
                true,
                &format!(
                    "{}: {} → {} records ({} retained)",
                    file.file,
                    file.raw_records,
                    file.cleaned_records,
                    format_rate(file.retention_rate())
                ),
            ),
            Some(reason) => CliFormatter::warning(&format!("{}: skipped, {}", file.file, reason)),
        }
    }
    CliFormatter::kv("Total original records", &stats.total_original.to_string());
    CliFormatter::kv("Total processed records", &stats.total_processed.to_string());
    CliFormatter::kv("Overall retention", &format_rate(stats.retention_rate()));
    CliFormatter::item(&format!("Processed: {}", layout.processed().display()));
    CliFormatter::item(&format!("SQL: {}", layout.sql().display()));
    CliFormatter::item(&format!("NoSQL: {}", layout.nosql().display()));
    Ok(0)
}

async fn cmd_setup(project_dir: &Path, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let setup = DatabaseSetup::new(DataLayout::new(&config.paths.data_dir));

    let sql = ConnectionManager::create_sql_adapter(&config.relational).await?;
    let documents = ConnectionManager::create_document_adapter(&config.document).await?;
    let report = setup.run(sql.as_ref(), documents.as_ref()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (title, files) in [("Relational", &report.relational), ("Documents", &report.document)] {
            CliFormatter::header(title);
            if files.is_empty() {
                CliFormatter::item("no data files found");
            }
            for file in files {
                match &file.error {
                    None => CliFormatter::outcome(true, &format!("{} → {} ({} records)", file.file, file.target, file.records)),
                    Some(e) => CliFormatter::outcome(false, &format!("{} → {}: {}", file.file, file.target, e)),
                }
            }
        }
        for reason in &report.unavailable {
            CliFormatter::error(&format!("Not ready: {}", reason));
        }
        CliFormatter::blank();
        if report.is_ok() {
            CliFormatter::success("All databases ready");
        } else {
            CliFormatter::warning("Some databases failed");
        }
    }
    Ok(if report.is_ok() { 0 } else { 1 })
}

async fn cmd_download(project_dir: &Path, skip_preprocess: bool, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let layout = DataLayout::new(&config.paths.data_dir);
    let downloader = DatasetDownloader::new(layout.clone());

    if !json {
        CliFormatter::header("Downloading EV datasets");
    }
    let files = downloader.download_all().await?;
    if !json {
        for file in &files {
            let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            CliFormatter::item(&format!("{} ({})", file.display(), format_size(size)));
        }
        if files.is_empty() {
            CliFormatter::warning("Nothing was downloaded");
        }
    }

    let processed = if skip_preprocess {
        let (copied, converted) = download::process_raw_files(&layout)?;
        json!({ "copied": copied, "converted": converted })
    } else {
        serde_json::to_value(Preprocessor::new(layout.clone()).process_all()?)?
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "downloaded": files,
                "processed": processed,
            }))?
        );
    } else {
        CliFormatter::success("Download and processing completed");
        CliFormatter::info("Next: evdata-cli setup, then evdata-cli demo --suite");
    }
    Ok(0)
}

async fn probe_sql(adapter: &dyn SqlAdapter) -> Result<(), String> {
    ConnectionManager::wait_until_ready(&adapter.describe(), 1, Duration::ZERO, || adapter.test_connection())
        .await
        .map_err(|e| e.to_string())
}

async fn probe_documents(adapter: &dyn DocumentAdapter) -> Result<(), String> {
    ConnectionManager::wait_until_ready(&adapter.describe(), 1, Duration::ZERO, || adapter.test_connection())
        .await
        .map_err(|e| e.to_string())
}

async fn cmd_status(project_dir: &Path, json: bool) -> CliResult<i32> {
    let config = load_config(project_dir)?;
    let has_config = project_dir.join(CONFIG_FILE).exists();

    let relational = match ConnectionManager::create_sql_adapter(&config.relational).await {
        Ok(adapter) => probe_sql(adapter.as_ref()).await,
        Err(e) => Err(e.to_string()),
    };
    let document = match ConnectionManager::create_document_adapter(&config.document).await {
        Ok(adapter) => probe_documents(adapter.as_ref()).await,
        Err(e) => Err(e.to_string()),
    };
    let catalog = QueryLoader::new(&config.paths.queries_dir).list_queries();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "config_file": has_config,
                "relational": {
                    "connection": config.relational.display_string(),
                    "reachable": relational.is_ok(),
                    "error": relational.as_ref().err(),
                },
                "document": {
                    "connection": config.document.display_string(),
                    "reachable": document.is_ok(),
                    "error": document.as_ref().err(),
                },
                "queries": catalog.total(),
                "queries_dir": config.paths.queries_dir.display().to_string(),
            }))?
        );
        return Ok(0);
    }

    CliFormatter::header("evdata Status");
    CliFormatter::kv(
        "Config",
        &if has_config {
            project_dir.join(CONFIG_FILE).display().to_string()
        } else {
            "defaults + environment".to_string()
        },
    );
    for (label, display, state) in [
        ("Relational", config.relational.display_string(), &relational),
        ("Documents", config.document.display_string(), &document),
    ] {
        CliFormatter::kv(label, &display);
        match state {
            Ok(()) => CliFormatter::outcome(true, "reachable"),
            Err(e) => CliFormatter::outcome(false, e),
        }
    }
    CliFormatter::kv("Queries", &format!("{} files in {}", catalog.total(), config.paths.queries_dir.display()));
    CliFormatter::kv("Data", &config.paths.data_dir.display().to_string());
    CliFormatter::kv("Reports", &config.paths.reports_dir.display().to_string());
    Ok(0)
}
