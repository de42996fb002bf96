use assert_cmd::Command;
use std::fs;

fn evdata(project: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("evdata-cli").unwrap();
    cmd.arg("--project").arg(project).env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let output = Command::cargo_bin("evdata-cli").unwrap().arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for command in ["init", "run", "compare", "test-all", "index-analyze", "demo", "setup"] {
        assert!(text.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_init_then_list() -> Result<(), Box<dyn std::error::Error>> {
    let project = tempfile::tempdir()?;

    evdata(project.path()).arg("init").assert().success();
    assert!(project.path().join("evdata.config.json").is_file());
    assert!(project.path().join("queries").join("sql").is_dir());
    assert!(project.path().join("data").join("raw").is_dir());

    // Second init without --force refuses to overwrite
    evdata(project.path()).arg("init").assert().failure();
    evdata(project.path()).args(["init", "--force"]).assert().success();

    let phase = project.path().join("queries").join("sql").join("phase_1");
    fs::create_dir_all(&phase)?;
    fs::write(phase.join("Q1_1_market_growth_trajectory.sql"), "SELECT 1 AS one;")?;

    let output = evdata(project.path()).args(["--format", "json", "list"]).output()?;
    assert!(output.status.success());
    let catalog: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(catalog["sql"]["phase_1"][0], "Q1_1_market_growth_trajectory");
    assert_eq!(catalog["mongodb"], serde_json::json!({}));
    Ok(())
}

#[test]
fn test_run_sql_only_against_fresh_project() -> Result<(), Box<dyn std::error::Error>> {
    let project = tempfile::tempdir()?;
    evdata(project.path()).arg("init").assert().success();

    let phase = project.path().join("queries").join("sql").join("phase_1");
    fs::create_dir_all(&phase)?;
    fs::write(phase.join("Q0_smoke.sql"), "SELECT 41 + 1 AS answer;")?;

    let output = evdata(project.path())
        .args(["--format", "json", "run", "-q", "Q0_smoke", "-p", "phase_1", "-d", "sql"])
        .output()?;
    assert!(output.status.success());
    let run: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(run["sql"]["results"][0]["answer"], 42);
    assert!(run["mongodb"].is_null());

    // A query with no file fails with a non-zero exit code
    evdata(project.path())
        .args(["run", "-q", "Q9_missing", "-p", "phase_1", "-d", "sql"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn test_numeric_text_coercion_flag_and_config_key() -> Result<(), Box<dyn std::error::Error>> {
    let project = tempfile::tempdir()?;
    evdata(project.path()).arg("init").assert().success();

    let sql_phase = project.path().join("queries").join("sql").join("phase_1");
    let doc_phase = project.path().join("queries").join("mongodb").join("phase_1");
    fs::create_dir_all(&sql_phase)?;
    fs::create_dir_all(&doc_phase)?;
    fs::write(sql_phase.join("Q0_answer.sql"), "SELECT '42' AS answer;")?;
    fs::write(
        doc_phase.join("Q0_answer.json"),
        r#"{"collection": "facts", "pipeline": [{"$project": {"_id": 0, "answer": 1}}]}"#,
    )?;
    let collections = project.path().join("data").join("collections");
    fs::create_dir_all(&collections)?;
    fs::write(collections.join("facts.json"), r#"[{"_id": "a", "answer": 42}]"#)?;

    let compare = ["compare", "-q", "Q0_answer", "-p", "phase_1"];
    evdata(project.path()).args(compare).assert().failure();
    evdata(project.path()).args(compare).arg("--coerce-numeric").assert().success();
    evdata(project.path())
        .args(["test-all", "-q", "--check-consistency", "--coerce-numeric"])
        .assert()
        .success();

    let config_path = project.path().join("evdata.config.json");
    let mut config: serde_json::Value = serde_json::from_str(&fs::read_to_string(&config_path)?)?;
    config["harness"]["coerce_numeric_text"] = serde_json::Value::Bool(true);
    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    evdata(project.path()).args(compare).assert().success();
    Ok(())
}
