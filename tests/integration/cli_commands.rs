#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use csv::ReaderBuilder;
use serde_json::Value;
use tempfile::TempDir;

fn generate(dir: &TempDir) -> PathBuf {
    let out = dir.path().join("ds");
    cargo_bin_cmd!("gnnpipe")
        .args(["--color", "never", "generate", "--nodes", "300", "--avg-degree", "5"])
        .args(["--feat-dim", "8", "--seed", "7"])
        .arg(&out)
        .assert()
        .success();
    out
}

fn json_of(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json")
}

fn cli_config(dir: &TempDir) -> PathBuf {
    dir.path().join("cli.toml")
}

#[test]
fn generate_then_inspect_reports_json_stats() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    let output = cargo_bin_cmd!("gnnpipe")
        .args(["--format", "json", "inspect"])
        .arg(&ds)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    assert_eq!(json["meta"]["num_node"], 300);
    assert_eq!(json["meta"]["feat_dim"], 8);
    assert_eq!(json["num_train"], 180);
    assert!(json["meta"]["num_edge"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn run_prints_a_json_summary_and_writes_metrics() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    let csv_path = dir.path().join("steps.csv");
    let trace_path = dir.path().join("trace.json");
    let output = cargo_bin_cmd!("gnnpipe")
        .env_remove("GNNPIPE_PROFILE")
        .args(["--format", "json", "--config"])
        .arg(cli_config(&dir))
        .arg("run")
        .arg(&ds)
        .args(["--batch-size", "32", "--fanout", "4,4", "--epochs", "2"])
        .args(["--cache-policy", "by-degree", "--cache-percentage", "0.2"])
        .args(["--samplers", "2", "--trainers", "1", "--switchers", "1"])
        .args(["--sanity-check", "--log-node-access"])
        .arg("--profile-csv")
        .arg(&csv_path)
        .arg("--trace")
        .arg(&trace_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    let steps = json["steps_per_epoch"].as_u64().expect("steps");
    assert_eq!(steps, 6);
    assert_eq!(json["batches_trained"].as_u64(), Some(2 * steps));
    assert_eq!(json["workers"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["cache"]["capacity"], 60);
    assert!(json["node_access"]["top"].as_array().is_some_and(|t| !t.is_empty()));

    let mut reader = ReaderBuilder::new().from_path(&csv_path).expect("csv");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), ["epoch", "step", "metric", "value"]);
    let metrics: Vec<String> = reader
        .records()
        .map(|r| r.expect("record")[2].to_string())
        .collect();
    assert!(metrics.iter().any(|m| m == "train_time"));
    assert!(trace_path.exists());
}

#[test]
fn run_config_file_and_flags_layer_in_order() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    let run_config = dir.path().join("run.toml");
    fs::write(
        &run_config,
        "batch_size = 100\nnum_epoch = 3\nfanout = [2]\nsample_type = \"khop-dedup\"\n",
    )
    .expect("write run config");
    let output = cargo_bin_cmd!("gnnpipe")
        .env_remove("GNNPIPE_PROFILE")
        .args(["--format", "json", "--config"])
        .arg(cli_config(&dir))
        .arg("run")
        .arg(&ds)
        .arg("--run-config")
        .arg(&run_config)
        .args(["--epochs", "1"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    assert_eq!(json["num_epoch"], 1);
    assert_eq!(json["steps_per_epoch"], 2);
}

#[test]
fn profiles_supply_run_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    let config = cli_config(&dir);
    cargo_bin_cmd!("gnnpipe")
        .arg("--config")
        .arg(&config)
        .args(["profile", "set", "small", "--dataset"])
        .arg(&ds)
        .args(["--batch-size", "60", "--fanout", "3,3", "--epochs", "1", "--default"])
        .assert()
        .success();
    assert!(config.exists());

    let listed = cargo_bin_cmd!("gnnpipe")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .args(["profile", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&listed);
    assert_eq!(json["profiles"][0], "small");
    assert_eq!(json["default"], "small");

    let output = cargo_bin_cmd!("gnnpipe")
        .env_remove("GNNPIPE_PROFILE")
        .args(["--format", "json", "--config"])
        .arg(&config)
        .arg("run")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    assert_eq!(json["num_epoch"], 1);
    assert_eq!(json["steps_per_epoch"], 3);

    cargo_bin_cmd!("gnnpipe")
        .arg("--config")
        .arg(&config)
        .args(["profile", "delete", "small"])
        .assert()
        .success();
    cargo_bin_cmd!("gnnpipe")
        .arg("--config")
        .arg(&config)
        .args(["profile", "show", "small"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn rank_persists_both_rankings() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    let output = cargo_bin_cmd!("gnnpipe")
        .args(["--format", "json", "rank"])
        .arg(&ds)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    assert_eq!(json["by_degree_head"].as_array().map(Vec::len), Some(10));
    let files: Vec<String> = fs::read_dir(&ds)
        .expect("read dataset dir")
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(files.iter().any(|f| f.contains("by_degree")), "{files:?}");
    assert!(files.iter().any(|f| f.contains("by_heuristic")), "{files:?}");
}

#[test]
fn invalid_configuration_exits_with_code_two() {
    let dir = TempDir::new().expect("tempdir");
    let ds = generate(&dir);
    cargo_bin_cmd!("gnnpipe")
        .env_remove("GNNPIPE_PROFILE")
        .arg("--config")
        .arg(cli_config(&dir))
        .arg("run")
        .arg(&ds)
        .args(["--fanout", "3,0"])
        .assert()
        .failure()
        .code(2);
    cargo_bin_cmd!("gnnpipe")
        .arg("inspect")
        .arg(dir.path().join("missing"))
        .assert()
        .failure()
        .code(1);
}

#[test]
fn import_builds_a_dataset_from_csv() {
    let dir = TempDir::new().expect("tempdir");
    let csv = dir.path().join("edges.csv");
    fs::write(&csv, "src,dst\n0,1\n1,2\n2,3\n3,0\n0,2\n").expect("write csv");
    let out = dir.path().join("imported");
    let output = cargo_bin_cmd!("gnnpipe")
        .args(["--format", "json", "import"])
        .arg(&csv)
        .arg(&out)
        .args(["--feat-dim", "4", "--train-ratio", "0.5"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json = json_of(&output);
    assert_eq!(json["nodes"], 4);
    assert_eq!(json["edges"], 5);
    assert_eq!(json["train"], 2);
}

#[test]
fn completions_are_printed() {
    let output = cargo_bin_cmd!("gnnpipe")
        .args(["completions", "bash"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("gnnpipe"));
}
