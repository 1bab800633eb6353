//! Command line to run configuration.

use clap::Parser;
use pgworkload::cli::{Cli, Commands, RunArgs};
use pgworkload::config::RunConfig;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

const URL: &str = "postgres://root@localhost:26257/bank?sslmode=disable";

fn run_args(extra: &[&str]) -> RunArgs {
    run_args_with_url(URL, extra)
}

fn run_args_with_url(url: &str, extra: &[&str]) -> RunArgs {
    let mut argv = vec!["pgworkload", "run", "--workload", "kv", "--url", url];
    argv.extend_from_slice(extra);
    match Cli::try_parse_from(argv).unwrap().command {
        Commands::Run(args) => args,
        Commands::Worker(_) => panic!("expected run"),
    }
}

#[test]
fn test_spec_from_command_line() {
    let config = RunConfig::from_args(&run_args(&[
        "--concurrency",
        "8",
        "--procs",
        "2",
        "--iterations",
        "100",
        "--duration",
        "5m",
        "--conn-duration",
        "30s",
        "--frequency",
        "5",
        "--autocommit",
        "--in-process",
    ]))
    .unwrap();

    let spec = &config.spec;
    assert_eq!(spec.concurrency, 8);
    assert_eq!(spec.procs, 2);
    assert_eq!(spec.iterations, 12);
    assert_eq!(spec.duration, Duration::from_secs(300));
    assert_eq!(spec.conn_duration, Duration::from_secs(30));
    assert!(spec.autocommit);
    assert_eq!(spec.workload, "kv");
    assert_eq!(
        spec.dburl,
        "postgres://root@localhost:26257/bank?sslmode=disable&application_name=kv"
    );
    assert_eq!(config.frequency, Duration::from_secs(5));
    assert!(config.in_process);
    assert!(spec.args.is_empty());
}

#[test]
fn test_procs_default_to_cpu_count() {
    let config = RunConfig::from_args(&run_args(&[])).unwrap();
    assert_eq!(config.spec.procs, num_cpus::get());
}

#[test]
fn test_app_name_overrides_workload_name() {
    let config = RunConfig::from_args(&run_args(&["--app-name", "nightly"])).unwrap();
    assert!(config.spec.dburl.ends_with("&application_name=nightly"));
}

#[test]
fn test_args_from_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "read_pct: 90\nkey_type: uuid\nthink_time: 0").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = RunConfig::from_args(&run_args(&["--args", &path])).unwrap();
    assert_eq!(config.spec.args.get("read_pct"), Some(&json!(90)));
    assert_eq!(config.spec.args.get("key_type"), Some(&json!("uuid")));
    assert_eq!(config.spec.args.get("think_time"), Some(&json!(0)));
}

#[test]
fn test_args_from_json_file() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{"batch_size": 4, "write_mode": "upsert"}}"#).unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let config = RunConfig::from_args(&run_args(&["--args", &path])).unwrap();
    assert_eq!(config.spec.args.get("batch_size"), Some(&json!(4)));
    assert_eq!(config.spec.args.get("write_mode"), Some(&json!("upsert")));
}

#[test]
fn test_invalid_settings_are_rejected() {
    assert!(RunConfig::from_args(&run_args(&["--concurrency", "0"])).is_err());
    assert!(RunConfig::from_args(&run_args(&["--procs", "0"])).is_err());
    assert!(RunConfig::from_args(&run_args(&["--frequency", "0"])).is_err());
    assert!(RunConfig::from_args(&run_args(&["--args", "[1, 2]"])).is_err());
}

#[test]
fn test_url_must_name_a_database() {
    let err = RunConfig::from_args(&run_args_with_url("postgres://root@localhost:26257", &[]))
        .unwrap_err();
    assert!(format!("{err:#}").contains("must name a database"));
}
