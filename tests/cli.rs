use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn ankiai_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ankiai"))
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::write(
        root.join("notes.txt"),
        "Raft elects a leader.\n\nThe leader replicates the log.\x0cSnapshots compact the log.",
    )
    .unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/data/ankiai.sqlite"
collection = "cli_test"
dims = 8

[chunking]
target_tokens = 50
overlap_tokens = 5
{}
"#,
        root.display(),
        extra
    );
    let config_path = root.join("ankiai.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(ankiai_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run ankiai")
}

#[test]
fn test_init_creates_store() {
    let (tmp, config) = setup_test_env("");
    let output = run(&config, &["init"]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("collection: cli_test"));
    assert!(stdout.contains("dims: 8"));
    assert!(tmp.path().join("data/ankiai.sqlite").exists());

    // Idempotent.
    assert!(run(&config, &["init"]).status.success());
}

#[test]
fn test_sources_on_empty_store() {
    let (_tmp, config) = setup_test_env("");
    let output = run(&config, &["sources"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No sources in collection 'cli_test'"));
}

#[test]
fn test_collection_override() {
    let (_tmp, config) = setup_test_env("");
    let output = run(&config, &["--collection", "other", "init"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("collection: other"));

    let listed = run(&config, &["collections"]);
    assert!(listed.status.success());
    assert!(String::from_utf8_lossy(&listed.stdout).contains("other"));
}

#[test]
fn test_ingest_requires_embedding_provider() {
    let (tmp, config) = setup_test_env("");
    let file = tmp.path().join("notes.txt");
    let output = run(&config, &["ingest", file.to_str().unwrap()]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Embedding provider is disabled"));
}

#[test]
fn test_page_baseline_without_provider() {
    let (tmp, config) = setup_test_env("");
    let file = tmp.path().join("notes.txt");
    let output = run(
        &config,
        &["page", file.to_str().unwrap(), "--page", "2", "--baseline"],
    );

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "Snapshots compact the log."
    );
}

#[test]
fn test_invalid_chunking_config_rejected() {
    let (tmp, _) = setup_test_env("");
    let config = tmp.path().join("bad.toml");
    fs::write(
        &config,
        "[chunking]\ntarget_tokens = 100\noverlap_tokens = 100\n",
    )
    .unwrap();

    let output = run(&config, &["sources"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("overlap"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let output = run(&tmp.path().join("absent.toml"), &["sources"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read config file"));
}
