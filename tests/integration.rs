use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn umeta_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_umeta"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Two buckets, one nested directory, one ignored derivative cache
    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("album/raw")).unwrap();
    fs::create_dir_all(files_dir.join("album/.umetaderiv")).unwrap();
    fs::create_dir_all(files_dir.join("docs")).unwrap();
    fs::write(files_dir.join("album/a.jpg"), b"first image").unwrap();
    fs::write(files_dir.join("album/raw/b.jpg"), b"second image").unwrap();
    fs::write(files_dir.join("album/.umetaderiv/a.json"), b"{}").unwrap();
    fs::write(files_dir.join("docs/readme.txt"), b"hello").unwrap();
    fs::write(files_dir.join("stray.txt"), b"outside any bucket").unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/umeta.sqlite"

[[sources]]
name = "local"
type = "disk"
root = "{}/files"
generators = ["checksum"]
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("umeta.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_umeta(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = umeta_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env_remove("UMETA_DATABASE")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run umeta binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_umeta(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/umeta.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_umeta(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_umeta(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sources_lists_configured_source() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_umeta(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("local"));
    assert!(stdout.contains("checksum"));
    assert!(stdout.contains("true"));
}

#[test]
fn test_index_before_init_suggests_init() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_umeta(&config_path, &["index", "local"]);
    assert!(!success);
    assert!(stderr.contains("umeta init"), "stderr: {}", stderr);
}

#[test]
fn test_index_and_reindex() {
    let (_tmp, config_path) = setup_test_env();

    run_umeta(&config_path, &["init"]);
    let (stdout, stderr, success) = run_umeta(&config_path, &["index", "local"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(succeeded)"));
    assert!(stdout.contains("buckets: 2"));
    assert!(stdout.contains("created: 4"), "got: {}", stdout);

    let (stdout, _, success) = run_umeta(&config_path, &["index"]);
    assert!(success);
    assert!(stdout.contains("created: 0"));
    assert!(stdout.contains("unchanged: 4"));
}

#[test]
fn test_index_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_umeta(&config_path, &["init"]);
    let (_, stderr, success) = run_umeta(&config_path, &["index", "nope"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_ls_and_buckets() {
    let (_tmp, config_path) = setup_test_env();

    run_umeta(&config_path, &["init"]);
    run_umeta(&config_path, &["index", "local"]);

    let (stdout, _, success) = run_umeta(&config_path, &["ls", "--bucket", "album"]);
    assert!(success);
    assert!(stdout.contains("album/"));
    assert!(stdout.contains("    b.jpg"), "got: {}", stdout);
    assert!(!stdout.contains(".umetaderiv"));

    let (stdout, _, success) = run_umeta(&config_path, &["buckets", "--source", "local"]);
    assert!(success);
    assert!(stdout.contains("  album"));
    assert!(stdout.contains("  docs"));

    let (_, _, success) = run_umeta(&config_path, &["ls", "--bucket", "missing"]);
    assert!(!success);
}

#[test]
fn test_generate_only_recomputes_changes() {
    let (tmp, config_path) = setup_test_env();

    run_umeta(&config_path, &["init"]);
    run_umeta(&config_path, &["index", "local"]);

    let (stdout, stderr, success) = run_umeta(&config_path, &["generate", "--name", "local"]);
    assert!(success, "generate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("checksum@1"));
    assert!(stdout.contains("(full scan)"));
    assert!(stdout.contains("new: 3"), "got: {}", stdout);

    let (stdout, _, _) = run_umeta(&config_path, &["generate", "--name", "local"]);
    assert!(stdout.contains("new: 0"));
    assert!(stdout.contains("stale: 0"));

    // Ensure the rewritten file gets a later mtime
    std::thread::sleep(std::time::Duration::from_secs(2));
    fs::write(tmp.path().join("files/album/a.jpg"), b"edited image").unwrap();

    let (stdout, _, _) = run_umeta(&config_path, &["index", "local"]);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);

    let (stdout, _, _) = run_umeta(&config_path, &["generate", "--name", "local"]);
    assert!(stdout.contains("new: 0"));
    assert!(stdout.contains("stale: 1"), "got: {}", stdout);
}
