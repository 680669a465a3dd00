//! CLI command integration tests.
//! Each test uses a temp directory via NEON_SOUL_DATA_DIR for full isolation.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const WS_ID: &str = "soul_test";

fn ns_cmd(data_dir: &TempDir, workspace: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("neon-soul").unwrap();
    cmd.env("NEON_SOUL_DATA_DIR", data_dir.path())
        .env_remove("RUST_LOG")
        .arg("--workspace")
        .arg(workspace)
        .args(["--workspace-id", WS_ID]);
    cmd
}

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Three phrasings of one value, one of them from an external source.
fn workspace() -> TempDir {
    let ws = TempDir::new().unwrap();
    write(
        ws.path(),
        "memory/journal.md",
        "# Journal\n\nI always tell the truth.\n\nLunch was at noon today.\n\n- ok\n",
    );
    write(ws.path(), "memory/letters.md", "Always, I tell the truth.\n");
    write(
        ws.path(),
        "memory/feedback.md",
        "---\ncategory: external\ndate: 2026-02-01\n---\nI tell the truth, always.\n",
    );
    ws
}

#[test]
fn run_promotes_repeated_value() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("mode:       initial"))
        .stdout(predicate::str::contains("blocks:     4 scanned"))
        .stdout(predicate::str::contains("1 not identity-bearing"))
        .stdout(predicate::str::contains("axioms:     1 promoted, 0 blocked"));

    ns_cmd(&data, ws.path())
        .arg("axioms")
        .assert()
        .success()
        // The external phrasing outweighs the self-authored ones.
        .stdout(predicate::str::contains(
            "[honesty-framework] I tell the truth, always. (",
        ))
        .stdout(predicate::str::contains("n=3"));

    let lock = data.path().join("workspaces").join(WS_ID).join("cycle.lock");
    assert!(!lock.exists(), "lock released after the run");
}

#[test]
fn status_before_and_after_run() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("workspace:  soul_test"))
        .stdout(predicate::str::contains("last_run:   (none)"))
        .stdout(predicate::str::contains("lock:       free"));

    ns_cmd(&data, ws.path()).arg("run").assert().success();

    ns_cmd(&data, ws.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("mode:       initial"))
        .stdout(predicate::str::contains("runs:       1 (1 kept)"))
        .stdout(predicate::str::contains("sources:    4 blocks"));
}

#[test]
fn unchanged_sources_run_incrementally() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path()).arg("run").assert().success();
    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("mode:       incremental"))
        .stdout(predicate::str::contains("4 scanned, 0 new"))
        .stdout(predicate::str::contains("axioms:     1 promoted"));
}

#[test]
fn forced_resynthesis_reports_baseline() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path()).arg("run").assert().success();
    ns_cmd(&data, ws.path())
        .args(["run", "--force-resynthesis"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("mode:       full-resynthesis"))
        .stdout(predicate::str::contains("baseline:   1 retained, 0 added, 0 dropped"));
}

#[test]
fn self_asserted_only_is_blocked_and_explained() {
    let data = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write(ws.path(), "memory/a.md", "I always tell the truth.\n");
    write(ws.path(), "memory/b.md", "Always, I tell the truth.\n");
    write(ws.path(), "memory/c.txt", "I tell the truth, always.\n");

    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("axioms:     0 promoted, 1 blocked"))
        .stdout(predicate::str::contains("zero axioms promoted"));

    ns_cmd(&data, ws.path())
        .arg("axioms")
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked:"))
        .stdout(predicate::str::contains("all signals self-asserted"));
}

#[test]
fn flags_override_config_file() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    write(ws.path(), "neon-soul.toml", "[promotion]\nn_threshold = 4\n");

    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("axioms:     0 promoted, 0 blocked, 1 below threshold"));

    ns_cmd(&data, ws.path())
        .args(["run", "--force-resynthesis", "--n-threshold", "3"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("axioms:     1 promoted"));
}

#[test]
fn render_to_stdout_and_file() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path()).arg("run").assert().success();

    ns_cmd(&data, ws.path())
        .arg("render")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("# SOUL"))
        .stdout(predicate::str::contains("## Honesty Framework"))
        .stdout(predicate::str::contains("- **I tell the truth, always.**"));

    let out = ws.path().join("SOUL.md");
    ns_cmd(&data, ws.path())
        .args(["render", "--output"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("rendered to"));
    let doc = std::fs::read_to_string(&out).unwrap();
    assert!(doc.contains("## Honesty Framework"));
}

#[test]
fn export_writes_versioned_camel_case_json() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path()).arg("run").assert().success();

    let path = ws.path().join("export.json");
    ns_cmd(&data, ws.path())
        .arg("export")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported run"));

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(doc["version"], 1);
    assert_eq!(doc["workspaceId"], WS_ID);
    assert_eq!(doc["axioms"].as_array().unwrap().len(), 1);
    assert_eq!(doc["signals"].as_array().unwrap().len(), 3);
    assert_eq!(doc["report"]["promoted"], 1);
    let external = doc["signals"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["provenance"]["sourceCategory"] == "external")
        .unwrap();
    assert_eq!(external["provenance"]["sourceFile"], "memory/feedback.md");
}

#[test]
fn commands_need_a_committed_run() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    for args in [vec!["axioms"], vec!["render"], vec!["export", "out.json"]] {
        ns_cmd(&data, ws.path())
            .args(&args)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("no committed run"));
    }
}

#[test]
fn held_lock_exits_75_and_leaves_state_alone() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    // The test process itself is a live owner.
    write(
        &data.path().join("workspaces").join(WS_ID),
        "cycle.lock",
        &std::process::id().to_string(),
    );

    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(75)
        .stderr(predicate::str::contains("locked by another run"));

    assert!(!data
        .path()
        .join("workspaces")
        .join(WS_ID)
        .join("cycle-state.json")
        .exists());
    ns_cmd(&data, ws.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "lock:       held by pid {}",
            std::process::id()
        )));
}

#[test]
fn invalid_threshold_is_fatal() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path())
        .args(["run", "--match-threshold", "1.5"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn missing_memory_dir_is_fatal() {
    let data = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    ns_cmd(&data, ws.path())
        .arg("run")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn explicit_sources_replace_memory_dir() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    write(ws.path(), "notes/extra.md", "I want to learn something new every week.\n");
    ns_cmd(&data, ws.path())
        .args(["run", "--sources"])
        .arg(ws.path().join("notes"))
        .assert()
        .code(0)
        .stdout(predicate::str::contains("blocks:     1 scanned"));
}

#[test]
fn unreachable_provider_degrades_run() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    write(
        ws.path(),
        "neon-soul.toml",
        "[capability]\nmax_retries = 0\nbackoff_ms = 0\n",
    );
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    ns_cmd(&data, ws.path())
        .args(["run", "--provider", "http"])
        .env("NEON_SOUL_LLM_URL", format!("http://127.0.0.1:{port}/v1"))
        .env("NEON_SOUL_LLM_MODEL", "test-model")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("status:     degraded"))
        .stdout(predicate::str::contains("degraded:   4 signals"));
}

#[test]
fn http_provider_requires_url() {
    let data = TempDir::new().unwrap();
    let ws = workspace();
    ns_cmd(&data, ws.path())
        .args(["run", "--provider", "http"])
        .env_remove("NEON_SOUL_LLM_URL")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("NEON_SOUL_LLM_URL"));
}
