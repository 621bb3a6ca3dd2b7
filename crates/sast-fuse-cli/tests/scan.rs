use assert_cmd::Command;
use predicates::str::contains;

const ALL_TOOLS: [&str; 5] = ["codeql", "joern", "spotbugs", "bandit", "semgrep"];

/// Fresh command with the process environment scrubbed of `SAST_FUSE_*`
/// variables, so tests see only what they set themselves.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("sast-fuse").unwrap();
    for key in [
        "SAST_FUSE_ENABLE_LLM",
        "SAST_FUSE_LLM_URL",
        "SAST_FUSE_LLM_KEY",
        "SAST_FUSE_LLM_MODEL",
        "SAST_FUSE_ENABLE_REACHABILITY",
        "SAST_FUSE_DISABLE_TOOLS",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn disable_all_tools(cmd: &mut Command) {
    for tool in ALL_TOOLS {
        cmd.args(["--disable-tool", tool]);
    }
}

#[test]
fn scan_requires_input_and_output() {
    cmd()
        .assert()
        .failure()
        .stderr(contains("--input-dir and --output-dir are required"));
}

#[test]
fn missing_input_directory_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    cmd()
        .args(["-i"])
        .arg(temp.path().join("nope"))
        .args(["-o"])
        .arg(temp.path().join("reports"))
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn empty_project_scans_to_success_with_no_reports() {
    let temp = tempfile::tempdir().unwrap();
    let reports = temp.path().join("reports");
    let mut command = cmd();
    command.args(["-i"]).arg(temp.path()).args(["-o"]).arg(&reports);
    disable_all_tools(&mut command);

    command
        .assert()
        .success()
        .stdout(contains("No supported source languages found"))
        .stdout(contains("0 finding(s) aggregated into 0 vulnerability(ies)"))
        .stdout(contains("0 report(s) written"));
    assert!(reports.is_dir());
}

#[test]
fn source_tree_with_no_available_tools_still_succeeds() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(
        temp.path().join("vuln.c"),
        "int main(void) { return 0; }\n",
    )
    .unwrap();
    let mut command = cmd();
    command
        .args(["-i"])
        .arg(temp.path())
        .args(["-o"])
        .arg(temp.path().join("reports"));
    disable_all_tools(&mut command);

    command
        .assert()
        .success()
        .stdout(contains("Languages: c"))
        .stdout(contains("0 finding(s)"));
}

#[test]
fn unknown_disabled_tool_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    cmd()
        .args(["-i"])
        .arg(temp.path())
        .args(["-o"])
        .arg(temp.path().join("reports"))
        .args(["--disable-tool", "lint-o-matic"])
        .assert()
        .failure()
        .stderr(contains("unknown tool `lint-o-matic`"));
}

#[test]
fn disabled_tools_fall_back_to_the_environment() {
    let temp = tempfile::tempdir().unwrap();
    cmd()
        .env("SAST_FUSE_DISABLE_TOOLS", ALL_TOOLS.join(","))
        .args(["-i"])
        .arg(temp.path())
        .args(["-o"])
        .arg(temp.path().join("reports"))
        .assert()
        .success()
        .stdout(contains("0 finding(s)"));
}

#[test]
fn enabling_llm_without_a_url_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    cmd()
        .args(["-i"])
        .arg(temp.path())
        .args(["-o"])
        .arg(temp.path().join("reports"))
        .arg("--enable-llm")
        .assert()
        .failure()
        .stderr(contains("requires --llm-url or SAST_FUSE_LLM_URL"));
}
