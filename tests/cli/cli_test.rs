//! Runs the `pbchat` binary end to end.

use std::fs;
use std::path::Path;

use assert_cmd::Command;

const VALID: &str = r#"
[[accounts]]
name = "work"
auto_login = true
host = "chat.example.org"
port = 8787
identity = "alice"
password = "pw"

[[accounts.services]]
service_type = "words"
service_name = "words"
perspective_name = "alice"

[[accounts.services]]
service_type = "reality"
service_name = "stage"
perspective_name = "alice"
"#;

/// The binary with an isolated home directory and plain log output.
fn pbchat(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pbchat").expect("binary built");
    cmd.env("HOME", home)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1");
    cmd
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn services_lists_registered_types() {
    let home = tempfile::tempdir().expect("temp dir");
    let output = pbchat(home.path())
        .arg("services")
        .output()
        .expect("runs");

    assert!(output.status.success());
    let stderr = stderr_of(&output);
    assert!(stderr.contains("words"));
    assert!(stderr.contains("reality"));
}

#[test]
fn check_accepts_valid_config() {
    let home = tempfile::tempdir().expect("temp dir");
    let config = home.path().join("config.toml");
    assert!(fs::write(&config, VALID).is_ok());

    let output = pbchat(home.path())
        .arg("check")
        .arg("--config")
        .arg(&config)
        .output()
        .expect("runs");

    let stderr = stderr_of(&output);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("configuration valid"));
    assert!(stderr.contains("will not attach"));
}

#[test]
fn check_rejects_unknown_service_type() {
    let home = tempfile::tempdir().expect("temp dir");
    let config = home.path().join("config.toml");
    assert!(fs::write(&config, VALID.replace("\"reality\"", "\"video\"")).is_ok());

    pbchat(home.path())
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn check_reads_default_location() {
    let home = tempfile::tempdir().expect("temp dir");
    let dir = home.path().join(".pbchat");
    assert!(fs::create_dir_all(&dir).is_ok());
    assert!(fs::write(dir.join("config.toml"), VALID).is_ok());

    pbchat(home.path()).arg("check").assert().success();
}

#[test]
fn check_fails_on_unresolvable_password() {
    let home = tempfile::tempdir().expect("temp dir");
    let config = home.path().join("config.toml");
    let body = VALID.replace(
        "password = \"pw\"",
        "password_env = \"PBCHAT_CLI_TEST_UNSET_5d1e\"",
    );
    assert!(fs::write(&config, body).is_ok());

    pbchat(home.path())
        .args(["check", "--config"])
        .arg(&config)
        .env_remove("PBCHAT_CLI_TEST_UNSET_5d1e")
        .assert()
        .failure();
}

#[test]
fn demo_runs_scripted_session() {
    let home = tempfile::tempdir().expect("temp dir");
    let output = pbchat(home.path()).arg("demo").output().expect("runs");

    let stderr = stderr_of(&output);
    assert!(output.status.success(), "stderr: {stderr}");
    assert!(stderr.contains("you joined"));
    assert!(stderr.contains("* shipping on friday"));
    assert!(stderr.contains("topic by alice: release planning"));
    assert!(stderr.contains("demo finished"));
}
