use std::io::Write;
use std::process::Command;

use crate::common::{assert_contains, init_test_logging};

fn relayd() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_relayd"));
    for var in [
        "RELAY_CONFIG",
        "RELAY_SITE",
        "RELAY_TOKEN",
        "RELAY_TOKEN_FILE",
        "RELAY_COORDINATOR_URL",
        "RELAY_PORT",
    ] {
        command.env_remove(var);
    }
    command
}

#[test]
fn test_relayd_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_relayd_help_includes_description");

    let output = relayd()
        .arg("--help")
        .output()
        .expect("Failed to run relayd --help");

    assert!(output.status.success(), "relayd --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "Replay intercepted requests against a local server");
    assert_contains(&stdout, "--verify-tls");
    assert_contains(&stdout, "--replay-timeout-ms");
    assert_contains(&stdout, "--events");

    crate::test_log!("TEST PASS: test_relayd_help_includes_description");
}

#[test]
fn test_missing_site_is_rejected_before_connecting() {
    init_test_logging();

    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(file, "[target]\nport = 3000").unwrap();

    let output = relayd()
        .arg("--config")
        .arg(file.path())
        .arg("--no-control")
        .output()
        .expect("Failed to run relayd");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "Invalid configuration");
    assert_contains(&stderr, "target.site is required");
}

#[test]
fn test_invalid_provider_flag_is_rejected() {
    init_test_logging();

    let output = relayd()
        .args(["--provider", "ftp", "--site", "shop.example.com"])
        .output()
        .expect("Failed to run relayd");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "unknown provider 'ftp'");
}
