use assert_cmd::Command;
use predicates::prelude::*;

/// Check if running as root
fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[test]
fn test_help_command() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("macvlan network namespace"))
        .stdout(predicate::str::contains("--ip"))
        .stdout(predicate::str::contains("--interface"))
        .stdout(predicate::str::contains("--command"))
        .stdout(predicate::str::contains("--gw"))
        .stdout(predicate::str::contains("--latency"))
        .stdout(predicate::str::contains("--loss"));
}

#[test]
fn test_version_command() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("macns"));
}

#[test]
fn test_invalid_flag() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .arg("--bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}

#[test]
fn test_invalid_address() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .args(["--ip", "192.168.1.11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_empty_command_rejected() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .args(["--command", "   "])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_long_link_name_rejected() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .args(["--link-name", "this-name-is-too-long"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("link name"));
}

#[test]
fn test_requires_root() {
    if is_root() {
        return;
    }

    Command::new(env!("CARGO_BIN_EXE_macns"))
        .args(["--command", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Must run as root"));
}

#[test]
#[ignore] // Requires root and an uplink with a default gateway
fn test_runs_command_in_namespace() {
    Command::new(env!("CARGO_BIN_EXE_macns"))
        .args(["--command", "ip -o link show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("peth0"))
        .stdout(predicate::str::contains("lo"));
}
