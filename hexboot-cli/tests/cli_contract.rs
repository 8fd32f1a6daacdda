//! Integration tests for core CLI contract behavior.
//!
//! These run without hardware: they cover argument handling, help output,
//! exit codes, and stdout/stderr separation.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("hexboot")
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hexboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("hexboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hexboot"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_documents_the_transfer_options() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--flash-baud")
                .and(predicate::str::contains("--no-ack"))
                .and(predicate::str::contains("--reboot"))
                .and(predicate::str::contains("--monitor")),
        );
}

#[test]
fn missing_port_fails_with_message() {
    let mut cmd = cli_cmd();
    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no serial port specified"));
}

#[test]
fn exit_code_two_for_unknown_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz").assert().failure().code(2);
}

#[test]
fn exit_code_two_for_conflicting_fast_flags() {
    let mut cmd = cli_cmd();
    cmd.args(["COM3", "--fast", "--no-fast"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--no-fast"));
}

#[test]
fn exit_code_two_for_conflicting_go_flags() {
    let mut cmd = cli_cmd();
    cmd.args(["COM3", "--go", "--no-go"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn unopenable_port_fails_with_open_error() {
    let dir = tempdir().expect("tempdir should be created");
    let hex = dir.path().join("app.hex");
    fs::write(&hex, b":00000001FF\r\n").expect("write hex file");

    let mut cmd = cli_cmd();
    cmd.arg("definitely-not-a-serial-port")
        .arg(&hex)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("open"));
}

#[test]
fn conflicting_link_policy_is_rejected_before_opening() {
    // Binary mode is mandatory on an unreliable link; disabling it must
    // fail without ever touching a port.
    let mut cmd = cli_cmd();
    cmd.args([
        "definitely-not-a-serial-port",
        "--unreliable-link",
        "--no-fast",
    ])
    .arg("--go")
    .assert()
    .failure()
    .code(1)
    .stderr(predicate::str::contains("configuration conflict"));
}

#[test]
fn completions_write_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["--completions", "bash"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty())
        .stdout(predicate::str::contains("hexboot"));
}

#[test]
fn option_terminator_allows_dash_prefixed_operand() {
    // After `--` a dash-prefixed name is a port operand, not a flag, so
    // the run proceeds to the (failing) port open instead of a usage
    // error.
    let mut cmd = cli_cmd();
    cmd.arg("--")
        .arg("-weird-port-name")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("open"));
}

#[test]
fn colors_disabled_when_not_tty() {
    let mut cmd = cli_cmd();
    let output = cmd.arg("--help").assert().success().get_output().clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(
        !stdout.contains("\x1b["),
        "colors should be disabled in non-TTY mode"
    );
}
