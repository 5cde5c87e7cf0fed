use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn prints_version() {
    let exe = env!("CARGO_BIN_EXE_meme-picker");
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .expect("run meme-picker --version");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout utf8");
    assert!(
        stdout.contains(env!("CARGO_PKG_VERSION")),
        "stdout was: {}",
        stdout.trim()
    );
}

#[test]
fn prints_help() {
    Command::cargo_bin("meme-picker")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Meme Picker"))
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("--version"));
}

#[test]
fn rejects_unknown_flags() {
    Command::cargo_bin("meme-picker")
        .unwrap()
        .arg("--bogus")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown argument: --bogus"));
}
