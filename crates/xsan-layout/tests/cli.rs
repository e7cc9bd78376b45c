use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn print_mode_reports_known_platform() {
    Command::cargo_bin("xsan-layout")
        .unwrap()
        .args(["--platform", "x64_48", "--output", "print"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kAsanShadowScale = 3;"))
        .stdout(predicate::str::contains("LoApp"));
}

#[test]
fn unknown_platform_fails_with_nonzero_exit() {
    Command::cargo_bin("xsan-layout")
        .unwrap()
        .args(["--platform", "does-not-exist"])
        .assert()
        .failure();
}

#[test]
fn header_mode_writes_file_into_outdir() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("xsan-layout")
        .unwrap()
        .args([
            "--platform",
            "aarch64_48",
            "--output",
            "header",
            "--outdir",
        ])
        .arg(dir.path())
        .assert()
        .success();

    let header = dir.path().join("xsan_platform_aarch64_48.h");
    assert!(header.exists());
    let contents = std::fs::read_to_string(header).unwrap();
    assert!(contents.contains("struct MappingAarch64_48 {"));
}
