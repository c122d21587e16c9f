use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn resources_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources")
}

fn rusty_dblp() -> Command {
    let mut cmd = Command::cargo_bin("rusty-dblp").unwrap();
    cmd.env_remove("RUSTY_DBLP_RESOURCES");
    cmd
}

#[test]
fn test_validate_accepts_the_sample() {
    rusty_dblp()
        .arg("-r")
        .arg(resources_dir())
        .args(["validate", "sample.xml", "sample.dtd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sample.xml: valid (4 records)"));
}

#[test]
fn test_validate_fails_where_lenient_loading_succeeds() {
    let dir = TempDir::new().unwrap();
    fs::copy(resources_dir().join("sample.dtd"), dir.path().join("sample.dtd")).unwrap();
    fs::write(
        dir.path().join("extra.xml"),
        r#"<dblp><www key="w"><author>A</author><homepage>x</homepage></www></dblp>"#,
    )
    .unwrap();

    rusty_dblp()
        .arg("-r")
        .arg(dir.path())
        .args(["summary", "extra.xml", "sample.dtd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("undeclared (kept): homepage"));

    rusty_dblp()
        .arg("-r")
        .arg(dir.path())
        .args(["validate", "extra.xml", "sample.dtd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not validate"));
}

#[test]
fn test_validate_missing_resource_fails() {
    rusty_dblp()
        .arg("-r")
        .arg(resources_dir())
        .args(["validate", "missing.xml", "sample.dtd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_show_prints_one_record() {
    rusty_dblp()
        .arg("-r")
        .arg(resources_dir())
        .args(["show", "sample.xml", "sample.dtd", "conf/icse/2019"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"proceedings\""));
}
