use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

use wsbuild::test_utils::TestWorkspace;

fn write_config(ws: &TestWorkspace) -> Result<PathBuf> {
    let path = ws.root().join("wsbuild.json");
    std::fs::write(
        &path,
        r#"{
  "cache": "cache",
  "output": "out",
  "modules": [
    { "name": "Controls", "path": "src/Controls" }
  ]
}"#,
    )?;
    Ok(path)
}

fn wsbuild() -> Command {
    let mut cmd = Command::cargo_bin("wsbuild").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_build_command_writes_outputs() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Button.js", "define('Controls/Button', [], function () {});")?;
    let config = write_config(&ws)?;

    wsbuild()
        .args(["build", "--no-progress", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Full build complete"));
    assert!(ws.output_exists("Controls/Button.js"));

    wsbuild()
        .args(["build", "--no-progress", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 compiled, 1 unchanged"));
    Ok(())
}

#[test]
fn test_build_exits_one_when_a_source_fails() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    std::fs::write(ws.source_path("Controls/Broken.js"), [0xff, 0xfe])?;
    let config = write_config(&ws)?;

    wsbuild()
        .args(["build", "--no-progress", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Controls/Broken.js"));
    Ok(())
}

#[test]
fn test_unknown_patch_module_is_a_config_error() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    let config = write_config(&ws)?;

    wsbuild()
        .args(["build", "--patch", "Nope", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nope"));
    Ok(())
}

#[test]
fn test_cache_info_and_clean() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Button.js", "define('Controls/Button', [], function () {});")?;
    let config = write_config(&ws)?;

    wsbuild().args(["build", "-q", "--config"]).arg(&config).assert().success();

    wsbuild()
        .args(["cache", "info", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("sources:     1"))
        .stdout(predicate::str::contains("incremental"));

    wsbuild().args(["cache", "clean", "--config"]).arg(&config).assert().success();
    assert!(!ws.cache_dir().exists());
    Ok(())
}

#[test]
fn test_missing_config_file_fails() {
    wsbuild()
        .args(["build", "--config", "/definitely/not/here.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("build config"));
}
