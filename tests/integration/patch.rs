use anyhow::Result;

use crate::common::{CompileLog, build};
use wsbuild::report::{BuildReport, Level};
use wsbuild::test_utils::TestWorkspace;
use wsbuild::utils::read_json_file;

fn workspace() -> Result<TestWorkspace> {
    let ws = TestWorkspace::new(&["Controls", "Types"])?;
    ws.write_source("Controls/Button.js", "define('Controls/Button', ['Types/Int'], function () { return 1; });")?;
    ws.write_source("Controls/Input.js", "define('Controls/Input', [], function () { return 1; });")?;
    ws.write_source("Types/Int.js", "define('Types/Int', [], function () { return 1; });")?;
    Ok(ws)
}

#[tokio::test]
async fn test_patch_build_only_touches_listed_modules() -> Result<()> {
    let ws = workspace()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    let button = "define('Controls/Button', ['Types/Int'], function () { return 2; });";
    let int = "define('Types/Int', [], function () { return 2; });";
    ws.write_source("Controls/Button.js", button)?;
    ws.write_source("Types/Int.js", int)?;

    let mut patch = ws.config();
    patch.modules_for_patch = vec!["Types".to_string()];
    let outcome = build(patch, &log).await?;

    assert!(!outcome.first_build);
    assert_eq!(log.take(), vec!["Types/Int.js"]);
    assert_eq!(ws.read_output("Types/Int.js")?, int);
    assert!(ws.read_output("Controls/Button.js")?.contains("return 1;"), "other modules are left alone");

    build(ws.config(), &log).await?;
    assert_eq!(log.take(), vec!["Controls/Button.js"], "skipped changes are picked up by the next full build");
    assert_eq!(ws.read_output("Controls/Button.js")?, button);
    Ok(())
}

#[tokio::test]
async fn test_patch_build_reconciles_only_listed_modules() -> Result<()> {
    let ws = workspace()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;

    ws.remove_source("Controls/Input.js")?;
    ws.remove_source("Types/Int.js")?;

    let mut patch = ws.config();
    patch.modules_for_patch = vec!["Types".to_string()];
    let outcome = build(patch, &log).await?;

    assert_eq!(outcome.removed_sources, vec!["Types/Int.js"]);
    assert!(!ws.output_exists("Types/Int.js"));
    assert!(ws.output_exists("Controls/Input.js"));
    let graph = ws.persisted_graph()?;
    assert!(graph.has_node("Controls/Input"));
    assert!(!graph.has_node("Types/Int"));

    let outcome = build(ws.config(), &log).await?;
    assert_eq!(outcome.removed_sources, vec!["Controls/Input.js"]);
    assert!(!ws.output_exists("Controls/Input.js"));
    Ok(())
}

#[tokio::test]
async fn test_patch_without_cache_builds_everything() -> Result<()> {
    let ws = workspace()?;
    let log = CompileLog::default();
    let mut patch = ws.config();
    patch.modules_for_patch = vec!["Types".to_string()];

    let outcome = build(patch, &log).await?;

    assert!(outcome.first_build);
    assert_eq!(log.take().len(), 3);
    let report: BuildReport = read_json_file(&ws.cache_dir().join(wsbuild::constants::REPORT_FILE))?;
    assert!(
        report
            .diagnostics()
            .iter()
            .any(|d| d.level == Level::Warning && d.message.contains("Patch build requested"))
    );
    Ok(())
}
