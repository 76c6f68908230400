use anyhow::Result;

use crate::common::{CompileLog, build};
use wsbuild::core::BuilderError;
use wsbuild::report::{BuildReport, Level};
use wsbuild::test_utils::{TestWorkspace, init_test_logging};
use wsbuild::utils::read_json_file;

const BUTTON_JS: &str = "define('Controls/Button', ['css!Controls/Button'], function () { return 1; });";
const INPUT_JS: &str = "define('Controls/Input', ['Controls/Button'], function (Button) { return Button; });";

fn controls() -> Result<TestWorkspace> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Button.js", BUTTON_JS)?;
    ws.write_source("Controls/Button.less", "@import '_vars';\n.button { color: @main; }")?;
    ws.write_source("Controls/_vars.less", "@main: red;")?;
    ws.write_source("Controls/Input.js", INPUT_JS)?;
    Ok(ws)
}

fn report(ws: &TestWorkspace) -> Result<BuildReport> {
    read_json_file(&ws.cache_dir().join(wsbuild::constants::REPORT_FILE))
}

#[tokio::test]
async fn test_first_build_then_nothing_to_do() -> Result<()> {
    init_test_logging(None);
    let ws = controls()?;
    let log = CompileLog::default();

    let first = build(ws.config(), &log).await?;
    assert!(first.first_build);
    assert_eq!(first.processed, 4);
    assert_eq!(log.take().len(), 4);
    assert_eq!(ws.read_output("Controls/Button.js")?, BUTTON_JS);
    assert!(ws.read_output("Controls/Button.css")?.contains("@main: red;"));

    let second = build(ws.config(), &log).await?;
    assert!(!second.first_build);
    assert_eq!(second.processed, 0);
    assert_eq!(second.unchanged, 4);
    assert_eq!(log.calls(), 0, "unchanged sources must not reach a compiler");
    assert_eq!(second.exit_code(), 0);
    Ok(())
}

#[tokio::test]
async fn test_modified_source_is_the_only_one_rebuilt() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    let updated = "define('Controls/Input', ['Controls/Button'], function (Button) { return 2; });";
    ws.write_source("Controls/Input.js", updated)?;
    let outcome = build(ws.config(), &log).await?;

    assert_eq!(log.take(), vec!["Controls/Input.js"]);
    assert_eq!(outcome.processed, 1);
    assert_eq!(ws.read_output("Controls/Input.js")?, updated);
    Ok(())
}

#[tokio::test]
async fn test_rebuilt_module_keeps_links_of_unchanged_dependents() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;

    ws.write_source("Controls/Button.js", BUTTON_JS)?;
    build(ws.config(), &log).await?;

    let graph = ws.persisted_graph()?;
    assert!(graph.has_node("Controls/Button"));
    assert_eq!(graph.dependencies_of("Controls/Input"), ["Controls/Button".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_imported_stylesheet_change_rebuilds_importer() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    ws.write_source("Controls/_vars.less", "@main: blue;")?;
    build(ws.config(), &log).await?;

    assert_eq!(log.take(), vec!["Controls/Button.less", "Controls/_vars.less"]);
    assert!(ws.read_output("Controls/Button.css")?.contains("@main: blue;"));
    Ok(())
}

#[tokio::test]
async fn test_deleted_source_removes_outputs_and_nodes() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    assert!(ws.persisted_graph()?.has_node("Controls/Input"));

    ws.remove_source("Controls/Input.js")?;
    let outcome = build(ws.config(), &log).await?;

    assert_eq!(outcome.removed_sources, vec!["Controls/Input.js"]);
    assert!(outcome.deleted_outputs.contains(&"Controls/Input.js".to_string()));
    assert!(!ws.output_exists("Controls/Input.js"));
    assert!(ws.output_exists("Controls/Button.js"));
    let graph = ws.persisted_graph()?;
    assert!(!graph.has_node("Controls/Input"));
    assert!(graph.has_node("Controls/Button"));
    Ok(())
}

#[tokio::test]
async fn test_renamed_source_moves_output_and_node() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Old.js", "define([], function () { return 'old'; });")?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    assert!(ws.persisted_graph()?.has_node("Controls/Old"));

    ws.rename_source("Controls/Old.js", "Controls/List/New.js")?;
    build(ws.config(), &log).await?;

    assert!(!ws.output_exists("Controls/Old.js"));
    assert!(ws.output_exists("Controls/List/New.js"));
    let graph = ws.persisted_graph()?;
    assert!(!graph.has_node("Controls/Old"));
    assert!(graph.has_node("Controls/List/New"));

    let module_graph = ws.read_output_json("Controls/module-dependencies.json")?;
    assert!(module_graph["nodes"].get("Controls/Old").is_none());
    assert_eq!(module_graph["nodes"]["Controls/List/New"]["path"], "Controls/List/New.js");
    Ok(())
}

#[tokio::test]
async fn test_missing_output_is_regenerated() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    std::fs::remove_file(ws.output_dir().join("Controls/Button.js"))?;
    build(ws.config(), &log).await?;

    assert_eq!(log.take(), vec!["Controls/Button.js"]);
    assert_eq!(ws.read_output("Controls/Button.js")?, BUTTON_JS);
    Ok(())
}

#[tokio::test]
async fn test_failed_source_is_reported_and_retried() -> Result<()> {
    let ws = controls()?;
    std::fs::write(ws.source_path("Controls/Broken.js"), [0xff, 0xfe, 0x00])?;
    let log = CompileLog::default();

    let first = build(ws.config(), &log).await?;
    assert_eq!(first.failed_files, vec!["Controls/Broken.js"]);
    assert_eq!(first.exit_code(), 1);
    assert!(ws.output_exists("Controls/Button.js"), "other sources still build");
    let errors: Vec<_> = report(&ws)?
        .diagnostics()
        .iter()
        .filter(|d| d.level == Level::Error)
        .cloned()
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file.as_deref(), Some("Controls/Broken.js"));
    assert_eq!(errors[0].module.as_deref(), Some("Controls"));
    log.take();

    let second = build(ws.config(), &log).await?;
    assert_eq!(log.take(), vec!["Controls/Broken.js"], "a failed source is retried even if unchanged");
    assert_eq!(second.failed_files, vec!["Controls/Broken.js"]);

    ws.write_source("Controls/Broken.js", "define([], function () {});")?;
    let third = build(ws.config(), &log).await?;
    assert!(third.failed_files.is_empty());
    assert_eq!(third.exit_code(), 0);
    assert!(ws.output_exists("Controls/Broken.js"));
    log.take();

    build(ws.config(), &log).await?;
    assert_eq!(log.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_empty_stylesheet_warns_and_writes_empty_output() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Empty.less", "")?;
    let log = CompileLog::default();

    let outcome = build(ws.config(), &log).await?;

    assert!(outcome.failed_files.is_empty());
    assert_eq!(ws.read_output("Controls/Empty.css")?, "");
    let report = report(&ws)?;
    assert!(report.diagnostics().iter().any(|d| {
        d.level == Level::Warning && d.message == "empty file" && d.file.as_deref() == Some("Controls/Empty.less")
    }));
    Ok(())
}

#[tokio::test]
async fn test_minified_siblings_are_reused() -> Result<()> {
    let ws = controls()?;
    let mut config = ws.config();
    config.minimize = true;
    let log = CompileLog::default();

    build(config.clone(), &log).await?;
    assert!(ws.output_exists("Controls/Button.min.js"));
    assert!(ws.output_exists("Controls/Button.min.css"));

    ws.remove_source("Controls/Input.js")?;
    build(config, &log).await?;
    assert!(!ws.output_exists("Controls/Input.min.js"));
    assert!(ws.output_exists("Controls/Button.min.js"));
    Ok(())
}

#[tokio::test]
async fn test_changed_parameters_force_full_build() -> Result<()> {
    let ws = controls()?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    let mut config = ws.config();
    config.url_service_path = "/service/".to_string();
    let outcome = build(config, &log).await?;

    assert!(outcome.first_build);
    assert_eq!(log.take().len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_held_lock_aborts_without_touching_outputs() -> Result<()> {
    let ws = controls()?;
    std::fs::create_dir_all(ws.cache_dir())?;
    std::fs::write(ws.cache_dir().join(wsbuild::constants::LOCK_FILE), "4242\n")?;
    let log = CompileLog::default();

    let err = build(ws.config(), &log).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<BuilderError>(), Some(BuilderError::LockHeld { .. })));
    assert_eq!(log.calls(), 0);
    assert!(!ws.output_dir().exists());
    assert!(ws.cache_dir().join(wsbuild::constants::LOCK_FILE).exists(), "a foreign lock is left alone");
    Ok(())
}

#[tokio::test]
async fn test_lock_released_after_run() -> Result<()> {
    let ws = controls()?;
    build(ws.config(), &CompileLog::default()).await?;
    assert!(!ws.cache_dir().join(wsbuild::constants::LOCK_FILE).exists());
    assert!(ws.cache_dir().join(wsbuild::constants::BUILD_TIMINGS_FILE).exists());
    assert!(ws.cache_dir().join(wsbuild::constants::WORKER_POOL_CONFIG_FILE).exists());
    Ok(())
}

struct FailingMinifier;

impl wsbuild::compiler::Minifier for FailingMinifier {
    fn minify(&self, path: &str, text: &str) -> wsbuild::compiler::MinifyOutput {
        wsbuild::compiler::MinifyOutput {
            text: text.to_string(),
            errors: vec![format!("{path}: unterminated string")],
        }
    }
}

#[tokio::test]
async fn test_minification_failure_keeps_unminified_text() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Button.js", BUTTON_JS)?;
    let mut config = ws.config();
    config.minimize = true;
    let mut registry = CompileLog::default().registry()?;
    registry.set_minifier(std::sync::Arc::new(FailingMinifier));

    let outcome = wsbuild::orchestrator::Builder::new(config)?.with_registry(registry).run().await?;

    assert!(outcome.failed_files.is_empty(), "minification problems are warnings");
    assert_eq!(ws.read_output("Controls/Button.min.js")?, BUTTON_JS);
    assert!(report(&ws)?.diagnostics().iter().any(|d| {
        d.level == Level::Warning && d.message.contains("unterminated string")
    }));
    Ok(())
}

#[tokio::test]
async fn test_corrupt_graph_rebuilds_everything_and_packs() -> Result<()> {
    let ws = TestWorkspace::new(&["M"])?;
    ws.write_source("M/a.js", "define('M/a', [], function () { return 'a'; });")?;
    ws.write_source("M/b.js", "define('M/b', ['M/a'], function () { return 'b'; });")?;
    ws.write_source("M/app.package.json", r#"{ "include": ["M/a", "M/b"] }"#)?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    std::fs::write(ws.cache_dir().join(wsbuild::constants::MODULE_DEPENDENCIES_FILE), "{ corrupt")?;
    let outcome = build(ws.config(), &log).await?;

    assert!(outcome.first_build);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(log.take(), vec!["M/a.js", "M/app.package.json", "M/b.js"]);
    assert!(ws.read_output("M/app.package.min.js")?.contains("define('M/b'"));
    assert!(ws.persisted_graph()?.has_node("M/a"), "the graph document is rewritten");

    build(ws.config(), &log).await?;
    assert_eq!(log.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_corrupt_failed_set_still_retries_failed_source() -> Result<()> {
    let ws = controls()?;
    std::fs::write(ws.source_path("Controls/Broken.js"), [0xff, 0xfe, 0x00])?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;
    log.take();

    std::fs::write(ws.cache_dir().join(wsbuild::constants::FILES_WITH_ERRORS_FILE), "[ corrupt")?;
    let outcome = build(ws.config(), &log).await?;

    assert!(log.take().contains(&"Controls/Broken.js".to_string()));
    assert_eq!(outcome.failed_files, vec!["Controls/Broken.js"]);
    assert_eq!(outcome.exit_code(), 1);
    let warnings = report(&ws)?.count(Level::Warning);
    assert!(warnings >= 1, "the corrupt document is reported");
    Ok(())
}

#[tokio::test]
async fn test_second_source_defining_a_module_fails() -> Result<()> {
    let ws = TestWorkspace::new(&["M"])?;
    ws.write_source("M/a.less", ".from-less { color: red; }")?;
    let log = CompileLog::default();
    build(ws.config(), &log).await?;

    ws.write_source("M/a.css", ".from-css { color: blue; }")?;
    let outcome = build(ws.config(), &log).await?;
    assert_eq!(outcome.failed_files, vec!["M/a.css"]);
    assert!(ws.read_output("M/a.css")?.contains(".from-less"));
    let errors: Vec<_> =
        report(&ws)?.diagnostics().iter().filter(|d| d.level == Level::Error).cloned().collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("css!M/a"), "got: {}", errors[0].message);

    ws.remove_source("M/a.css")?;
    let outcome = build(ws.config(), &log).await?;
    assert!(outcome.failed_files.is_empty());
    let graph = ws.persisted_graph()?;
    assert_eq!(graph.get_node("css!M/a").and_then(|n| n.path()), Some("M/a.css"));
    assert!(ws.read_output("M/a.css")?.contains(".from-less"));
    Ok(())
}

#[tokio::test]
async fn test_deleting_the_owner_hands_the_module_to_the_other_source() -> Result<()> {
    let ws = TestWorkspace::new(&["M"])?;
    ws.write_source("M/a.css", ".from-css { color: blue; }")?;
    ws.write_source("M/a.less", ".from-less { color: red; }")?;
    let log = CompileLog::default();

    let first = build(ws.config(), &log).await?;
    assert_eq!(first.failed_files, vec!["M/a.less"]);
    assert!(ws.read_output("M/a.css")?.contains(".from-css"));

    ws.remove_source("M/a.css")?;
    let second = build(ws.config(), &log).await?;
    assert!(second.failed_files.is_empty());
    assert!(ws.read_output("M/a.css")?.contains(".from-less"));
    assert!(ws.persisted_graph()?.has_node("css!M/a"));
    Ok(())
}
