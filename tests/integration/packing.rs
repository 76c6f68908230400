use anyhow::Result;
use serde_json::json;

use crate::common::{CompileLog, build};
use wsbuild::core::BuilderError;
use wsbuild::test_utils::TestWorkspace;

fn three_modules() -> Result<TestWorkspace> {
    let ws = TestWorkspace::new(&["ModuleA", "ModuleB", "ModuleC"])?;
    ws.write_source("ModuleA/a.js", "define('ModuleA/a', ['ModuleB/b'], function () { return 'a'; });")?;
    ws.write_source("ModuleB/b.js", "define('ModuleB/b', [], function () { return 'b'; });")?;
    ws.write_source("ModuleC/c.js", "define('ModuleC/c', ['ModuleB/b'], function () { return 'c'; });")?;
    Ok(ws)
}

#[tokio::test]
async fn test_priority_bundle_wins_contended_module() -> Result<()> {
    let ws = three_modules()?;
    ws.write_source(
        "ModuleC/second.package.json",
        r#"{ "include": ["ModuleC/*", "ModuleB/*"] }"#,
    )?;
    ws.write_source(
        "ModuleA/first.package.json",
        r#"{ "include": ["ModuleA/*", "ModuleB/*"], "priority": true }"#,
    )?;

    let outcome = build(ws.config(), &CompileLog::default()).await?;
    assert_eq!(outcome.bundles, 2);

    let first = ws.read_output("ModuleA/first.package.min.js")?;
    let b = first.find("define('ModuleB/b'").expect("b packed into the priority bundle");
    let a = first.find("define('ModuleA/a'").expect("a packed into the priority bundle");
    assert!(b < a, "dependencies come first");

    let second = ws.read_output("ModuleC/second.package.min.js")?;
    assert!(second.contains("define('ModuleC/c'"));
    assert!(!second.contains("define('ModuleB/b'"), "claimed module is not packed twice");

    let routes = ws.read_output_json(".builder/bundlesRoute.json")?;
    assert_eq!(routes["ModuleB/b"], "ModuleA/first.package.min");
    assert_eq!(routes["ModuleC/c"], "ModuleC/second.package.min");

    let owner_routes = ws.read_output_json("ModuleC/.builder/bundlesRoute.json")?;
    assert_eq!(owner_routes, json!({ "ModuleC/c": "ModuleC/second.package.min" }));

    let intersects = ws.read_output_json("ModuleB/.builder/customPackIntersects.json")?;
    assert_eq!(
        intersects,
        json!({
            "ModuleB/b": {
                "winner": "ModuleA/first.package.min",
                "losers": ["ModuleC/second.package.min"]
            }
        })
    );
    Ok(())
}

#[tokio::test]
async fn test_stylesheets_are_rebased_and_stubbed() -> Result<()> {
    let ws = TestWorkspace::new(&["Controls"])?;
    ws.write_source("Controls/Button.js", "define('Controls/Button', ['css!Controls/Button'], function () {});")?;
    ws.write_source("Controls/Button.less", ".button { background: url(img/b.png); }")?;
    ws.write_source("Controls/controls.package.json", r#"{ "include": ["Controls/*"] }"#)?;

    build(ws.config(), &CompileLog::default()).await?;

    let css = ws.read_output("Controls/controls.package.min.css")?;
    assert!(css.contains("url(/Controls/img/b.png)"), "got: {css}");
    let js = ws.read_output("Controls/controls.package.min.js")?;
    assert!(js.contains("define('css!Controls/Button',['css!Controls/controls.package'],'');"));

    let bundles = ws.read_output_json(".builder/bundles.json")?;
    let members = bundles["Controls/controls.package.min"].as_array().cloned().unwrap_or_default();
    assert!(members.contains(&json!("Controls/Button")));
    assert!(members.contains(&json!("css!Controls/Button")));
    Ok(())
}

#[tokio::test]
async fn test_libraries_are_listed_per_module() -> Result<()> {
    let ws = TestWorkspace::new(&["Lib"])?;
    ws.write_source(
        "Lib/lib.js",
        "define('Lib/_private/a', [], function () {});\n\
         define('Lib/lib', ['Lib/_private/a'], function () {});",
    )?;

    build(ws.config(), &CompileLog::default()).await?;

    let libraries = ws.read_output_json("Lib/.builder/libraries.json")?;
    assert_eq!(libraries, json!({ "Lib/lib": ["Lib/_private/a"] }));
    Ok(())
}

#[tokio::test]
async fn test_bundle_removed_with_its_specification() -> Result<()> {
    let ws = three_modules()?;
    ws.write_source("ModuleA/first.package.json", r#"{ "include": ["ModuleA/*"] }"#)?;
    let log = CompileLog::default();

    build(ws.config(), &log).await?;
    assert!(ws.output_exists("ModuleA/first.package.min.js"));

    ws.remove_source("ModuleA/first.package.json")?;
    let outcome = build(ws.config(), &log).await?;

    assert_eq!(outcome.bundles, 0);
    assert!(!ws.output_exists("ModuleA/first.package.min.js"));
    assert!(!ws.output_exists(".builder/bundlesRoute.json"));
    Ok(())
}

#[tokio::test]
async fn test_specification_error_aborts_the_run() -> Result<()> {
    let ws = three_modules()?;
    ws.write_source("ModuleA/broken.package.json", r#"{ "exclude": ["ModuleA/a"] }"#)?;
    let log = CompileLog::default();

    let err = build(ws.config(), &log).await.unwrap_err();

    assert!(matches!(err.downcast_ref::<BuilderError>(), Some(BuilderError::MissingInclude { .. })));
    assert!(!ws.cache_dir().join(wsbuild::constants::LOCK_FILE).exists(), "lock released on abort");
    assert!(ws.cache_dir().join(wsbuild::constants::REPORT_FILE).exists(), "report written on abort");

    log.take();
    let _ = build(ws.config(), &log).await;
    assert_eq!(log.calls(), 4, "an aborted run does not persist the cache");
    Ok(())
}

#[tokio::test]
async fn test_packing_disabled() -> Result<()> {
    let ws = three_modules()?;
    ws.write_source("ModuleA/first.package.json", r#"{ "include": ["ModuleA/*"] }"#)?;
    let mut config = ws.config();
    config.custom_pack = false;

    let outcome = build(config, &CompileLog::default()).await?;

    assert_eq!(outcome.bundles, 0);
    assert!(ws.output_exists("ModuleA/first.package.json"));
    assert!(!ws.output_exists("ModuleA/first.package.min.js"));
    Ok(())
}

#[tokio::test]
async fn test_spec_writing_outside_output_root_fails() -> Result<()> {
    let ws = three_modules()?;
    ws.write_source(
        "ModuleA/escape.package.json",
        r#"{ "include": ["ModuleA/*"], "output": "../../escaped.package.min" }"#,
    )?;

    let outcome = build(ws.config(), &CompileLog::default()).await?;

    assert_eq!(outcome.failed_files, vec!["ModuleA/escape.package.json"]);
    assert_eq!(outcome.bundles, 0);
    assert!(!ws.root().join("escaped.package.min.js").exists());
    assert!(!ws.root().parent().is_some_and(|p| p.join("escaped.package.min.js").exists()));
    assert!(!ws.output_exists("ModuleA/escape.package.json"), "a rejected spec is not copied");
    Ok(())
}
