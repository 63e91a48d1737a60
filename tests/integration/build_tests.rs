// Integration tests for one-shot production and development builds
mod common;

use common::{config, project, read_tree, service, FakeToolchain};
use kiln::core::Mode;
use kiln::infrastructure::processors::validate_script;
use kiln::utils::{BuildError, KilnError, ResolutionError};
use std::fs;
use std::path::Path;

#[tokio::test]
async fn test_production_build_writes_bundle_styles_binary_and_document() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let toolchain = FakeToolchain::new();

    let report = service(&config(&root, Mode::Production), &toolchain).build().await.unwrap();
    assert_eq!(toolchain.calls(), 1);
    assert!(report.modules >= 5);

    let dist = root.join("dist");
    let bundle = fs::read_to_string(dist.join("main.bundle.js")).unwrap();
    let css = fs::read_to_string(dist.join("main.css")).unwrap();
    let html = fs::read_to_string(dist.join("index.html")).unwrap();

    assert_eq!(fs::read(dist.join("app.wasm")).unwrap(), vec![0, b'a', b's', b'm', 1]);
    assert!(bundle.contains("/app.wasm"), "binary reference rewritten: {}", bundle);
    assert!(bundle.contains("hello"));
    assert!(!bundle.contains("import "), "no module syntax left: {}", bundle);
    assert!(!dist.join("main.bundle.js.map").exists());

    assert!(css.contains(".app{"), "{}", css);
    assert!(!css.contains("unused-widget"), "unreferenced class removed: {}", css);

    assert!(html.contains(r#"src="/main.bundle.js""#), "{}", html);
    assert!(html.contains(r#"href="/main.css""#), "{}", html);
    assert!(html.contains(r#"href="/app.wasm""#), "{}", html);
    assert!(!html.contains("WebSocket"));

    let names: Vec<&str> = report.files.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"main.bundle.js"));
    assert!(names.contains(&"index.html"));
}

#[tokio::test]
async fn test_static_files_are_copied_byte_for_byte() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();

    service(&config(&root, Mode::Production), &FakeToolchain::new()).build().await.unwrap();

    let dist = root.join("dist");
    assert_eq!(
        fs::read(dist.join("img/logo.png")).unwrap(),
        fs::read(root.join("web/static/img/logo.png")).unwrap()
    );
    assert_eq!(
        fs::read_to_string(dist.join("robots.txt")).unwrap(),
        "User-agent: *\nDisallow:\n"
    );
}

#[tokio::test]
async fn test_repeated_builds_are_byte_identical() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let config = config(&root, Mode::Production);

    service(&config, &FakeToolchain::new()).build().await.unwrap();
    let first = read_tree(&root.join("dist"));

    service(&config, &FakeToolchain::new()).build().await.unwrap();
    let second = read_tree(&root.join("dist"));

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_toolchain_failure_writes_nothing() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let toolchain = FakeToolchain::new();
    toolchain.set_failing(true);

    let err = service(&config(&root, Mode::Production), &toolchain).build().await.unwrap_err();

    assert!(err.is_toolchain_failure());
    assert!(err.to_string().contains("101"), "{}", err);
    assert!(!root.join("dist").exists());
}

#[tokio::test]
async fn test_missing_import_is_reported_with_importer() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    fs::write(root.join("web/greet.js"), "import { x } from './missing.js';\nexport const greet = x;\n").unwrap();

    let err = service(&config(&root, Mode::Production), &FakeToolchain::new())
        .build()
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("./missing.js"), "{}", message);
    assert!(message.contains("greet.js"), "{}", message);
    assert!(!root.join("dist").exists());
}

#[tokio::test]
async fn test_ambiguous_import_fails_the_build() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    fs::write(root.join("web/theme.css"), ".a {}").unwrap();
    fs::write(root.join("web/theme.scss"), ".a {}").unwrap();
    fs::write(root.join("web/greet.js"), "import './theme';\nexport function greet() {}\n").unwrap();

    let err = service(&config(&root, Mode::Production), &FakeToolchain::new())
        .build()
        .await
        .unwrap_err();

    match &err {
        KilnError::Resolution(ResolutionError::Ambiguous { reference, candidates, .. }) => {
            assert_eq!(reference, "./theme");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected ambiguity, got {:?}", other),
    }
    assert!(!root.join("dist").exists());
}

#[tokio::test]
async fn test_import_cycle_and_top_level_await_bundle() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    fs::write(
        root.join("web/greet.js"),
        "import { shout } from './a.js';\nimport { ready } from './ready.js';\nexport function greet(name) {\n  console.log(shout(`hello ${name}`), ready);\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("web/a.js"),
        "import { exclaim } from './b.js';\nexport function shout(s) { return exclaim(s.toUpperCase()); }\nexport const MARK = '!';\n",
    )
    .unwrap();
    fs::write(root.join("web/b.js"), "import { MARK } from './a.js';\nexport function exclaim(s) { return s + MARK; }\n").unwrap();
    fs::write(root.join("web/ready.js"), "export const ready = await Promise.resolve('ready');\n").unwrap();

    let mut config = config(&root, Mode::Production);
    config.minify = false;
    service(&config, &FakeToolchain::new()).build().await.unwrap();

    let bundle = fs::read_to_string(root.join("dist/main.bundle.js")).unwrap();
    assert!(bundle.starts_with("const __kiln_m"), "{}", bundle);
    assert!(bundle.contains("await (async function () {"), "{}", bundle);
    assert!(!bundle.contains("} = __kiln_m"), "no eager destructuring: {}", bundle);
    validate_script(&bundle, Path::new("main.bundle.js")).unwrap();

    config.minify = true;
    service(&config, &FakeToolchain::new()).build().await.unwrap();
    let minified = fs::read_to_string(root.join("dist/main.bundle.js")).unwrap();
    validate_script(&minified, Path::new("main.bundle.js")).unwrap();
}

#[tokio::test]
async fn test_static_file_colliding_with_stylesheet_fails() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    fs::write(root.join("web/static/main.css"), "body{}").unwrap();

    let err = service(&config(&root, Mode::Production), &FakeToolchain::new())
        .build()
        .await
        .unwrap_err();

    assert!(
        matches!(err, KilnError::Build(BuildError::FilenameCollision { .. })),
        "{:?}",
        err
    );
    assert!(!root.join("dist").exists());
}

#[tokio::test]
async fn test_unminified_production_build_writes_external_maps() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let mut config = config(&root, Mode::Production);
    config.minify = false;
    config.source_maps = true;

    service(&config, &FakeToolchain::new()).build().await.unwrap();

    let dist = root.join("dist");
    let bundle = fs::read_to_string(dist.join("main.bundle.js")).unwrap();
    assert!(bundle.trim_end().ends_with("//# sourceMappingURL=main.bundle.js.map"), "{}", bundle);

    let map: serde_json::Value = serde_json::from_str(&fs::read_to_string(dist.join("main.bundle.js.map")).unwrap()).unwrap();
    assert_eq!(map["version"], 3);
    assert_eq!(map["file"], "main.bundle.js");
    let sources: Vec<&str> = map["sources"].as_array().unwrap().iter().filter_map(|s| s.as_str()).collect();
    assert!(sources.iter().any(|s| s.ends_with("greet.js")), "{:?}", sources);

    // Unused-rule removal is part of minification
    assert!(fs::read_to_string(dist.join("main.css")).unwrap().contains("unused-widget"));
}

#[tokio::test]
async fn test_public_base_path_prefixes_document_references() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let mut config = config(&root, Mode::Production);
    config.public_base_path = "/app/".to_string();

    service(&config, &FakeToolchain::new()).build().await.unwrap();

    let html = fs::read_to_string(root.join("dist/index.html")).unwrap();
    assert!(html.contains(r#"src="/app/main.bundle.js""#), "{}", html);
    assert!(html.contains(r#"href="/app/app.wasm""#), "{}", html);
}

#[tokio::test]
async fn test_development_build_links_per_style_chunks() {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();

    service(&config(&root, Mode::Development), &FakeToolchain::new()).build().await.unwrap();

    let files = read_tree(&root.join("dist"));
    let styles: Vec<&String> = files.keys().filter(|k| k.starts_with("__kiln/styles/")).collect();
    assert_eq!(styles.len(), 1, "{:?}", files.keys().collect::<Vec<_>>());
    assert!(styles[0].ends_with("-app.css"));

    let html = String::from_utf8(files["index.html"].clone()).unwrap();
    assert!(html.contains("data-kiln-style="), "{}", html);
    assert!(html.contains("WebSocket"), "{}", html);
    assert!(!files.contains_key("main.css"));

    let bundle = String::from_utf8(files["main.bundle.js"].clone()).unwrap();
    assert!(bundle.contains("sourceMappingURL=data:application/json;base64,"));
}
