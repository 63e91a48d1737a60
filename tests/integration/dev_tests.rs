// Integration tests for the dev session: rebuild classification and recovery
mod common;

use common::{config, project, service, FakeToolchain};
use kiln::core::{DevOrchestrator, DevState, Mode, PushEvent, PushKind, WatchEvent};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

struct Session {
    _dir: tempfile::TempDir,
    root: PathBuf,
    toolchain: Arc<FakeToolchain>,
    orchestrator: DevOrchestrator,
    events: broadcast::Receiver<PushEvent>,
}

async fn session() -> Session {
    let dir = project();
    let root = dir.path().canonicalize().unwrap();
    let toolchain = FakeToolchain::new();
    let (tx, events) = broadcast::channel(16);

    let mut orchestrator = DevOrchestrator::new(service(&config(&root, Mode::Development), &toolchain), tx);
    orchestrator.start().await.unwrap();

    Session {
        _dir: dir,
        root,
        toolchain,
        orchestrator,
        events,
    }
}

fn file(session: &Session, name: &str) -> Vec<u8> {
    let files = session.orchestrator.snapshot().current().unwrap();
    files.get(name).unwrap().contents.to_vec()
}

#[tokio::test]
async fn test_initial_build_is_published() {
    let session = session().await;

    assert_eq!(session.orchestrator.state(), DevState::Serving);
    assert_eq!(session.toolchain.calls(), 1);
    let snapshot = session.orchestrator.snapshot();
    let files = snapshot.current().unwrap();
    assert!(files.get("index.html").is_some());
    assert!(files.get("app.wasm").is_some());
    assert!(snapshot.last_error().is_none());
}

#[tokio::test]
async fn test_stylesheet_edit_pushes_style_replacement() {
    let mut session = session().await;
    let bundle_before = file(&session, "main.bundle.js");
    let document_before = file(&session, "index.html");

    let css = session.root.join("web/app.css");
    fs::write(&css, ".app {\n  display: grid;\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![css]).await;

    assert_eq!(events.len(), 1, "{:?}", events);
    assert_eq!(events[0].kind, PushKind::Style);
    let target = events[0].target.clone().unwrap();
    assert!(target.starts_with("/__kiln/styles/") && target.ends_with("-app.css"), "{}", target);

    let name = target.trim_start_matches('/');
    assert!(String::from_utf8(file(&session, name)).unwrap().contains("grid"));
    assert_eq!(file(&session, "main.bundle.js"), bundle_before);
    assert_eq!(file(&session, "index.html"), document_before);
    assert_eq!(session.toolchain.calls(), 1);

    assert_eq!(session.events.recv().await.unwrap(), events[0]);
}

#[tokio::test]
async fn test_stylesheet_import_is_added_then_dropped_without_reload() {
    let mut session = session().await;
    let bundle_before = file(&session, "main.bundle.js");

    let extra = session.root.join("web/extra.css");
    let css = session.root.join("web/app.css");
    fs::write(&extra, ".extra {\n  margin: 0;\n}\n").unwrap();
    fs::write(&css, "@import './extra.css';\n.app {\n  display: flex;\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![extra.clone(), css.clone()]).await;

    assert!(events.iter().all(|e| e.kind == PushKind::Style), "{:?}", events);
    let added = events
        .iter()
        .find(|e| e.target.as_deref().is_some_and(|t| t.ends_with("-extra.css")))
        .unwrap();
    assert!(added.before.as_deref().is_some_and(|b| b.ends_with("-app.css")), "{:?}", added);
    let document = String::from_utf8(file(&session, "index.html")).unwrap();
    assert!(document.contains(added.target.as_deref().unwrap()));
    assert_eq!(file(&session, "main.bundle.js"), bundle_before);

    fs::write(&css, ".app {\n  display: flex;\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![css]).await;

    assert!(events.iter().all(|e| e.kind == PushKind::Style), "{:?}", events);
    assert!(events.iter().any(|e| e.removed && e.target == added.target), "{:?}", events);
    assert_eq!(session.toolchain.calls(), 1);
}

#[tokio::test]
async fn test_script_edit_pushes_reload() {
    let mut session = session().await;

    let script = session.root.join("web/greet.js");
    fs::write(&script, "export function greet(name) {\n  console.info(`hi ${name}`);\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![script]).await;

    assert_eq!(events, vec![PushEvent::reload()]);
    assert!(String::from_utf8(file(&session, "main.bundle.js")).unwrap().contains("console.info"));
    assert_eq!(session.toolchain.calls(), 1);
}

#[tokio::test]
async fn test_syntax_error_keeps_previous_output() {
    let mut session = session().await;
    let bundle_before = file(&session, "main.bundle.js");

    let script = session.root.join("web/greet.js");
    fs::write(&script, "export function greet(name {\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![script.clone()]).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, PushKind::Error);
    assert!(events[0].message.as_deref().unwrap().contains("greet.js"), "{:?}", events[0]);
    assert_eq!(file(&session, "main.bundle.js"), bundle_before);
    assert!(session.orchestrator.snapshot().last_error().is_some());

    fs::write(&script, "export function greet(name) {\n  return name;\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![script]).await;

    assert_eq!(events, vec![PushEvent::reload()]);
    assert!(session.orchestrator.snapshot().last_error().is_none());
}

#[tokio::test]
async fn test_native_source_edit_rebuilds_binary() {
    let mut session = session().await;

    let source = session.root.join("src/lib.rs");
    fs::write(&source, "pub fn answer() -> u32 { 43 }\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![source]).await;

    assert_eq!(session.toolchain.calls(), 2);
    assert_eq!(events, vec![PushEvent::reload()]);
    assert_eq!(file(&session, "app.wasm"), vec![0, b'a', b's', b'm', 2]);
}

#[tokio::test]
async fn test_toolchain_failure_is_retried_on_next_change() {
    let mut session = session().await;
    session.toolchain.set_failing(true);

    let source = session.root.join("src/lib.rs");
    fs::write(&source, "pub fn answer() -> u32 { x }\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![source]).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, PushKind::Error);
    assert_eq!(file(&session, "app.wasm"), vec![0, b'a', b's', b'm', 1]);

    // The crate is still dirty, so an unrelated edit builds it again
    session.toolchain.set_failing(false);
    let script = session.root.join("web/greet.js");
    fs::write(&script, "export function greet(name) {\n  return name;\n}\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![script]).await;

    assert_eq!(events, vec![PushEvent::reload()]);
    assert_eq!(session.toolchain.calls(), 3);
    assert_eq!(file(&session, "app.wasm"), vec![0, b'a', b's', b'm', 3]);
}

#[tokio::test]
async fn test_unrelated_paths_are_ignored() {
    let mut session = session().await;

    let notes = session.root.join("NOTES.md");
    fs::write(&notes, "# notes\n").unwrap();
    let events = session.orchestrator.handle_changes(vec![notes]).await;

    assert!(events.is_empty());
    assert_eq!(session.toolchain.calls(), 1);
}

#[tokio::test]
async fn test_burst_of_watch_events_is_one_rebuild() {
    let Session {
        _dir,
        root,
        toolchain,
        orchestrator,
        mut events,
    } = session().await;

    let script = root.join("web/greet.js");
    let css = root.join("web/app.css");
    fs::write(&script, "export function greet(name) {\n  console.warn(name);\n}\n").unwrap();
    fs::write(&css, ".app {\n  display: block;\n}\n").unwrap();

    let (changes_tx, changes_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let snapshot = orchestrator.snapshot();

    let driver = async {
        changes_tx.send(WatchEvent::modified(vec![script])).await.unwrap();
        changes_tx.send(WatchEvent::modified(vec![css.clone(), css])).await.unwrap();

        // Separate rebuilds would push a reload and then a style event
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await.unwrap().unwrap();
        assert_eq!(event, PushEvent::reload());
        assert!(tokio::time::timeout(Duration::from_millis(500), events.recv()).await.is_err());

        stop_tx.send(()).unwrap();
    };
    let shutdown = async {
        let _ = stop_rx.await;
    };
    tokio::join!(orchestrator.run(changes_rx, shutdown), driver);

    let files = snapshot.current().unwrap();
    let bundle = String::from_utf8(files.get("main.bundle.js").unwrap().contents.to_vec()).unwrap();
    assert!(bundle.contains("console.warn"));
    assert_eq!(toolchain.calls(), 1);
}
