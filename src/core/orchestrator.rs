use crate::core::context::BuildContext;
use crate::core::models::{ChunkKind, ContentType, EmittedFileSet, Graph, PushEvent, WatchEvent};
use crate::core::services::KilnBuildService;
use crate::utils::{KilnError, Logger, Result};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevState {
    Idle,
    Building,
    Serving,
    Invalidated,
    Stopped,
}

/// Last successful build as served over HTTP. Readers get an `Arc` to a
/// complete file set; rebuilds swap the whole set at once.
#[derive(Debug, Default)]
pub struct DevSnapshot {
    files: RwLock<Option<Arc<EmittedFileSet>>>,
    last_error: RwLock<Option<String>>,
}

impl DevSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<EmittedFileSet>> {
        self.files.read().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn publish(&self, files: Arc<EmittedFileSet>) {
        *self.files.write() = Some(files);
        *self.last_error.write() = None;
    }

    /// The previous file set stays in place
    pub fn fail(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }
}

/// Owns the dev session: initial build, watch-driven partial rebuilds and
/// the push notifications that follow them. Rebuilds run one at a time;
/// changes arriving meanwhile queue up in the watch channel.
pub struct DevOrchestrator {
    service: KilnBuildService,
    snapshot: Arc<DevSnapshot>,
    events: broadcast::Sender<PushEvent>,
    state: DevState,
    graph: Option<Graph>,
    /// Changed paths not yet covered by a successful build
    pending: BTreeSet<PathBuf>,
    pending_native: bool,
}

impl DevOrchestrator {
    pub fn new(service: KilnBuildService, events: broadcast::Sender<PushEvent>) -> Self {
        Self {
            service,
            snapshot: Arc::new(DevSnapshot::new()),
            events,
            state: DevState::Idle,
            graph: None,
            pending: BTreeSet::new(),
            pending_native: false,
        }
    }

    pub fn snapshot(&self) -> Arc<DevSnapshot> {
        self.snapshot.clone()
    }

    pub fn state(&self) -> DevState {
        self.state
    }

    /// Initial build. Build failures are kept for the error overlay; only
    /// errors the session cannot recover from are returned.
    pub async fn start(&mut self) -> Result<()> {
        self.state = DevState::Building;
        let outcome = self.build_once().await;
        self.state = DevState::Serving;

        match outcome {
            Ok((graph, files)) => {
                self.snapshot.publish(Arc::new(files));
                self.graph = Some(graph);
                Ok(())
            }
            Err(e) if e.is_fatal_in_dev() => {
                self.state = DevState::Stopped;
                Err(e)
            }
            Err(e) => {
                self.report(&e);
                self.pending_native = true;
                Ok(())
            }
        }
    }

    /// Rebuild after the given paths changed and notify clients. Returns the
    /// events that were pushed.
    pub async fn handle_changes(&mut self, paths: Vec<PathBuf>) -> Vec<PushEvent> {
        let relevant: Vec<PathBuf> = paths.into_iter().filter(|p| self.is_relevant(p)).collect();
        if relevant.is_empty() {
            return Vec::new();
        }

        self.state = DevState::Invalidated;
        let native = self.service.context().native.as_ref().map(|n| n.crate_dir.clone());
        self.pending_native |= relevant
            .iter()
            .any(|p| native.as_deref().is_some_and(|dir| is_native_source(dir, p)));
        self.pending.extend(relevant);

        self.state = DevState::Building;
        let start = Instant::now();
        let changed: Vec<PathBuf> = self.pending.iter().cloned().collect();
        let outcome = match self.graph.take() {
            Some(previous) => {
                let result = self.rebuild_from(&previous, &changed).await;
                if result.is_err() {
                    self.graph = Some(previous);
                }
                result
            }
            None => self.build_once().await,
        };
        self.state = DevState::Serving;

        let events = match outcome {
            Ok((graph, files)) => {
                let previous = self.snapshot.current();
                let events = classify(previous.as_deref(), &files, &changed, self.service.context());
                let rewritten = match previous.as_deref() {
                    Some(previous) => files.changed_since(previous).len(),
                    None => files.files.len(),
                };
                Logger::rebuild_complete(rewritten, start.elapsed());
                self.snapshot.publish(Arc::new(files));
                self.graph = Some(graph);
                self.pending.clear();
                self.pending_native = false;
                events
            }
            Err(e) => vec![self.report(&e)],
        };

        for event in &events {
            // No receivers just means no browser is connected
            let _ = self.events.send(event.clone());
        }
        events
    }

    /// Consume watch events until the channel closes or `shutdown`
    /// resolves. Bursts within the debounce window become one rebuild.
    pub async fn run(mut self, mut changes: mpsc::Receiver<WatchEvent>, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let debounce = self.service.context().debounce;

        loop {
            let first = tokio::select! {
                _ = &mut shutdown => None,
                event = changes.recv() => event,
            };
            let Some(first) = first else { break };

            let mut paths = first.paths;
            while let Ok(Some(next)) = tokio::time::timeout(debounce, changes.recv()).await {
                paths.extend(next.paths);
            }
            paths.sort();
            paths.dedup();

            self.handle_changes(paths).await;
        }

        self.state = DevState::Stopped;
        Logger::info("👋 Dev session stopped");
    }

    async fn build_once(&self) -> Result<(Graph, EmittedFileSet)> {
        let graph = self.service.build_graph().await?;
        let files = self.service.render(&graph)?;
        Ok((graph, files))
    }

    async fn rebuild_from(&self, previous: &Graph, changed: &[PathBuf]) -> Result<(Graph, EmittedFileSet)> {
        let graph = self
            .service
            .rebuild_graph(previous, changed, self.pending_native)
            .await?;
        let files = self.service.render(&graph)?;
        Ok((graph, files))
    }

    fn report(&self, error: &KilnError) -> PushEvent {
        Logger::error(&error.format_detailed());
        if error.is_toolchain_failure() {
            Logger::warn("Keeping the previous native module until the crate builds again");
        }
        let message = error.to_string();
        self.snapshot.fail(message.clone());
        PushEvent::error(message)
    }

    fn is_relevant(&self, path: &Path) -> bool {
        // After a failure anything may be the fix, e.g. a file that was missing
        if self.graph.is_none() || self.snapshot.last_error().is_some() {
            return true;
        }

        let context = self.service.context();
        self.graph.as_ref().is_some_and(|g| g.node_for_path(path).is_some())
            || context.native.as_ref().is_some_and(|n| is_native_source(&n.crate_dir, path))
            || context.static_dir.as_deref().is_some_and(|dir| path.starts_with(dir))
            || context.template.as_deref() == Some(path)
            || context.favicon.as_deref() == Some(path)
    }
}

/// Sources of the native crate: its manifest and Rust files under `src/`
fn is_native_source(crate_dir: &Path, path: &Path) -> bool {
    path == crate_dir.join("Cargo.toml")
        || (path.starts_with(crate_dir.join("src")) && path.extension().is_some_and(|e| e == "rs"))
}

/// Style replacement when only stylesheets changed and only stylesheets and
/// the document's link list differ; anything else reloads the page.
/// Stylesheets added or dropped by the edit (an `@import` appearing or
/// going away) are inserted or removed in place.
pub fn classify(
    previous: Option<&EmittedFileSet>,
    next: &EmittedFileSet,
    changed_sources: &[PathBuf],
    context: &BuildContext,
) -> Vec<PushEvent> {
    let Some(previous) = previous else {
        return vec![PushEvent::reload()];
    };

    let changed = next.changed_since(previous);
    let removed: Vec<&String> = previous.filenames().filter(|name| next.get(name).is_none()).collect();
    if changed.is_empty() && removed.is_empty() {
        return Vec::new();
    }

    let styles_only = !changed_sources.is_empty()
        && changed_sources
            .iter()
            .all(|p| ContentType::from_path(p) == ContentType::Stylesheet)
        && changed.iter().all(|name| {
            next.get(name).is_some_and(|f| {
                matches!(f.kind, ChunkKind::Stylesheet | ChunkKind::SourceMap | ChunkKind::Document)
            })
        })
        && removed.iter().all(|name| {
            previous
                .get(name)
                .is_some_and(|f| matches!(f.kind, ChunkKind::Stylesheet | ChunkKind::SourceMap))
        });

    if !styles_only {
        return vec![PushEvent::reload()];
    }

    let before = stylesheet_order(previous);
    let after = stylesheet_order(next);

    // Sheets present in both builds must keep their relative order
    let kept_before: Vec<&str> = before.iter().copied().filter(|n| after.contains(n)).collect();
    let kept_after: Vec<&str> = after.iter().copied().filter(|n| before.contains(n)).collect();
    if kept_before != kept_after {
        return vec![PushEvent::reload()];
    }

    let mut events = Vec::new();
    for (index, name) in after.iter().enumerate() {
        if !changed.iter().any(|c| c == name) {
            continue;
        }
        if previous.get(name).is_some() {
            events.push(PushEvent::style(context.public_url(name)));
            continue;
        }
        let anchor = after[index + 1..]
            .iter()
            .find(|later| previous.get(later).is_some())
            .map(|later| context.public_url(later));
        events.push(PushEvent::style_added(context.public_url(name), anchor));
    }
    for name in before {
        if next.get(name).is_none() {
            events.push(PushEvent::style_removed(context.public_url(name)));
        }
    }
    events
}

/// Stylesheet filenames in document order
fn stylesheet_order(files: &EmittedFileSet) -> Vec<&str> {
    files
        .chunks
        .iter()
        .filter(|c| c.kind == ChunkKind::Stylesheet)
        .map(|c| c.filename.as_str())
        .collect()
}
