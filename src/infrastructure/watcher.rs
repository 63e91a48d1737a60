use crate::core::models::{WatchEvent, WatchEventKind};
use crate::utils::{KilnError, Logger, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Directory names never worth a rebuild
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", "pkg"];

/// Recursive watch on the project root, forwarding relevant changes as
/// `WatchEvent`s. Watching stops when this value is dropped.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    root: PathBuf,
}

impl SourceWatcher {
    /// `ignored` holds absolute directories (the output directory) whose
    /// changes are dropped
    pub fn start(root: &Path, ignored: Vec<PathBuf>, sender: mpsc::Sender<WatchEvent>) -> Result<Self> {
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(event) = to_watch_event(event, &ignored) {
                        forward(&sender, event);
                    }
                }
                Err(e) => Logger::warn(&format!("watch error: {}", e)),
            },
            Config::default(),
        )
        .map_err(|e| KilnError::Watch(format!("failed to create watcher: {}", e)))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| KilnError::Watch(format!("failed to watch {}: {}", root.display(), e)))?;

        tracing::info!("👀 Watching {}", root.display());

        Ok(Self {
            _watcher: watcher,
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Runs on the notify thread. A full channel makes it wait for the dev
/// loop to catch up, so no change is lost while a rebuild is running.
fn forward(sender: &mpsc::Sender<WatchEvent>, event: WatchEvent) {
    if sender.blocking_send(event).is_err() {
        Logger::debug("Watch event after the dev session stopped");
    }
}

fn to_watch_event(event: Event, ignored: &[PathBuf]) -> Option<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Remove(_) => WatchEventKind::Removed,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };

    let paths: Vec<PathBuf> = event
        .paths
        .into_iter()
        .filter(|path| !should_ignore(path, ignored))
        .collect();

    if paths.is_empty() {
        None
    } else {
        Some(WatchEvent { paths, kind })
    }
}

fn should_ignore(path: &Path, ignored: &[PathBuf]) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }

    if path
        .components()
        .any(|c| IGNORED_DIRS.iter().any(|dir| c.as_os_str() == *dir))
    {
        return true;
    }

    // Editor swap and backup files
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with('~') || name.ends_with(".swp") || name.ends_with(".tmp") || name.starts_with(".#")
}
