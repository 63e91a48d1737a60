use crate::utils::SourceMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Mode::Production)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("unknown mode '{}', expected development or production", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the build attaches source maps to emitted text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMapPolicy {
    Disabled,
    /// `.map` files next to the chunk
    External,
    /// base64 data URLs inside the chunk
    Inline,
}

impl SourceMapPolicy {
    pub fn enabled(&self) -> bool {
        !matches!(self, SourceMapPolicy::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Script,
    Stylesheet,
    BinaryModule,
    StaticFile,
}

impl ContentType {
    /// Unknown extensions fall back to static files.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "js" | "mjs" | "cjs" => ContentType::Script,
            "css" | "scss" | "sass" => ContentType::Stylesheet,
            "wasm" => ContentType::BinaryModule,
            _ => ContentType::StaticFile,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Script => "script",
            ContentType::Stylesheet => "stylesheet",
            ContentType::BinaryModule => "binary-module",
            ContentType::StaticFile => "static-file",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named top-level asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    pub path: PathBuf,
}

impl Entry {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Stable node identity: the source path relative to the project root,
/// `/`-separated, or `native:<artifact>` for the toolchain output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn from_path(root: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Self(parts.join("/"))
    }

    pub fn native(artifact_name: &str) -> Self {
        Self(format!("native:{}", artifact_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_native(&self) -> bool {
        self.0.starts_with("native:")
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Bundled or aggregated by chunk assembly
    Import,
    /// Consumed by the preprocessor itself (`@use`, `@import` in SCSS)
    Inlined,
    /// Reference to the native toolchain artifact
    BinaryModule,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub specifier: String,
    pub target: ModuleId,
    pub kind: DependencyKind,
}

/// Result of running a node through its transform chain
#[derive(Debug, Clone, PartialEq)]
pub enum TransformedOutput {
    Script {
        code: String,
    },
    /// Plain CSS destined for extraction into a standalone file
    Style {
        css: String,
        map: Option<SourceMap>,
    },
    /// CSS served as its own file and injected by a `<link>` that is
    /// replaced in place on updates
    InjectableStyle {
        style_id: String,
        css: String,
        map: Option<SourceMap>,
    },
    /// Byte-identical copy, `target` relative to the output directory
    Copy {
        target: String,
        bytes: Arc<Vec<u8>>,
    },
    Binary {
        bytes: Arc<Vec<u8>>,
        filename: String,
    },
    /// Stylesheet partial whose content only exists inside its importer
    Embedded,
}

/// One resolved asset in the dependency graph
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: ModuleId,
    pub path: PathBuf,
    pub content_type: ContentType,
    pub dependencies: Vec<Dependency>,
    /// Source text for scripts and stylesheets
    pub source: Option<Arc<str>>,
    /// Raw payload for static files and binaries
    pub raw: Option<Arc<Vec<u8>>>,
    pub output: Option<TransformedOutput>,
    /// True when every edge reaching this node is `DependencyKind::Inlined`
    pub embedded: bool,
}

impl ModuleNode {
    pub fn new(id: ModuleId, path: PathBuf, content_type: ContentType) -> Self {
        Self {
            id,
            path,
            content_type,
            dependencies: Vec::new(),
            source: None,
            raw: None,
            output: None,
            embedded: false,
        }
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = &ModuleId> {
        self.dependencies.iter().map(|d| &d.target)
    }
}

/// Output of the native toolchain, registered as a graph node
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    /// Where the toolchain wrote the binary
    pub path: PathBuf,
    /// Fixed, mode-independent output filename
    pub filename: String,
    pub bytes: Arc<Vec<u8>>,
    /// Script glue emitted alongside the binary
    pub glue_files: Vec<PathBuf>,
    pub diagnostics: String,
}

/// Finalized dependency graph of one build cycle
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: BTreeMap<ModuleId, ModuleNode>,
    /// Entry name to root node, in declaration order
    pub entries: Vec<(String, ModuleId)>,
    pub artifact: Option<ArtifactRef>,
    /// HTML template text, when the project has one
    pub template: Option<Arc<str>>,
}

impl Graph {
    pub fn get(&self, id: &ModuleId) -> Option<&ModuleNode> {
        self.nodes.get(id)
    }

    pub fn node_for_path(&self, path: &Path) -> Option<&ModuleNode> {
        self.nodes.values().find(|n| n.path == path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn artifact_id(&self) -> Option<ModuleId> {
        self.artifact.as_ref().map(|a| ModuleId::native(&a.filename))
    }

    /// Ids of nodes with an edge to `id`
    pub fn importers_of<'a>(&'a self, id: &'a ModuleId) -> impl Iterator<Item = &'a ModuleId> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.dependency_ids().any(|d| d == id))
            .map(|n| &n.id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Post-order walk from `root` following the given edge kinds: every
    /// node appears after its dependencies, each node once.
    pub fn post_order(&self, root: &ModuleId, follow: &[DependencyKind]) -> Vec<ModuleId> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();
        self.visit(root, follow, &mut visited, &mut order);
        order
    }

    fn visit(
        &self,
        id: &ModuleId,
        follow: &[DependencyKind],
        visited: &mut std::collections::HashSet<ModuleId>,
        order: &mut Vec<ModuleId>,
    ) {
        if !visited.insert(id.clone()) {
            return;
        }
        if let Some(node) = self.nodes.get(id) {
            for dep in node.dependencies.iter().filter(|d| follow.contains(&d.kind)) {
                self.visit(&dep.target, follow, visited, order);
            }
        }
        order.push(id.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkKind {
    Script,
    Stylesheet,
    BinaryModule,
    StaticFile,
    SourceMap,
    Document,
}

impl ChunkKind {
    pub fn mime_type(&self, filename: &str) -> &'static str {
        match self {
            ChunkKind::Script => "application/javascript; charset=utf-8",
            ChunkKind::Stylesheet => "text/css; charset=utf-8",
            ChunkKind::BinaryModule => "application/wasm",
            ChunkKind::SourceMap => "application/json",
            ChunkKind::Document => "text/html; charset=utf-8",
            ChunkKind::StaticFile => mime_from_filename(filename),
        }
    }
}

pub fn mime_from_filename(filename: &str) -> &'static str {
    let ext = filename.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// A named group of module nodes emitted as one output file
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChunk {
    pub name: String,
    pub kind: ChunkKind,
    /// Resolved filename, relative to the output directory
    pub filename: String,
    pub members: Vec<ModuleId>,
    pub contents: Arc<Vec<u8>>,
    /// Dropped when the optimizer rewrites the contents
    pub map: Option<SourceMap>,
}

impl OutputChunk {
    pub fn new(name: impl Into<String>, kind: ChunkKind, filename: impl Into<String>, members: Vec<ModuleId>, contents: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            kind,
            filename: filename.into(),
            members,
            contents: Arc::new(contents),
            map: None,
        }
    }

    pub fn with_map(mut self, map: Option<SourceMap>) -> Self {
        self.map = map;
        self
    }

    pub fn size(&self) -> usize {
        self.contents.len()
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.contents).ok()
    }
}

/// A file rendered in memory, ready to write or serve
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedFile {
    pub kind: ChunkKind,
    pub contents: Arc<Vec<u8>>,
    pub mime_type: &'static str,
}

/// Complete output of a build, keyed by path relative to the output directory
#[derive(Debug, Clone, Default)]
pub struct EmittedFileSet {
    pub files: BTreeMap<String, EmittedFile>,
    pub chunks: Vec<OutputChunk>,
}

impl EmittedFileSet {
    pub fn get(&self, filename: &str) -> Option<&EmittedFile> {
        self.files.get(filename)
    }

    pub fn filenames(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    pub fn total_size(&self) -> usize {
        self.files.values().map(|f| f.contents.len()).sum()
    }

    /// Files whose bytes differ from `previous` or that are new
    pub fn changed_since(&self, previous: &EmittedFileSet) -> Vec<String> {
        self.files
            .iter()
            .filter(|(name, file)| {
                previous
                    .files
                    .get(*name)
                    .map(|old| old.contents != file.contents)
                    .unwrap_or(true)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
}

/// Change notification consumed by the dev orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub paths: Vec<PathBuf>,
    pub kind: WatchEventKind,
}

impl WatchEvent {
    pub fn modified(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            kind: WatchEventKind::Modified,
        }
    }
}

/// Kind of a dev push notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    Connected,
    Style,
    Reload,
    Error,
}

/// Message sent to connected browsers:
/// `{type, target?, message?, before?, removed?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: PushKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// New stylesheet goes in front of this one; appended when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// Stylesheet no longer part of the document
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub removed: bool,
}

impl PushEvent {
    fn new(kind: PushKind) -> Self {
        Self {
            kind,
            target: None,
            message: None,
            before: None,
            removed: false,
        }
    }

    pub fn connected() -> Self {
        Self::new(PushKind::Connected)
    }

    pub fn style(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(PushKind::Style)
        }
    }

    pub fn style_added(target: impl Into<String>, before: Option<String>) -> Self {
        Self {
            before,
            ..Self::style(target)
        }
    }

    pub fn style_removed(target: impl Into<String>) -> Self {
        Self {
            removed: true,
            ..Self::style(target)
        }
    }

    pub fn reload() -> Self {
        Self::new(PushKind::Reload)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(PushKind::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_from_extension() {
        assert_eq!(ContentType::from_path(Path::new("web/index.js")), ContentType::Script);
        assert_eq!(ContentType::from_path(Path::new("web/app.SCSS")), ContentType::Stylesheet);
        assert_eq!(ContentType::from_path(Path::new("pkg/app_bg.wasm")), ContentType::BinaryModule);
        assert_eq!(ContentType::from_path(Path::new("web/static/robots.txt")), ContentType::StaticFile);
        assert_eq!(ContentType::from_path(Path::new("LICENSE")), ContentType::StaticFile);
    }

    #[test]
    fn test_module_id_is_root_relative() {
        let root = Path::new("/project");
        let id = ModuleId::from_path(root, Path::new("/project/web/index.js"));
        assert_eq!(id.as_str(), "web/index.js");
        assert!(!id.is_native());
        assert!(ModuleId::native("app.wasm").is_native());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("production".parse::<Mode>().unwrap(), Mode::Production);
        assert_eq!("dev".parse::<Mode>().unwrap(), Mode::Development);
        assert!("staging".parse::<Mode>().is_err());
    }

    #[test]
    fn test_post_order_puts_dependencies_first() {
        let mut graph = Graph::default();
        let a = ModuleId::from_path(Path::new("/"), Path::new("/a.js"));
        let b = ModuleId::from_path(Path::new("/"), Path::new("/b.js"));
        let c = ModuleId::from_path(Path::new("/"), Path::new("/c.css"));

        let mut node_a = ModuleNode::new(a.clone(), PathBuf::from("/a.js"), ContentType::Script);
        node_a.dependencies.push(Dependency { specifier: "./b.js".into(), target: b.clone(), kind: DependencyKind::Import });
        node_a.dependencies.push(Dependency { specifier: "./c.css".into(), target: c.clone(), kind: DependencyKind::Import });
        let mut node_b = ModuleNode::new(b.clone(), PathBuf::from("/b.js"), ContentType::Script);
        // runtime cycle back to a
        node_b.dependencies.push(Dependency { specifier: "./a.js".into(), target: a.clone(), kind: DependencyKind::Import });

        graph.nodes.insert(a.clone(), node_a);
        graph.nodes.insert(b.clone(), node_b);
        graph.nodes.insert(c.clone(), ModuleNode::new(c.clone(), PathBuf::from("/c.css"), ContentType::Stylesheet));

        assert_eq!(graph.post_order(&a, &[DependencyKind::Import]), vec![b, c, a]);
    }

    #[test]
    fn test_changed_since_detects_new_and_modified() {
        let file = |bytes: &[u8]| EmittedFile {
            kind: ChunkKind::Script,
            contents: Arc::new(bytes.to_vec()),
            mime_type: "application/javascript; charset=utf-8",
        };
        let mut old = EmittedFileSet::default();
        old.files.insert("main.bundle.js".into(), file(b"a"));
        old.files.insert("main.css".into(), file(b"b"));

        let mut new = old.clone();
        new.files.insert("main.css".into(), file(b"c"));
        new.files.insert("robots.txt".into(), file(b"d"));

        assert_eq!(new.changed_since(&old), vec!["main.css".to_string(), "robots.txt".to_string()]);
    }

    #[test]
    fn test_push_event_wire_format() {
        let style = serde_json::to_string(&PushEvent::style("/__kiln/styles/a1b2c3d4-app.css")).unwrap();
        assert_eq!(style, r#"{"type":"style","target":"/__kiln/styles/a1b2c3d4-app.css"}"#);
        assert_eq!(serde_json::to_string(&PushEvent::reload()).unwrap(), r#"{"type":"reload"}"#);

        let added = PushEvent::style_added("/__kiln/styles/b-extra.css", Some("/__kiln/styles/a-app.css".into()));
        assert_eq!(
            serde_json::to_string(&added).unwrap(),
            r#"{"type":"style","target":"/__kiln/styles/b-extra.css","before":"/__kiln/styles/a-app.css"}"#
        );
        let removed = serde_json::to_string(&PushEvent::style_removed("/__kiln/styles/b-extra.css")).unwrap();
        assert_eq!(removed, r#"{"type":"style","target":"/__kiln/styles/b-extra.css","removed":true}"#);
        assert_eq!(serde_json::from_str::<PushEvent>(&removed).unwrap(), PushEvent::style_removed("/__kiln/styles/b-extra.css"));
    }
}
