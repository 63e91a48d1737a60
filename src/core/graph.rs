use crate::core::context::BuildContext;
use crate::core::interfaces::{FileSystemService, NativeToolchain};
use crate::core::models::{
    ArtifactRef, ContentType, Dependency, DependencyKind, Graph, ModuleId, ModuleNode, TransformedOutput,
};
use crate::core::transform::TransformDispatcher;
use crate::infrastructure::processors::{extract_script_references, extract_style_references};
use crate::infrastructure::AssetResolver;
use crate::utils::{normalize, DependencyGraph, KilnError, Logger, Result, Timer};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What happens to the native artifact during one graph construction
#[derive(Debug, Clone)]
pub enum ArtifactPlan {
    /// Invoke the toolchain (once, concurrently with discovery)
    Build,
    /// Keep the artifact of the previous cycle
    Reuse(Option<ArtifactRef>),
}

/// Walks the entries breadth-first, resolving, loading and transforming
/// every reachable asset into a `Graph`
pub struct GraphBuilder {
    context: Arc<BuildContext>,
    fs: Arc<dyn FileSystemService>,
    resolver: AssetResolver,
    dispatcher: TransformDispatcher,
    toolchain: Option<Arc<dyn NativeToolchain>>,
}

impl GraphBuilder {
    pub fn new(
        context: Arc<BuildContext>,
        fs: Arc<dyn FileSystemService>,
        dispatcher: TransformDispatcher,
        toolchain: Option<Arc<dyn NativeToolchain>>,
    ) -> Self {
        let resolver = AssetResolver::new(context.root.clone());
        Self {
            context,
            fs,
            resolver,
            dispatcher,
            toolchain,
        }
    }

    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Full build: every node is loaded and transformed
    pub async fn build(&self) -> Result<Graph> {
        self.construct(None, &HashSet::new(), ArtifactPlan::Build).await
    }

    /// Partial build: nodes whose path changed, or that transitively depend
    /// on a changed path, are reloaded; the rest are taken from `previous`
    pub async fn rebuild(&self, previous: &Graph, changed: &[PathBuf], rebuild_artifact: bool) -> Result<Graph> {
        let mut seeds: Vec<PathBuf> = changed.to_vec();

        let plan = if rebuild_artifact {
            // Fresh glue in the toolchain's output directory
            if let Some(out_dir) = self.native_out_dir() {
                seeds.extend(
                    previous
                        .nodes
                        .values()
                        .filter(|n| n.path.starts_with(&out_dir))
                        .map(|n| n.path.clone()),
                );
            }
            if let Some(artifact) = &previous.artifact {
                seeds.push(artifact.path.clone());
            }
            ArtifactPlan::Build
        } else {
            ArtifactPlan::Reuse(previous.artifact.clone())
        };

        let dirty = DependencyGraph::from_graph(previous).affected_by(seeds.iter());
        Logger::debug(&format!("♻️  {} invalidated module path(s)", dirty.len()));

        self.construct(Some(previous), &dirty, plan).await
    }

    async fn construct(&self, previous: Option<&Graph>, dirty: &HashSet<PathBuf>, plan: ArtifactPlan) -> Result<Graph> {
        let _timer = Timer::start("dependency graph");
        let mut artifact = self.start_artifact(plan);

        match self.discover_and_transform(previous, dirty, &mut artifact).await {
            Ok(graph) => Ok(graph),
            Err(e) => {
                // Never leave a toolchain run behind that a later build could overlap
                artifact.settle().await;
                Err(e)
            }
        }
    }

    async fn discover_and_transform(
        &self,
        previous: Option<&Graph>,
        dirty: &HashSet<PathBuf>,
        artifact: &mut ArtifactSlot,
    ) -> Result<Graph> {
        let mut graph = Graph::default();
        let mut queue: VecDeque<ModuleNode> = VecDeque::new();
        let mut fresh: HashSet<ModuleId> = HashSet::new();
        let mut reused = 0usize;

        for entry in &self.context.entries {
            let node = self.resolver.resolve(&entry.path.to_string_lossy(), None)?;
            graph.entries.push((entry.name.clone(), node.id.clone()));
            queue.push_back(node);
        }
        queue.extend(self.static_nodes().await?);

        while let Some(skeleton) = queue.pop_front() {
            if graph.nodes.contains_key(&skeleton.id) {
                continue;
            }

            let reusable = previous
                .and_then(|p| p.get(&skeleton.id))
                .filter(|prev| prev.output.is_some() && prev.path == skeleton.path && !dirty.contains(&prev.path));

            let (node, discovered) = match reusable {
                Some(prev) => {
                    reused += 1;
                    let discovered = previous.map(|p| dependency_skeletons(prev, p)).unwrap_or_default();
                    (prev.clone(), discovered)
                }
                None => {
                    fresh.insert(skeleton.id.clone());
                    self.load(skeleton, artifact).await?
                }
            };

            queue.extend(discovered.into_iter().filter(|d| !graph.nodes.contains_key(&d.id)));
            graph.nodes.insert(node.id.clone(), node);
        }

        // The artifact is fatal to the cycle even when nothing references it
        if let Some(built) = artifact.wait().await?.cloned() {
            let id = ModuleId::native(&built.filename);
            let mut node = ModuleNode::new(id.clone(), built.path.clone(), ContentType::BinaryModule);
            node.raw = Some(built.bytes.clone());
            node.output = Some(TransformedOutput::Binary {
                bytes: built.bytes.clone(),
                filename: built.filename.clone(),
            });
            graph.nodes.insert(id, node);
            graph.artifact = Some(built);
        }

        graph.template = match &self.context.template {
            Some(path) if self.fs.file_exists(path) => Some(Arc::from(self.fs.read_to_string(path).await?)),
            Some(path) => return Err(KilnError::not_found(&path.display().to_string(), "<config template>")),
            None => None,
        };

        mark_embedded(&mut graph);
        check_style_cycles(&graph)?;

        // Reused nodes whose embedding changed need a new output as well
        let pending: Vec<ModuleNode> = graph
            .nodes
            .values()
            .filter(|n| !n.id.is_native())
            .filter(|n| {
                fresh.contains(&n.id) || n.embedded != matches!(n.output, Some(TransformedOutput::Embedded))
            })
            .cloned()
            .collect();

        for (id, output) in self.transform_all(pending).await? {
            if let Some(node) = graph.nodes.get_mut(&id) {
                node.output = Some(output);
            }
        }

        Logger::graph_complete(graph.len(), reused);
        Ok(graph)
    }

    /// Transforms are independent of each other: run them on the rayon pool.
    /// Results keep the input order, so the first error is deterministic.
    async fn transform_all(&self, nodes: Vec<ModuleNode>) -> Result<Vec<(ModuleId, TransformedOutput)>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        Logger::debug(&format!(
            "🔄 Transforming {} modules in parallel across {} cores",
            nodes.len(),
            num_cpus::get()
        ));

        let dispatcher = self.dispatcher.clone();
        let context = self.context.clone();
        let results: Vec<Result<(ModuleId, TransformedOutput)>> = tokio::task::spawn_blocking(move || {
            nodes
                .par_iter()
                .map(|node| {
                    let output = if node.embedded {
                        TransformedOutput::Embedded
                    } else {
                        dispatcher.transform(node, &context)?
                    };
                    Ok((node.id.clone(), output))
                })
                .collect()
        })
        .await
        .map_err(|e| KilnError::Io(std::io::Error::other(format!("transform worker failed: {}", e))))?;

        results.into_iter().collect()
    }

    async fn load(&self, mut node: ModuleNode, artifact: &mut ArtifactSlot) -> Result<(ModuleNode, Vec<ModuleNode>)> {
        if self.in_native_output(&node.path) {
            artifact.wait().await?;
        }

        match node.content_type {
            ContentType::Script | ContentType::Stylesheet => {
                node.source = Some(Arc::from(self.fs.read_to_string(&node.path).await?));
            }
            ContentType::StaticFile | ContentType::BinaryModule => {
                node.raw = Some(Arc::new(self.fs.read_bytes(&node.path).await?));
            }
        }

        let discovered = match node.content_type {
            ContentType::Script => self.link_script(&mut node, artifact).await?,
            ContentType::Stylesheet => self.link_style(&mut node)?,
            _ => Vec::new(),
        };

        Ok((node, discovered))
    }

    async fn link_script(&self, node: &mut ModuleNode, artifact: &mut ArtifactSlot) -> Result<Vec<ModuleNode>> {
        let source = node.source.clone().unwrap_or_else(|| Arc::from(""));
        let mut discovered = Vec::new();

        for reference in extract_script_references(&source) {
            let binary = reference.kind == DependencyKind::BinaryModule || is_binary_specifier(&reference.specifier);

            if self.toolchain_enabled() && (binary || self.points_into_native_output(&reference.specifier, &node.path)) {
                artifact.wait().await?;
            }

            if binary && self.toolchain_enabled() {
                node.dependencies.push(Dependency {
                    specifier: reference.specifier,
                    target: ModuleId::native(&self.context.artifact_name),
                    kind: DependencyKind::BinaryModule,
                });
                continue;
            }

            let target = match self.resolver.resolve(&reference.specifier, Some(&node.path)) {
                Ok(target) => target,
                // A `.wasm` string that names no file is just a string
                Err(e) if reference.kind == DependencyKind::BinaryModule => {
                    Logger::debug(&format!("skipping binary reference: {}", e));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let kind = if target.content_type == ContentType::BinaryModule {
                DependencyKind::BinaryModule
            } else {
                DependencyKind::Import
            };
            node.dependencies.push(Dependency {
                specifier: reference.specifier,
                target: target.id.clone(),
                kind,
            });
            discovered.push(target);
        }

        Ok(discovered)
    }

    fn link_style(&self, node: &mut ModuleNode) -> Result<Vec<ModuleNode>> {
        let source = node.source.clone().unwrap_or_else(|| Arc::from(""));
        let preprocessed = is_preprocessed_style(&node.path);
        let mut discovered = Vec::new();

        for reference in extract_style_references(&source, preprocessed) {
            // A plain `.css` import in SCSS stays a CSS @import
            let kind = if reference.specifier.ends_with(".css") {
                DependencyKind::Import
            } else {
                reference.kind
            };

            let target = match kind {
                DependencyKind::Inlined => self.resolver.resolve_style_import(&reference.specifier, &node.path)?,
                _ => self.resolver.resolve(&reference.specifier, Some(&node.path))?,
            };

            if target.content_type != ContentType::Stylesheet {
                continue;
            }

            node.dependencies.push(Dependency {
                specifier: reference.specifier,
                target: target.id.clone(),
                kind,
            });
            discovered.push(target);
        }

        Ok(discovered)
    }

    /// Files under the static root and the favicon, copied verbatim
    async fn static_nodes(&self) -> Result<Vec<ModuleNode>> {
        let mut nodes = Vec::new();

        if let Some(dir) = &self.context.static_dir {
            for path in self.fs.list_files(dir).await? {
                let id = ModuleId::from_path(&self.context.root, &path);
                nodes.push(ModuleNode::new(id, path, ContentType::StaticFile));
            }
        }

        if let Some(favicon) = &self.context.favicon {
            if !self.fs.file_exists(favicon) {
                return Err(KilnError::not_found(&favicon.display().to_string(), "<config favicon>"));
            }
            let id = ModuleId::from_path(&self.context.root, favicon);
            nodes.push(ModuleNode::new(id, favicon.clone(), ContentType::StaticFile));
        }

        Ok(nodes)
    }

    fn start_artifact(&self, plan: ArtifactPlan) -> ArtifactSlot {
        let filename = self.context.artifact_name.clone();

        let (toolchain, native) = match (&self.toolchain, &self.context.native) {
            (Some(toolchain), Some(native)) => (toolchain.clone(), native.clone()),
            _ => return ArtifactSlot::ready(None, filename),
        };

        match plan {
            ArtifactPlan::Reuse(artifact) => ArtifactSlot::ready(artifact, filename),
            ArtifactPlan::Build => {
                let mode = self.context.mode;
                let flags = self.context.compiler_flags.clone();
                let handle = tokio::spawn(async move { toolchain.build(&native.crate_dir, mode, &flags).await });
                ArtifactSlot {
                    pending: Some(handle),
                    ready: None,
                    filename,
                }
            }
        }
    }

    fn toolchain_enabled(&self) -> bool {
        self.toolchain.is_some() && self.context.native.is_some()
    }

    fn native_out_dir(&self) -> Option<PathBuf> {
        match (&self.toolchain, &self.context.native) {
            (Some(toolchain), Some(native)) => Some(toolchain.out_dir(&native.crate_dir)),
            _ => None,
        }
    }

    fn in_native_output(&self, path: &Path) -> bool {
        self.native_out_dir().is_some_and(|dir| path.starts_with(dir))
    }

    fn points_into_native_output(&self, specifier: &str, from: &Path) -> bool {
        if !(specifier.starts_with("./") || specifier.starts_with("../")) {
            return false;
        }
        match from.parent() {
            Some(base) => self.in_native_output(&normalize(&base.join(specifier))),
            None => false,
        }
    }
}

/// Handle on the toolchain run of one cycle
struct ArtifactSlot {
    pending: Option<JoinHandle<Result<ArtifactRef>>>,
    ready: Option<ArtifactRef>,
    filename: String,
}

impl ArtifactSlot {
    fn ready(artifact: Option<ArtifactRef>, filename: String) -> Self {
        Self {
            pending: None,
            ready: artifact,
            filename,
        }
    }

    /// Block until the toolchain finished. Failures of any kind surface as
    /// `ToolchainFailure`.
    async fn wait(&mut self) -> Result<Option<&ArtifactRef>> {
        if let Some(handle) = self.pending.take() {
            let outcome = handle
                .await
                .map_err(|e| KilnError::toolchain("aborted", e.to_string()))?;
            let mut artifact = outcome.map_err(|e| {
                if e.is_toolchain_failure() {
                    e
                } else {
                    KilnError::toolchain("failed", e.to_string())
                }
            })?;

            if !artifact.diagnostics.trim().is_empty() {
                Logger::debug(artifact.diagnostics.trim_end());
            }
            artifact.filename = self.filename.clone();
            self.ready = Some(artifact);
        }
        Ok(self.ready.as_ref())
    }

    /// Let an outstanding run finish and discard its result
    async fn settle(&mut self) {
        if let Some(handle) = self.pending.take() {
            let _ = handle.await;
        }
    }
}

fn dependency_skeletons(node: &ModuleNode, previous: &Graph) -> Vec<ModuleNode> {
    node.dependency_ids()
        .filter(|id| !id.is_native())
        .filter_map(|id| previous.get(id))
        .map(|dep| ModuleNode::new(dep.id.clone(), dep.path.clone(), dep.content_type))
        .collect()
}

/// A stylesheet is embedded when every edge reaching it is `Inlined`
fn mark_embedded(graph: &mut Graph) {
    let entries: HashSet<ModuleId> = graph.entries.iter().map(|(_, id)| id.clone()).collect();
    let mut reached_by: HashMap<ModuleId, bool> = HashMap::new();

    for node in graph.nodes.values() {
        for dep in &node.dependencies {
            let only_inlined = reached_by.entry(dep.target.clone()).or_insert(true);
            *only_inlined &= dep.kind == DependencyKind::Inlined;
        }
    }

    for node in graph.nodes.values_mut() {
        node.embedded = node.content_type == ContentType::Stylesheet
            && !entries.contains(&node.id)
            && reached_by.get(&node.id).copied().unwrap_or(false);
    }
}

/// Stylesheet import cycles would make a preprocessor consume its own output
fn check_style_cycles(graph: &Graph) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(graph: &Graph, id: &ModuleId, marks: &mut HashMap<ModuleId, Mark>, stack: &mut Vec<ModuleId>) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|s| s == id).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(id.to_string());
                return Err(KilnError::cycle(format!("stylesheet import cycle: {}", cycle.join(" -> "))));
            }
            None => {}
        }

        marks.insert(id.clone(), Mark::Visiting);
        stack.push(id.clone());
        if let Some(node) = graph.get(id) {
            for dep in &node.dependencies {
                if graph.get(&dep.target).is_some_and(|t| t.content_type == ContentType::Stylesheet) {
                    visit(graph, &dep.target, marks, stack)?;
                }
            }
        }
        stack.pop();
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for node in graph.nodes.values().filter(|n| n.content_type == ContentType::Stylesheet) {
        visit(graph, &node.id, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

fn is_binary_specifier(specifier: &str) -> bool {
    specifier
        .split(['?', '#'])
        .next()
        .is_some_and(|s| s.ends_with(".wasm"))
}

fn is_preprocessed_style(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("scss") | Some("sass")
    )
}
