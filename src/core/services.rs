use crate::core::chunks::assemble;
use crate::core::context::BuildContext;
use crate::core::emitter::OutputEmitter;
use crate::core::graph::GraphBuilder;
use crate::core::interfaces::{FileSystemService, NativeToolchain};
use crate::core::models::{EmittedFileSet, Graph};
use crate::core::optimizer::OptimizationPass;
use crate::core::transform::TransformDispatcher;
use crate::infrastructure::processors::{GrassPreprocessor, LightningCssProcessor, OxcMinifier};
use crate::utils::{Logger, OutputFileInfo, Result, Timer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a one-shot build
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub files: Vec<OutputFileInfo>,
    pub modules: usize,
    pub elapsed: Duration,
}

/// Graph, chunks, optimization and emission wired together for one
/// Build Context. Used directly by `kiln build` and by the dev
/// orchestrator for every rebuild.
pub struct KilnBuildService {
    context: Arc<BuildContext>,
    fs: Arc<dyn FileSystemService>,
    builder: GraphBuilder,
    optimizer: OptimizationPass,
    emitter: OutputEmitter,
}

impl KilnBuildService {
    pub fn new(
        context: Arc<BuildContext>,
        fs: Arc<dyn FileSystemService>,
        toolchain: Option<Arc<dyn NativeToolchain>>,
    ) -> Self {
        let styles = Arc::new(LightningCssProcessor::new());
        let dispatcher = TransformDispatcher::new(Arc::new(GrassPreprocessor::new()), styles.clone());
        let toolchain = if context.native.is_some() { toolchain } else { None };

        Self {
            builder: GraphBuilder::new(context.clone(), fs.clone(), dispatcher, toolchain),
            optimizer: OptimizationPass::new(Arc::new(OxcMinifier::new()), styles),
            emitter: OutputEmitter::new(context.clone()),
            context,
            fs,
        }
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.context
    }

    pub async fn build_graph(&self) -> Result<Graph> {
        self.builder.build().await
    }

    pub async fn rebuild_graph(&self, previous: &Graph, changed: &[PathBuf], rebuild_artifact: bool) -> Result<Graph> {
        self.builder.rebuild(previous, changed, rebuild_artifact).await
    }

    /// Chunks, optimization and rendering; nothing is written
    pub fn render(&self, graph: &Graph) -> Result<EmittedFileSet> {
        let chunks = assemble(graph, &self.context)?;
        let chunks = self.optimizer.optimize(chunks, graph, &self.context)?;
        self.emitter.render(graph, chunks)
    }

    pub async fn write(&self, files: &EmittedFileSet) -> Result<()> {
        self.emitter.write(files, self.fs.as_ref()).await
    }

    /// Full one-shot build. Any error leaves the output directory untouched.
    pub async fn build(&self) -> Result<BuildReport> {
        let start = Instant::now();
        let _timer = Timer::start("build");
        Logger::build_start(self.context.mode.as_str(), &self.context.root, &self.context.output_dir);

        let graph = self.build_graph().await?;
        let files = self.render(&graph)?;
        self.write(&files).await?;

        if let Some(artifact) = &graph.artifact {
            if !artifact.diagnostics.trim().is_empty() {
                Logger::debug(&format!("wasm-pack output:\n{}", artifact.diagnostics.trim_end()));
            }
        }

        Ok(BuildReport {
            files: files
                .files
                .iter()
                .map(|(name, file)| OutputFileInfo {
                    name: name.clone(),
                    size: file.contents.len(),
                })
                .collect(),
            modules: graph.len(),
            elapsed: start.elapsed(),
        })
    }
}
