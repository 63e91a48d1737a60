use crate::core::{BuildContext, DevOrchestrator, KilnBuildService, Mode, PushEvent};
use crate::infrastructure::dev_server::{self, FileSource, ServeOptions};
use crate::infrastructure::{HmrServer, SourceWatcher, TokioFileSystemService, WasmPackToolchain};
use crate::utils::{BuildUI, CliOverrides, ConfigLoader, Logger, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(version)]
#[command(about = "Kiln - asset pipeline and dev server for web apps with a wasm-pack core")]
pub struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the project into the output directory
    Build {
        /// Project root
        #[arg(short, long, default_value = ".")]
        root: String,
        /// development or production
        #[arg(short, long)]
        mode: Option<Mode>,
        /// Output directory
        #[arg(short, long)]
        outdir: Option<String>,
        /// Public base path of the emitted URLs
        #[arg(long)]
        public_path: Option<String>,
        /// Emit source maps
        #[arg(long)]
        source_maps: bool,
        /// Disable minification
        #[arg(long)]
        no_minify: bool,
        /// Empty the output directory before writing
        #[arg(long)]
        clean: bool,
    },
    /// Start the development server with hot reload
    Dev {
        /// Project root
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Port to serve on; the push channel uses the next one
        #[arg(short, long)]
        port: Option<u16>,
        /// Disable the push channel and the injected client
        #[arg(long)]
        no_hot: bool,
    },
    /// Preview a production build
    Serve {
        /// Project root whose configuration is used
        #[arg(short, long, default_value = ".")]
        root: String,
        /// Directory to serve (defaults to the configured output directory)
        #[arg(short, long)]
        dir: Option<String>,
        /// Port to serve on
        #[arg(short, long, default_value_t = 4173)]
        port: u16,
    },
    /// Show version and the resolved configuration
    Info {
        /// Project root
        #[arg(short, long, default_value = ".")]
        root: String,
    },
}

pub struct CliHandler;

impl CliHandler {
    pub fn new() -> Self {
        Self
    }

    pub async fn run(&self) -> Result<()> {
        let cli = Cli::parse();
        Logger::init(cli.verbose);

        match cli.command {
            Commands::Build {
                root,
                mode,
                outdir,
                public_path,
                source_maps,
                no_minify,
                clean,
            } => {
                let overrides = CliOverrides {
                    mode,
                    output_dir: outdir,
                    public_base_path: public_path,
                    source_maps: source_maps.then_some(true),
                    minify: no_minify.then_some(false),
                    clean: clean.then_some(true),
                    ..Default::default()
                };
                self.handle_build_command(&root, overrides).await
            }
            Commands::Dev { root, port, no_hot } => self.handle_dev_command(&root, port, no_hot).await,
            Commands::Serve { root, dir, port } => self.handle_serve_command(&root, dir, port).await,
            Commands::Info { root } => self.handle_info_command(&root).await,
        }
    }

    async fn handle_build_command(&self, root: &str, overrides: CliOverrides) -> Result<()> {
        let config = ConfigLoader::load(Path::new(root), overrides)?;
        let context = Arc::new(BuildContext::from_config(&config)?);
        BuildUI::show_banner(context.mode.as_str());

        let service = KilnBuildService::new(
            context.clone(),
            Arc::new(TokioFileSystemService),
            Some(Arc::new(WasmPackToolchain::new())),
        );
        let report = service.build().await?;

        let outdir = context
            .output_dir
            .strip_prefix(&context.root)
            .unwrap_or(&context.output_dir)
            .display()
            .to_string();
        BuildUI::show_completion(&outdir, &report.files, report.elapsed);
        Logger::debug(&format!("{} modules in the graph", report.modules));
        Ok(())
    }

    async fn handle_dev_command(&self, root: &str, port: Option<u16>, no_hot: bool) -> Result<()> {
        let overrides = CliOverrides {
            mode: Some(Mode::Development),
            dev_server_port: port,
            hot_reload: no_hot.then_some(false),
            ..Default::default()
        };
        let config = ConfigLoader::load(Path::new(root), overrides)?;
        let context = Arc::new(BuildContext::from_config(&config)?);
        BuildUI::show_banner(context.mode.as_str());

        // Ports first: a taken port should fail before a long native build
        let http = dev_server::bind(context.dev_server_port).await?;
        let push = if context.hot_reload {
            Some(HmrServer::bind(context.hmr_port()).await?)
        } else {
            None
        };

        let (events, _) = broadcast::channel::<PushEvent>(64);
        let service = KilnBuildService::new(
            context.clone(),
            Arc::new(TokioFileSystemService),
            Some(Arc::new(WasmPackToolchain::new())),
        );
        let mut orchestrator = DevOrchestrator::new(service, events.clone());
        orchestrator.start().await?;

        let (changes_tx, changes_rx) = mpsc::channel(256);
        let _watcher = SourceWatcher::start(&context.root, vec![context.output_dir.clone()], changes_tx)?;

        let push_task = push.map(|listener| {
            let server = HmrServer::new(events.clone());
            tokio::spawn(async move {
                if let Err(e) = server.serve(listener).await {
                    Logger::error(&format!("Push channel stopped: {}", e));
                }
            })
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let router = dev_server::router(FileSource::Live(orchestrator.snapshot()), ServeOptions::dev(&context));
        let http_task = tokio::spawn(dev_server::serve(http, router, stopped(stop_rx)));

        let url = format!("http://localhost:{}{}", context.dev_server_port, context.public_base_path);
        BuildUI::show_dev_ready(&url, context.hot_reload.then(|| context.hmr_port()));

        orchestrator
            .run(changes_rx, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;

        let _ = stop_tx.send(true);
        if let Some(task) = push_task {
            task.abort();
        }
        match http_task.await {
            Ok(result) => result,
            Err(e) => {
                Logger::warn(&format!("HTTP server task ended abnormally: {}", e));
                Ok(())
            }
        }
    }

    async fn handle_serve_command(&self, root: &str, dir: Option<String>, port: u16) -> Result<()> {
        let overrides = CliOverrides {
            mode: Some(Mode::Production),
            output_dir: dir,
            ..Default::default()
        };
        let config = ConfigLoader::load(Path::new(root), overrides)?;
        let context = BuildContext::from_config(&config)?;

        let files = dev_server::load_output_dir(&TokioFileSystemService, &context.output_dir).await?;
        Logger::info(&format!("📦 Serving {} file(s) from {}", files.files.len(), context.output_dir.display()));

        let listener = dev_server::bind(port).await?;
        let router = dev_server::router(FileSource::Static(Arc::new(files)), ServeOptions::preview(&context));
        BuildUI::show_dev_ready(&format!("http://localhost:{}{}", port, context.public_base_path), None);

        dev_server::serve(listener, router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    async fn handle_info_command(&self, root: &str) -> Result<()> {
        tracing::info!("🔥 Kiln v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("═══════════════════════════════════════");

        let config = ConfigLoader::load(Path::new(root), CliOverrides::default())?;
        let context = BuildContext::from_config(&config)?;

        tracing::info!("📁 Root: {}", context.root.display());
        tracing::info!("⚙️  Mode: {}", context.mode);
        for entry in &context.entries {
            tracing::info!("🎯 Entry {}: {}", entry.name, entry.path.display());
        }
        tracing::info!("📦 Output: {}", context.output_dir.display());
        tracing::info!("🌐 Public path: {}", context.public_base_path);
        match &context.native {
            Some(native) => tracing::info!(
                "🦀 Native crate: {} → {}",
                native.crate_dir.display(),
                context.artifact_name
            ),
            None => tracing::info!("🦀 Native crate: none"),
        }
        if let Some(dir) = &context.static_dir {
            tracing::info!("🗂️  Static files: {}", dir.display());
        }
        tracing::info!("");
        tracing::info!("Example kiln.config.json:\n{}", ConfigLoader::generate_example());
        Ok(())
    }
}

impl Default for CliHandler {
    fn default() -> Self {
        Self::new()
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
