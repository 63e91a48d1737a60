use tracing::{debug, error, info, warn};
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

pub struct Logger;

impl Logger {
    /// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
    pub fn init(verbose: bool) {
        let default_filter = if verbose { "kiln=debug" } else { "kiln=info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    pub fn build_start(mode: &str, root: &Path, outdir: &Path) {
        info!("🔨 Kiln - {} build", mode);
        info!("═══════════════════════════════════════");
        info!("📁 Root: {}", root.display());
        info!("📦 Output: {}", outdir.display());
    }

    pub fn resolving(reference: &str, from: &Path) {
        debug!("🔍 Resolving '{}' from {}", reference, from.display());
    }

    pub fn transforming(path: &Path, chain: &str) {
        debug!("⚡ Transforming: {} ({})", path.display(), chain);
    }

    pub fn toolchain_invoked(crate_dir: &Path, args: &[String]) {
        info!("🦀 Building native module in {}", crate_dir.display());
        debug!("   wasm-pack {}", args.join(" "));
    }

    pub fn graph_complete(nodes: usize, reused: usize) {
        if reused > 0 {
            debug!("🕸️  Graph: {} modules ({} reused)", nodes, reused);
        } else {
            debug!("🕸️  Graph: {} modules", nodes);
        }
    }

    pub fn rebuild_complete(changed: usize, elapsed: std::time::Duration) {
        info!("✅ Rebuilt {} file(s) in {:.0?}", changed, elapsed);
    }

    pub fn info(msg: &str) {
        info!("{}", msg);
    }

    pub fn debug(msg: &str) {
        debug!("{}", msg);
    }

    pub fn error(msg: &str) {
        error!("❌ {}", msg);
    }

    pub fn warn(msg: &str) {
        warn!("⚠️  {}", msg);
    }
}

pub struct Timer {
    start: Instant,
    name: String,
}

impl Timer {
    pub fn start(name: &str) -> Self {
        debug!("⏱️  Starting: {}", name);
        Self {
            start: Instant::now(),
            name: name.to_string(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        debug!("⏱️  Completed: {} in {:.2?}", self.name, self.elapsed());
    }
}
