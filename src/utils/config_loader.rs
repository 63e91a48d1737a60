use crate::core::models::Mode;
use crate::utils::{KilnError, Logger, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "kiln.config.json";

/// Configuration file format (kiln.config.json)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KilnConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,

    /// Entry name to source path (default: {"main": "./web/index.js"})
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_path: Option<String>,

    /// Default: on in development, off in production
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_maps: Option<bool>,

    /// Extra cargo arguments, production builds only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_flags: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_server_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot_reload: Option<bool>,

    /// Native crate directory; an empty string disables the toolchain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crate_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clean: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub minify: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_filename: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_filename: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_api_fallback: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

/// Values given on the command line; `None` defers to the file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mode: Option<Mode>,
    pub output_dir: Option<String>,
    pub public_base_path: Option<String>,
    pub source_maps: Option<bool>,
    pub minify: Option<bool>,
    pub clean: Option<bool>,
    pub dev_server_port: Option<u16>,
    pub hot_reload: Option<bool>,
}

/// Fully merged options, every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub root: PathBuf,
    pub mode: Mode,
    pub entries: BTreeMap<String, PathBuf>,
    pub output_dir: PathBuf,
    pub public_base_path: String,
    pub source_maps: bool,
    pub compiler_flags: String,
    pub dev_server_port: u16,
    pub hot_reload: bool,
    pub crate_dir: Option<PathBuf>,
    pub artifact_name: String,
    pub static_dir: Option<PathBuf>,
    pub static_prefix: String,
    pub template: Option<PathBuf>,
    pub favicon: Option<PathBuf>,
    pub clean: bool,
    pub minify: bool,
    pub script_filename: String,
    pub style_filename: String,
    pub compress: bool,
    pub history_api_fallback: bool,
    pub debounce_ms: u64,
}

/// Config loader that supports config files with CLI override
pub struct ConfigLoader;

impl ConfigLoader {
    /// Searches for kiln.config.json in the project root
    pub fn load_from_file(root: &Path) -> Result<Option<KilnConfig>> {
        let config_path = root.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            Logger::debug("No kiln.config.json found, using defaults");
            return Ok(None);
        }

        Logger::debug(&format!("Loading config from {}", config_path.display()));

        let content = std::fs::read_to_string(&config_path)?;
        let config: KilnConfig = serde_json::from_str(&content).map_err(|e| {
            KilnError::config(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e))
        })?;

        Ok(Some(config))
    }

    /// Merge file config with CLI arguments (CLI > config file > default)
    pub fn merge_with_cli(file_config: Option<KilnConfig>, root: PathBuf, cli: CliOverrides) -> ResolvedConfig {
        let base = file_config.unwrap_or_default();
        let mode = cli.mode.or(base.mode).unwrap_or(Mode::Production);

        let entries = match base.entries {
            Some(entries) => entries
                .into_iter()
                .map(|(name, path)| (name, resolve_against(&root, &path)))
                .collect(),
            None => {
                let mut entries = BTreeMap::new();
                entries.insert("main".to_string(), root.join("web").join("index.js"));
                entries
            }
        };

        let output_dir = cli
            .output_dir
            .or(base.output_dir)
            .unwrap_or_else(|| "dist".to_string());

        // An empty crateDir disables the native toolchain
        let crate_dir = match base.crate_dir {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(resolve_against(&root, &dir)),
            None if root.join("Cargo.toml").exists() => Some(root.clone()),
            None => None,
        };

        let static_dir = match base.static_dir {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(resolve_against(&root, &dir)),
            None => Some(root.join("web").join("static")),
        };

        let template = match base.template {
            Some(path) => Some(resolve_against(&root, &path)),
            None => Some(root.join("web").join("index.html")).filter(|p| p.exists()),
        };

        ResolvedConfig {
            mode,
            entries,
            output_dir: resolve_against(&root, &output_dir),
            public_base_path: cli
                .public_base_path
                .or(base.public_base_path)
                .unwrap_or_else(|| "/".to_string()),
            source_maps: cli
                .source_maps
                .or(base.source_maps)
                .unwrap_or(!mode.is_production()),
            compiler_flags: base.compiler_flags.unwrap_or_default(),
            dev_server_port: cli.dev_server_port.or(base.dev_server_port).unwrap_or(8000),
            hot_reload: cli.hot_reload.or(base.hot_reload).unwrap_or(true),
            crate_dir,
            artifact_name: base.artifact_name.unwrap_or_else(|| "app.wasm".to_string()),
            static_dir,
            static_prefix: base.static_prefix.unwrap_or_default(),
            template,
            favicon: base.favicon.map(|p| resolve_against(&root, &p)),
            clean: cli.clean.or(base.clean).unwrap_or(false),
            minify: cli.minify.or(base.minify).unwrap_or(true),
            script_filename: base
                .script_filename
                .unwrap_or_else(|| "[name].bundle.js".to_string()),
            style_filename: base.style_filename.unwrap_or_else(|| "[name].css".to_string()),
            compress: base.compress.unwrap_or(true),
            history_api_fallback: base.history_api_fallback.unwrap_or(true),
            debounce_ms: base.debounce_ms.unwrap_or(100),
            root,
        }
    }

    /// Load the file from `root` and merge it with the CLI values
    pub fn load(root: &Path, cli: CliOverrides) -> Result<ResolvedConfig> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            KilnError::config(format!("Project root {} is not accessible: {}", root.display(), e))
        })?;
        let file_config = Self::load_from_file(&root)?;
        Ok(Self::merge_with_cli(file_config, root, cli))
    }

    /// Example config file mirroring the defaults
    pub fn generate_example() -> String {
        let mut entries = BTreeMap::new();
        entries.insert("main".to_string(), "./web/index.js".to_string());
        let example = KilnConfig {
            mode: Some(Mode::Production),
            entries: Some(entries),
            output_dir: Some("dist".to_string()),
            public_base_path: Some("/".to_string()),
            compiler_flags: Some("--features console_error_panic_hook".to_string()),
            dev_server_port: Some(8000),
            hot_reload: Some(true),
            static_dir: Some("web/static".to_string()),
            template: Some("web/index.html".to_string()),
            ..Default::default()
        };
        serde_json::to_string_pretty(&example).unwrap_or_default()
    }
}

fn resolve_against(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        let joined = root.join(candidate);
        normalize(&joined)
    }
}

/// Lexically fold `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
