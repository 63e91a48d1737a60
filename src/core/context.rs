use crate::core::models::{ContentType, Entry, Mode, SourceMapPolicy};
use crate::utils::{KilnError, ResolvedConfig, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One step of a transform chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStep {
    /// Parse the script and reject syntax errors
    ValidateScript,
    /// Point `.wasm` string literals at the emitted artifact
    RewriteBinaryReferences,
    /// SCSS/SASS to CSS
    Preprocess,
    /// Vendor prefixing, local `@import` removal
    Normalize,
    /// Plain CSS for aggregation into `[name].css`
    Extract,
    /// Standalone CSS file replaced in place by the client
    WrapForInjection,
    CopyVerbatim,
    LoadBinary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeConfig {
    pub crate_dir: PathBuf,
}

/// Read-only state shared by every component of one build
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub mode: Mode,
    pub root: PathBuf,
    pub entries: Vec<Entry>,
    pub output_dir: PathBuf,
    /// Always starts and ends with `/`
    pub public_base_path: String,
    pub source_maps: SourceMapPolicy,
    pub compiler_flags: String,
    pub dev_server_port: u16,
    pub hot_reload: bool,
    pub native: Option<NativeConfig>,
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
    pub debounce: Duration,
    transforms: HashMap<ContentType, Vec<TransformStep>>,
}

impl BuildContext {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let entries = validate_entries(config)?;

        for (key, template) in [
            ("scriptFilename", &config.script_filename),
            ("styleFilename", &config.style_filename),
        ] {
            if !template.contains("[name]") {
                return Err(KilnError::config(format!(
                    "{} '{}' must contain [name]",
                    key, template
                )));
            }
        }

        if config.artifact_name.trim().is_empty() || config.artifact_name.contains('/') {
            return Err(KilnError::config(format!(
                "artifactName '{}' must be a plain file name",
                config.artifact_name
            )));
        }

        let static_dir = config.static_dir.clone().filter(|dir| dir.is_dir());
        check_output_dir(&config.output_dir, &entries, static_dir.as_deref())?;

        let source_maps = match (config.source_maps, config.mode) {
            (false, _) => SourceMapPolicy::Disabled,
            (true, Mode::Production) => SourceMapPolicy::External,
            (true, Mode::Development) => SourceMapPolicy::Inline,
        };

        Ok(Self {
            mode: config.mode,
            root: config.root.clone(),
            entries,
            output_dir: config.output_dir.clone(),
            public_base_path: normalize_base_path(&config.public_base_path),
            source_maps,
            compiler_flags: config.compiler_flags.clone(),
            dev_server_port: config.dev_server_port,
            hot_reload: config.hot_reload,
            native: config.crate_dir.clone().map(|crate_dir| NativeConfig { crate_dir }),
            artifact_name: config.artifact_name.clone(),
            static_dir,
            static_prefix: config.static_prefix.trim_matches('/').to_string(),
            template: config.template.clone(),
            favicon: config.favicon.clone(),
            clean: config.clean,
            minify: config.minify,
            script_filename: config.script_filename.clone(),
            style_filename: config.style_filename.clone(),
            compress: config.compress,
            history_api_fallback: config.history_api_fallback,
            debounce: Duration::from_millis(config.debounce_ms),
            transforms: transform_table(config.mode),
        })
    }

    /// Transform chain for a content type, fixed at construction
    pub fn chain(&self, content_type: ContentType) -> &[TransformStep] {
        self.transforms
            .get(&content_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Root-relative URL of an emitted file
    pub fn public_url(&self, filename: &str) -> String {
        format!("{}{}", self.public_base_path, filename.trim_start_matches('/'))
    }

    pub fn artifact_url(&self) -> String {
        self.public_url(&self.artifact_name)
    }

    pub fn hmr_port(&self) -> u16 {
        self.dev_server_port.saturating_add(1)
    }

    /// Output path of a static file below the static root
    pub fn static_target(&self, relative: &str) -> String {
        if self.static_prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.static_prefix, relative)
        }
    }
}

fn validate_entries(config: &ResolvedConfig) -> Result<Vec<Entry>> {
    if config.entries.is_empty() {
        return Err(KilnError::config("at least one entry is required"));
    }

    let mut entries = Vec::with_capacity(config.entries.len());
    for (name, path) in &config.entries {
        if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
            return Err(KilnError::config(format!("invalid entry name '{}'", name)));
        }
        entries.push(Entry::new(name.clone(), path.clone()));
    }
    Ok(entries)
}

fn check_output_dir(output_dir: &Path, entries: &[Entry], static_dir: Option<&Path>) -> Result<()> {
    if let Some(entry) = entries.iter().find(|e| e.path.starts_with(output_dir)) {
        return Err(KilnError::cycle(format!(
            "entry '{}' ({}) lives inside the output directory {}",
            entry.name,
            entry.path.display(),
            output_dir.display()
        )));
    }

    if let Some(static_dir) = static_dir {
        if static_dir.starts_with(output_dir) || output_dir.starts_with(static_dir) {
            return Err(KilnError::cycle(format!(
                "output directory {} overlaps the static root {}",
                output_dir.display(),
                static_dir.display()
            )));
        }
    }

    Ok(())
}

fn normalize_base_path(base: &str) -> String {
    let trimmed = base.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}

fn transform_table(mode: Mode) -> HashMap<ContentType, Vec<TransformStep>> {
    use TransformStep::*;

    let style_tail = if mode.is_production() { Extract } else { WrapForInjection };

    let mut table = HashMap::new();
    table.insert(ContentType::Script, vec![ValidateScript, RewriteBinaryReferences]);
    table.insert(ContentType::Stylesheet, vec![Preprocess, Normalize, style_tail]);
    table.insert(ContentType::BinaryModule, vec![LoadBinary]);
    table.insert(ContentType::StaticFile, vec![CopyVerbatim]);
    table
}
