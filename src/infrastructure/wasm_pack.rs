use crate::core::interfaces::NativeToolchain;
use crate::core::models::{ArtifactRef, Mode};
use crate::utils::{KilnError, Logger, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;

static PACKAGE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*name\s*=\s*"([^"]+)""#).unwrap());

/// Output directory wasm-pack writes to, relative to the crate
const OUT_DIR: &str = "pkg";

/// Runs `wasm-pack build --target web` on the native crate
#[derive(Debug, Clone)]
pub struct WasmPackToolchain {
    program: String,
}

impl WasmPackToolchain {
    pub fn new() -> Self {
        Self::with_program("wasm-pack")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// File stem of the generated glue and binary: the package name with
    /// dashes replaced, as wasm-bindgen names them
    pub async fn out_name(crate_dir: &Path) -> String {
        let manifest = tokio::fs::read_to_string(crate_dir.join("Cargo.toml"))
            .await
            .unwrap_or_default();
        package_name(&manifest)
            .or_else(|| crate_dir.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .unwrap_or_else(|| "app".to_string())
            .replace('-', "_")
    }

    pub fn command_args(&self, crate_dir: &Path, mode: Mode, compiler_flags: &str, out_name: &str) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            crate_dir.display().to_string(),
            "--target".to_string(),
            "web".to_string(),
            // Bindings are consumed opaquely by the script layer
            "--no-typescript".to_string(),
            "--out-dir".to_string(),
            self.out_dir(crate_dir).display().to_string(),
            "--out-name".to_string(),
            out_name.to_string(),
        ];

        match mode {
            Mode::Development => args.push("--dev".to_string()),
            Mode::Production => {
                args.push("--release".to_string());
                let extra: Vec<String> = compiler_flags.split_whitespace().map(str::to_string).collect();
                if !extra.is_empty() {
                    args.push("--".to_string());
                    args.extend(extra);
                }
            }
        }

        args
    }
}

impl Default for WasmPackToolchain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NativeToolchain for WasmPackToolchain {
    async fn build(&self, crate_dir: &Path, mode: Mode, compiler_flags: &str) -> Result<ArtifactRef> {
        let out_name = Self::out_name(crate_dir).await;
        let args = self.command_args(crate_dir, mode, compiler_flags, &out_name);
        Logger::toolchain_invoked(crate_dir, &args);

        let _timer = crate::utils::Timer::start("wasm-pack build");
        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(crate_dir)
            .kill_on_drop(false)
            .output()
            .await
            .map_err(|e| KilnError::toolchain("not started", format!("failed to run {}: {}", self.program, e)))?;

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|code| code.to_string())
                .unwrap_or_else(|| "terminated by signal".to_string());
            return Err(KilnError::toolchain(status, diagnostics));
        }

        let out_dir = self.out_dir(crate_dir);
        let binary = out_dir.join(format!("{}_bg.wasm", out_name));
        let bytes = tokio::fs::read(&binary).await.map_err(|e| {
            KilnError::toolchain(
                "0",
                format!("{} succeeded but {} is unreadable: {}", self.program, binary.display(), e),
            )
        })?;

        let filename = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(ArtifactRef {
            path: binary,
            filename,
            bytes: Arc::new(bytes),
            glue_files: vec![out_dir.join(format!("{}.js", out_name))],
            diagnostics,
        })
    }

    fn out_dir(&self, crate_dir: &Path) -> PathBuf {
        crate_dir.join(OUT_DIR)
    }
}

/// `name` of the `[package]` table
fn package_name(manifest: &str) -> Option<String> {
    let start = manifest.find("[package]")?;
    let section = &manifest[start + "[package]".len()..];
    let section = match section.find("\n[") {
        Some(end) => &section[..end],
        None => section,
    };
    PACKAGE_NAME_REGEX
        .captures(section)
        .map(|caps| caps[1].to_string())
}
