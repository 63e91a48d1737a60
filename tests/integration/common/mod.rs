#![allow(dead_code)]

use async_trait::async_trait;
use kiln::core::{ArtifactRef, BuildContext, KilnBuildService, Mode, NativeToolchain};
use kiln::infrastructure::TokioFileSystemService;
use kiln::utils::{CliOverrides, ConfigLoader, KilnError, ResolvedConfig, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Stands in for wasm-pack: writes the glue and a binary whose last byte
/// counts the invocations
#[derive(Default)]
pub struct FakeToolchain {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl FakeToolchain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NativeToolchain for FakeToolchain {
    async fn build(&self, crate_dir: &Path, _mode: Mode, _flags: &str) -> Result<ArtifactRef> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(KilnError::toolchain("101", "error[E0425]: cannot find value `x` in this scope"));
        }

        let out = self.out_dir(crate_dir);
        fs::create_dir_all(&out)?;
        fs::write(
            out.join("app.js"),
            "let wasm;\nexport default async function init() {\n  const response = await fetch(new URL('app_bg.wasm', import.meta.url));\n  wasm = await response.arrayBuffer();\n  return wasm;\n}\n",
        )?;
        let bytes = vec![0, b'a', b's', b'm', call as u8];
        fs::write(out.join("app_bg.wasm"), &bytes)?;

        Ok(ArtifactRef {
            path: out.join("app_bg.wasm"),
            filename: "app_bg.wasm".to_string(),
            bytes: Arc::new(bytes),
            glue_files: vec![out.join("app.js")],
            diagnostics: String::new(),
        })
    }

    fn out_dir(&self, crate_dir: &Path) -> PathBuf {
        crate_dir.join("pkg")
    }
}

/// Entry `main` importing a stylesheet, a script and the wasm glue
pub fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("web/static/img")).unwrap();
    fs::create_dir_all(root.join("src")).unwrap();

    fs::write(root.join("Cargo.toml"), "[package]\nname = \"app\"\nversion = \"0.1.0\"\n").unwrap();
    fs::write(root.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    fs::write(
        root.join("web/index.js"),
        "import init from '../pkg/app.js';\nimport './app.css';\nimport { greet } from './greet.js';\n\ndocument.body.className = 'app';\nawait init();\ngreet('kiln');\n",
    )
    .unwrap();
    fs::write(
        root.join("web/greet.js"),
        "export function greet(name) {\n  console.log(`hello ${name}`);\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("web/app.css"),
        ".app {\n  display: flex;\n  color: #333;\n}\n\n.unused-widget {\n  color: red;\n}\n",
    )
    .unwrap();
    fs::write(root.join("web/static/robots.txt"), "User-agent: *\nDisallow:\n").unwrap();
    fs::write(root.join("web/static/img/logo.png"), [0x89u8, b'P', b'N', b'G', 0xff, 0x00, 0x1a]).unwrap();
    dir
}

pub fn config(root: &Path, mode: Mode) -> ResolvedConfig {
    ConfigLoader::merge_with_cli(
        None,
        root.to_path_buf(),
        CliOverrides {
            mode: Some(mode),
            ..Default::default()
        },
    )
}

pub fn service(config: &ResolvedConfig, toolchain: &Arc<FakeToolchain>) -> KilnBuildService {
    let context = Arc::new(BuildContext::from_config(config).unwrap());
    let toolchain: Arc<dyn NativeToolchain> = toolchain.clone();
    KilnBuildService::new(context, Arc::new(TokioFileSystemService), Some(toolchain))
}

/// Every file below `dir`, keyed by its `/`-separated relative path
pub fn read_tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let relative = path.strip_prefix(dir).unwrap();
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.insert(name, fs::read(&path).unwrap());
            }
        }
    }
    files
}
