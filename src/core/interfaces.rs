use crate::core::models::{ArtifactRef, Mode};
use crate::utils::{Result, SourceMap};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// File system operations interface
#[async_trait]
pub trait FileSystemService: Send + Sync {
    async fn read_to_string(&self, path: &Path) -> Result<String>;
    async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>>;
    /// Creates missing parent directories
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;
    async fn create_directory(&self, path: &Path) -> Result<()>;
    async fn remove_directory(&self, path: &Path) -> Result<()>;
    /// Every regular file below `dir`, sorted
    async fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    fn file_exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedStyle {
    pub css: String,
    pub map: Option<SourceMap>,
}

/// Stylesheet preprocessor (SCSS/SASS to CSS). Reads `path` itself so it
/// can follow its own imports.
pub trait StylePreprocessor: Send + Sync {
    fn handles(&self, path: &Path) -> bool;
    fn preprocess(&self, path: &Path, source_map: bool) -> Result<PreprocessedStyle>;
}

/// Vendor-prefixing and normalization of plain CSS
pub trait StyleNormalizer: Send + Sync {
    fn normalize(&self, css: &str, path: &Path) -> Result<String>;
}

pub trait ScriptMinifier: Send + Sync {
    fn minify(&self, code: &str, filename: &str) -> Result<String>;
}

pub trait StyleMinifier: Send + Sync {
    /// Rules that only match `unused_symbols` may be dropped
    fn minify(&self, css: &str, filename: &str, unused_symbols: &HashSet<String>) -> Result<String>;
}

/// External compiler that turns the native crate into a web binary
#[async_trait]
pub trait NativeToolchain: Send + Sync {
    async fn build(&self, crate_dir: &Path, mode: Mode, compiler_flags: &str) -> Result<ArtifactRef>;

    /// Directory the toolchain writes its outputs to
    fn out_dir(&self, crate_dir: &Path) -> PathBuf;
}
