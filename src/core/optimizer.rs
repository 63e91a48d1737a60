use crate::core::context::BuildContext;
use crate::core::interfaces::{ScriptMinifier, StyleMinifier};
use crate::core::models::{ChunkKind, Graph, OutputChunk};
use crate::infrastructure::processors::OxcMinifier;
use crate::utils::{format_size, Logger, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

static SELECTOR_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.#](-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap());

static CSS_STRING_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#).unwrap());

static CSS_COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static DECLARATION_BLOCK_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Production-only minification of script and style chunks
pub struct OptimizationPass {
    scripts: Arc<dyn ScriptMinifier>,
    styles: Arc<dyn StyleMinifier>,
}

impl OptimizationPass {
    pub fn new(scripts: Arc<dyn ScriptMinifier>, styles: Arc<dyn StyleMinifier>) -> Self {
        Self { scripts, styles }
    }

    /// Chunks other than scripts and stylesheets pass through untouched.
    /// Malformed input is fatal.
    pub fn optimize(&self, chunks: Vec<OutputChunk>, graph: &Graph, context: &BuildContext) -> Result<Vec<OutputChunk>> {
        if !context.mode.is_production() || !context.minify {
            return Ok(chunks);
        }

        let corpus = reference_corpus(&chunks, graph);

        chunks
            .into_iter()
            .map(|chunk| match chunk.kind {
                ChunkKind::Script => self.minify_script(chunk),
                ChunkKind::Stylesheet => self.minify_style(chunk, &corpus),
                _ => Ok(chunk),
            })
            .collect()
    }

    fn minify_script(&self, chunk: OutputChunk) -> Result<OutputChunk> {
        let code = String::from_utf8_lossy(&chunk.contents).into_owned();
        let minified = self.scripts.minify(&code, &chunk.filename)?;
        log_reduction(&chunk.filename, &code, &minified);
        Ok(rewritten(chunk, minified))
    }

    fn minify_style(&self, chunk: OutputChunk, corpus: &str) -> Result<OutputChunk> {
        let css = String::from_utf8_lossy(&chunk.contents).into_owned();
        let unused = unused_symbols(&css, corpus);
        if !unused.is_empty() {
            Logger::debug(&format!("🧹 {}: dropping rules for {} unused selector(s)", chunk.filename, unused.len()));
        }
        let minified = self.styles.minify(&css, &chunk.filename, &unused)?;
        log_reduction(&chunk.filename, &css, &minified);
        Ok(rewritten(chunk, minified))
    }
}

fn rewritten(chunk: OutputChunk, contents: String) -> OutputChunk {
    OutputChunk::new(chunk.name, chunk.kind, chunk.filename, chunk.members, contents.into_bytes())
}

fn log_reduction(filename: &str, before: &str, after: &str) {
    Logger::debug(&format!(
        "📉 {}: {} → {} ({:.1}% smaller)",
        filename,
        format_size(before.len()),
        format_size(after.len()),
        OxcMinifier::calculate_reduction(before, after)
    ));
}

/// Everything that may mention a class or id at runtime: scripts, the HTML
/// template and the strings baked into the binary artifact
fn reference_corpus(chunks: &[OutputChunk], graph: &Graph) -> String {
    let mut corpus = String::new();
    for chunk in chunks.iter().filter(|c| matches!(c.kind, ChunkKind::Script | ChunkKind::BinaryModule)) {
        corpus.push_str(&String::from_utf8_lossy(&chunk.contents));
        corpus.push('\n');
    }
    if let Some(template) = &graph.template {
        corpus.push_str(template);
    }
    corpus
}

/// Class and id names that provably never occur in `corpus`. A name also
/// counts as used when any `-`/`_` delimited prefix of it occurs, which
/// covers names assembled at runtime (`"btn-" + kind`).
pub fn unused_symbols(css: &str, corpus: &str) -> HashSet<String> {
    let selectors = selector_text(css);
    let mut unused = HashSet::new();

    for caps in SELECTOR_NAME_REGEX.captures_iter(&selectors) {
        let name = &caps[1];
        if unused.contains(name) || is_referenced(name, corpus) {
            continue;
        }
        unused.insert(name.to_string());
    }

    unused
}

fn is_referenced(name: &str, corpus: &str) -> bool {
    if corpus.contains(name) {
        return true;
    }
    name.char_indices()
        .filter(|(i, c)| *i > 0 && (*c == '-' || *c == '_'))
        .any(|(i, _)| corpus.contains(&name[..=i]))
}

/// The CSS with comments, strings and innermost blocks removed, leaving
/// selectors and at-rule preludes
fn selector_text(css: &str) -> String {
    let text = CSS_COMMENT_REGEX.replace_all(css, " ");
    let text = CSS_STRING_REGEX.replace_all(&text, "\"\"");
    DECLARATION_BLOCK_REGEX.replace_all(&text, " ; ").into_owned()
}
