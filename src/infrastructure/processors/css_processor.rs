use crate::core::interfaces::{StyleMinifier, StyleNormalizer};
use crate::core::models::DependencyKind;
use crate::utils::{ErrorContext, KilnError, Result};
use lightningcss::{
    printer::PrinterOptions,
    stylesheet::{MinifyOptions, ParserOptions, StyleSheet},
    targets::{Browsers, Targets},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

static CSS_IMPORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*@import\s+(?:url\s*\(\s*)?['"]([^'"]+)['"]\s*\)?[^;\n]*;?"#).unwrap()
});

static SCSS_MODULE_RULE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*@(use|forward|import)\s+([^;]+);"#).unwrap());

static QUOTED_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"]([^'"]+)['"]"#).unwrap());

static BLOCK_COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

static LINE_COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*//.*$").unwrap());

/// A reference found in stylesheet source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleReference {
    pub specifier: String,
    pub kind: DependencyKind,
}

/// `@import` in plain CSS is aggregated by the bundler; `@use`, `@forward`
/// and `@import` in SCSS/SASS are inlined by the preprocessor.
pub fn extract_style_references(source: &str, preprocessed: bool) -> Vec<StyleReference> {
    let source = strip_comments(source, preprocessed);
    let mut refs = Vec::new();

    if preprocessed {
        for caps in SCSS_MODULE_RULE_REGEX.captures_iter(&source) {
            let rule = &caps[1];
            let args = &caps[2];
            // `@use 'x' with ($a: "b")` only names one module
            let take = if rule == "import" { usize::MAX } else { 1 };
            for quoted in QUOTED_REGEX.captures_iter(args).take(take) {
                let specifier = &quoted[1];
                if is_local_style_reference(specifier) && !specifier.starts_with("sass:") {
                    refs.push(StyleReference {
                        specifier: specifier.to_string(),
                        kind: DependencyKind::Inlined,
                    });
                }
            }
        }
    } else {
        for caps in CSS_IMPORT_REGEX.captures_iter(&source) {
            let specifier = &caps[1];
            if is_local_style_reference(specifier) {
                refs.push(StyleReference {
                    specifier: specifier.to_string(),
                    kind: DependencyKind::Import,
                });
            }
        }
    }

    refs
}

/// Drop `@import` rules for local files; their content is emitted separately
pub fn strip_local_imports(css: &str) -> String {
    CSS_IMPORT_REGEX
        .replace_all(css, |caps: &regex::Captures| {
            if is_local_style_reference(&caps[1]) {
                String::new()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn is_local_style_reference(specifier: &str) -> bool {
    !(specifier.starts_with("http://")
        || specifier.starts_with("https://")
        || specifier.starts_with("//")
        || specifier.starts_with("data:"))
}

fn strip_comments(source: &str, line_comments: bool) -> String {
    let without_blocks = BLOCK_COMMENT_REGEX.replace_all(source, "");
    if line_comments {
        LINE_COMMENT_REGEX.replace_all(&without_blocks, "").into_owned()
    } else {
        without_blocks.into_owned()
    }
}

/// Normalization and minification with lightningcss
pub struct LightningCssProcessor {
    targets: Targets,
}

impl LightningCssProcessor {
    pub fn new() -> Self {
        // Browsers that run wasm-bindgen's `--target web` output
        let browsers = Browsers {
            chrome: Some(80 << 16),
            edge: Some(80 << 16),
            firefox: Some(78 << 16),
            safari: Some(14 << 16),
            ios_saf: Some(14 << 16),
            ..Browsers::default()
        };

        Self {
            targets: Targets::from(browsers),
        }
    }

    fn process(&self, css: &str, path: &Path, minify: bool, unused_symbols: HashSet<String>) -> Result<String> {
        let mut stylesheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: path.display().to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| {
            let mut context = ErrorContext::new().with_file(path.to_path_buf());
            if let Some(loc) = &e.loc {
                let line = loc.line as usize + 1;
                context = context
                    .with_location(line, loc.column as usize)
                    .with_snippet(snippet_around(css, line));
            }
            KilnError::syntax_with_context(path.to_path_buf(), e.kind.to_string(), context)
        })?;

        stylesheet
            .minify(MinifyOptions {
                targets: self.targets.clone(),
                unused_symbols,
            })
            .map_err(|e| KilnError::syntax(path.to_path_buf(), e.to_string()))?;

        let result = stylesheet
            .to_css(PrinterOptions {
                minify,
                targets: self.targets.clone(),
                ..PrinterOptions::default()
            })
            .map_err(|e| KilnError::syntax(path.to_path_buf(), e.to_string()))?;

        Ok(result.code)
    }
}

impl Default for LightningCssProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleNormalizer for LightningCssProcessor {
    fn normalize(&self, css: &str, path: &Path) -> Result<String> {
        self.process(css, path, false, HashSet::new())
    }
}

impl StyleMinifier for LightningCssProcessor {
    fn minify(&self, css: &str, filename: &str, unused_symbols: &HashSet<String>) -> Result<String> {
        self.process(css, Path::new(filename), true, unused_symbols.clone())
    }
}

/// Source up to one line past the error; the detailed report numbers
/// snippet lines from 1
fn snippet_around(source: &str, line: usize) -> String {
    source
        .lines()
        .take(line + 1)
        .collect::<Vec<_>>()
        .join("\n")
}
