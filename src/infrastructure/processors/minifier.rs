use crate::core::interfaces::ScriptMinifier;
use crate::utils::{ErrorContext, KilnError, Result};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;
use std::path::Path;

/// Parse `source` as an ES module and report the first syntax error
pub fn validate_script(source: &str, path: &Path) -> Result<()> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();

    if ret.panicked || !ret.errors.is_empty() {
        let message = ret
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let message = if message.is_empty() {
            "unrecoverable parse failure".to_string()
        } else {
            message
        };
        return Err(KilnError::syntax_with_context(
            path.to_path_buf(),
            message,
            ErrorContext::new().with_file(path.to_path_buf()),
        ));
    }

    Ok(())
}

/// JavaScript minification using oxc
pub struct OxcMinifier {
    mangle: bool,
}

impl OxcMinifier {
    pub fn new() -> Self {
        Self { mangle: true }
    }

    /// Estimate size reduction percentage
    pub fn calculate_reduction(original: &str, minified: &str) -> f64 {
        let original_size = original.len() as f64;
        if original_size == 0.0 {
            return 0.0;
        }
        ((original_size - minified.len() as f64) / original_size) * 100.0
    }
}

impl Default for OxcMinifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptMinifier for OxcMinifier {
    fn minify(&self, code: &str, filename: &str) -> Result<String> {
        let allocator = Allocator::default();
        let parse_result = Parser::new(&allocator, code, SourceType::mjs()).parse();

        // Malformed input is fatal: minified output must match its input
        if parse_result.panicked || !parse_result.errors.is_empty() {
            let errors: Vec<String> = parse_result
                .errors
                .iter()
                .map(|e| format!("Parse error: {}", e))
                .collect();
            return Err(KilnError::syntax(filename.into(), errors.join("\n")));
        }

        let mut program = parse_result.program;
        let options = MinifierOptions {
            mangle: self.mangle.then(MangleOptions::default),
            compress: Some(CompressOptions::default()),
        };
        let ret = Minifier::new(options).minify(&allocator, &mut program);

        let code = Codegen::new()
            .with_options(CodegenOptions {
                minify: true,
                ..CodegenOptions::default()
            })
            .with_scoping(ret.scoping)
            .build(&program)
            .code;

        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TransformError;

    #[test]
    fn test_basic_minification() {
        let source = r#"
            export function hello(name) {
                const message = "Hello, " + name;
                console.log(message);
                return message;
            }
        "#;

        let minified = OxcMinifier::new().minify(source, "main.bundle.js").unwrap();
        assert!(minified.len() < source.len());
        assert!(minified.contains("hello"));
    }

    #[test]
    fn test_minification_is_deterministic() {
        let source = "const answer = 40 + 2;\nexport default function show() { return answer; }\n";
        let minifier = OxcMinifier::new();
        assert_eq!(
            minifier.minify(source, "a.js").unwrap(),
            minifier.minify(source, "a.js").unwrap()
        );
    }

    #[test]
    fn test_malformed_input_is_fatal() {
        let err = OxcMinifier::new().minify("function (", "main.bundle.js").unwrap_err();
        assert!(matches!(err, KilnError::Transform(TransformError::SyntaxError { .. })));
    }

    #[test]
    fn test_validate_script_accepts_modules() {
        let glue = "let wasm;\nexport default async function init() { return new URL('app_bg.wasm', import.meta.url); }\nawait init();";
        assert!(validate_script(glue, Path::new("pkg/app.js")).is_ok());
        assert!(validate_script("const = 1;", Path::new("web/bad.js")).is_err());
    }

    #[test]
    fn test_reduction_calculation() {
        let reduction = OxcMinifier::calculate_reduction("function hello() { return 'world'; }", "function hello(){return'world'}");
        assert!(reduction > 0.0);
    }
}
