use crate::core::interfaces::{PreprocessedStyle, StylePreprocessor};
use crate::utils::{ErrorContext, KilnError, Logger, Result};
use std::path::Path;

/// SCSS/SASS preprocessor using the grass crate
///
/// grass follows `@use`/`@import` itself, so the output of an entry
/// stylesheet already contains its partials.
#[derive(Debug, Clone, Default)]
pub struct GrassPreprocessor;

impl GrassPreprocessor {
    pub fn new() -> Self {
        Self
    }

    /// Check if a file is SCSS/SASS
    pub fn is_scss_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("scss") | Some("sass")
        )
    }
}

impl StylePreprocessor for GrassPreprocessor {
    fn handles(&self, path: &Path) -> bool {
        Self::is_scss_file(path)
    }

    fn preprocess(&self, path: &Path, _source_map: bool) -> Result<PreprocessedStyle> {
        let _timer = crate::utils::Timer::start(&format!(
            "Compiling SCSS {}",
            path.file_name().and_then(|s| s.to_str()).unwrap_or("unknown")
        ));

        // Expanded output: minification belongs to the optimization pass
        let options = grass::Options::default().style(grass::OutputStyle::Expanded);

        match grass::from_path(path, &options) {
            Ok(css) => {
                Logger::debug(&format!(
                    "SCSS compiled: {} -> {} bytes",
                    path.display(),
                    css.len()
                ));
                // grass does not emit maps; the dispatcher attaches a file-level one
                Ok(PreprocessedStyle { css, map: None })
            }
            Err(e) => Err(KilnError::syntax_with_context(
                path.to_path_buf(),
                e.to_string(),
                ErrorContext::new().with_file(path.to_path_buf()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::TransformError;

    #[test]
    fn test_is_scss_file() {
        assert!(GrassPreprocessor::is_scss_file(Path::new("styles.scss")));
        assert!(GrassPreprocessor::is_scss_file(Path::new("app.sass")));
        assert!(!GrassPreprocessor::is_scss_file(Path::new("styles.css")));
    }

    #[test]
    fn test_compile_follows_partials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_colors.scss"), "$primary: #333;").unwrap();
        std::fs::write(
            dir.path().join("app.scss"),
            "@use 'colors';\n.nav { ul { color: colors.$primary; } }",
        )
        .unwrap();

        let out = GrassPreprocessor::new()
            .preprocess(&dir.path().join("app.scss"), false)
            .unwrap();
        assert!(out.css.contains(".nav ul"));
        assert!(out.css.contains("#333"));
        assert!(out.map.is_none());
    }

    #[test]
    fn test_compile_error_is_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.scss");
        std::fs::write(&path, "$primary: ;\nbody { color: $primary; }").unwrap();

        let err = GrassPreprocessor::new().preprocess(&path, false).unwrap_err();
        assert!(matches!(err, KilnError::Transform(TransformError::SyntaxError { .. })));
    }
}
