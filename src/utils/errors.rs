use std::path::PathBuf;
use thiserror::Error;

/// Enhanced error with file location context
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub code_snippet: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_location(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_snippet(mut self, snippet: String) -> Self {
        self.code_snippet = Some(snippet);
        self
    }
}

/// Failures while mapping a reference to a source file
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("cannot resolve '{reference}' from {from}")]
    NotFound { reference: String, from: String },

    #[error("'{reference}' from {from} is ambiguous: {}", .candidates.iter().map(|c| c.display().to_string()).collect::<Vec<_>>().join(", "))]
    Ambiguous {
        reference: String,
        from: String,
        candidates: Vec<PathBuf>,
    },
}

/// Failures inside a transform chain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("syntax error in {}: {message}", .path.display())]
    SyntaxError {
        path: PathBuf,
        message: String,
        context: Option<ErrorContext>,
    },

    #[error("no transform chain for {} ({content_type})", .path.display())]
    UnsupportedType { path: PathBuf, content_type: String },
}

/// Failures that abort a whole build cycle
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("native toolchain failed (exit status {status}):\n{diagnostics}")]
    ToolchainFailure { status: String, diagnostics: String },

    #[error("transform cycle: {0}")]
    CycleInTransform(String),

    #[error("output filename collision: '{filename}' produced by {first} and {second}")]
    FilenameCollision {
        filename: String,
        first: String,
        second: String,
    },
}

#[derive(Error, Debug)]
pub enum KilnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

impl KilnError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn not_found(reference: &str, from: &str) -> Self {
        ResolutionError::NotFound {
            reference: reference.to_string(),
            from: from.to_string(),
        }
        .into()
    }

    pub fn syntax(path: PathBuf, message: impl Into<String>) -> Self {
        TransformError::SyntaxError {
            path,
            message: message.into(),
            context: None,
        }
        .into()
    }

    pub fn syntax_with_context(path: PathBuf, message: impl Into<String>, context: ErrorContext) -> Self {
        TransformError::SyntaxError {
            path,
            message: message.into(),
            context: Some(context),
        }
        .into()
    }

    pub fn toolchain(status: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        BuildError::ToolchainFailure {
            status: status.into(),
            diagnostics: diagnostics.into(),
        }
        .into()
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        BuildError::CycleInTransform(message.into()).into()
    }

    pub fn is_toolchain_failure(&self) -> bool {
        matches!(self, KilnError::Build(BuildError::ToolchainFailure { .. }))
    }

    /// Errors a running dev session cannot recover from by waiting for the
    /// next file change.
    pub fn is_fatal_in_dev(&self) -> bool {
        matches!(self, KilnError::Config(_) | KilnError::Server(_) | KilnError::Watch(_))
    }

    /// Format error with enhanced context display
    pub fn format_detailed(&self) -> String {
        match self {
            KilnError::Transform(TransformError::SyntaxError { path, message, context }) => {
                let ctx = context
                    .clone()
                    .unwrap_or_else(|| ErrorContext::new().with_file(path.clone()));
                self.format_error_with_context("Syntax Error", message, &ctx)
            }
            KilnError::Build(BuildError::ToolchainFailure { status, diagnostics }) => {
                format!("❌ Toolchain Error (exit status {}):\n{}", status, diagnostics.trim_end())
            }
            _ => format!("❌ {}", self),
        }
    }

    fn format_error_with_context(&self, error_type: &str, message: &str, ctx: &ErrorContext) -> String {
        let mut output = format!("❌ {}: {}", error_type, message);

        if let Some(ref file_path) = ctx.file_path {
            output.push_str(&format!("\n📁 File: {}", file_path.display()));
        }

        if let (Some(line), Some(column)) = (ctx.line, ctx.column) {
            output.push_str(&format!("\n📍 Location: line {}, column {}", line, column));
        }

        if let Some(ref snippet) = ctx.code_snippet {
            output.push_str(&format!(
                "\n📝 Code:\n{}",
                Self::format_code_snippet(snippet, ctx.line)
            ));
        }

        output
    }

    fn format_code_snippet(snippet: &str, error_line: Option<usize>) -> String {
        let mut output = String::new();

        for (i, line) in snippet.lines().enumerate() {
            let line_num = i + 1;
            if error_line == Some(line_num) {
                output.push_str(&format!("→ {:3} │ {}\n", line_num, line));
                output.push_str(&format!("     │ {}\n", "^".repeat(line.trim_end().len().clamp(1, 60))));
            } else {
                output.push_str(&format!("  {:3} │ {}\n", line_num, line));
            }
        }

        output
    }
}

pub type Result<T> = std::result::Result<T, KilnError>;

impl From<regex::Error> for KilnError {
    fn from(err: regex::Error) -> Self {
        KilnError::Config(format!("Regex error: {}", err))
    }
}

impl From<serde_json::Error> for KilnError {
    fn from(err: serde_json::Error) -> Self {
        KilnError::Config(format!("JSON error: {}", err))
    }
}

impl From<notify::Error> for KilnError {
    fn from(err: notify::Error) -> Self {
        KilnError::Watch(err.to_string())
    }
}
