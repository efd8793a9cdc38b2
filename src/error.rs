//! Error types for the tema metadata core.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the metadata core.
///
/// Errors inside a single test abort materialization of that test but not of
/// its siblings; errors in policy loading or in the global context abort the
/// whole run.
#[derive(Error, Debug)]
pub enum Error {
    /// A value violates a key's declared type.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A constraint string, `when` expression or template cannot be parsed.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Well-formed input that is internally inconsistent.
    #[error("Semantic error: {0}")]
    Semantic(String),

    /// Policy file outside the configured root, or symbolic name not found.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// Template evaluation or re-parse failure.
    #[error("Render error in policy rule #{rule}, key '{key}': {message}")]
    Render {
        rule: usize,
        key: String,
        message: String,
    },

    /// Custom result file malformed or violating the schema.
    #[error("Result error: {0}")]
    ResultFile(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Create a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    /// Create a semantic error.
    pub fn semantic(message: impl Into<String>) -> Self {
        Self::Semantic(message.into())
    }

    /// Create a resolution error.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution(message.into())
    }

    /// Create a render error naming the offending rule and key.
    pub fn render(rule: usize, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            rule,
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a result file error.
    pub fn result_file(message: impl Into<String>) -> Self {
        Self::ResultFile(message.into())
    }
}

/// A recoverable oddity collected during materialization.
///
/// Warnings are reported to the caller without failing the run: impossible
/// hardware constraints, unknown leaf paths, skipped adjust rules and the
/// like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}
