//! Error types for modsec-provision.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for modsec-provision operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The OS facts do not describe a supported platform.
    #[error("unsupported platform: {message}")]
    UnsupportedPlatform {
        /// What was wrong with the facts.
        message: String,
    },

    /// A parameter value is invalid or inconsistent with another one.
    #[error("invalid value for '{field}': {message}")]
    Validation {
        /// Parameter name as written in the parameter file.
        field: String,
        /// Error message.
        message: String,
    },

    /// The package tool failed to query or install a package.
    #[error("failed to install package {package}: {message}")]
    PackageInstall {
        /// Package name.
        package: String,
        /// Error message (tool output or spawn failure).
        message: String,
    },

    /// A filesystem operation failed while converging a resource.
    #[error("filesystem operation on {} failed: {source}", .path.display())]
    Filesystem {
        /// Path of the resource being converged.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Ownership could not be resolved or applied.
    #[error("cannot set ownership of {}: {message}", .path.display())]
    Ownership {
        /// Path of the resource.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Error reading a parameter file.
    #[error("failed to read parameter file {}: {source}", .path.display())]
    ConfigLoad {
        /// Path to the file that failed to load.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Error decoding a parameter file.
    #[error("invalid parameter file {location}: {message}")]
    ConfigParse {
        /// File path, or `<inline>` for string input.
        location: String,
        /// Error message.
        message: String,
    },

    /// Error parsing ModSecurity configuration text.
    #[error("parse error at {location}: {message}")]
    Parse {
        /// Human-readable error message.
        message: String,
        /// Location in the source (file:line:col or line:col).
        location: String,
    },
}

impl Error {
    /// Create a validation error for a named parameter.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error raised while touching `path`.
    pub fn filesystem(path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Create a parse error with location information.
    pub fn parse(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            location: location.into(),
        }
    }

    /// Whether this error was caused by invalid parameters.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// Source location for error reporting.
#[derive(Debug, Clone, Default)]
pub struct SourceLocation {
    /// File path (if known).
    pub file: Option<PathBuf>,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref file) = self.file {
            write!(f, "{}:{}:{}", file.display(), self.line, self.column)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}
