//! Error types for bundlewright.
//!
//! Library crates use [`BundleError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all bundle assembly operations.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// The same name was registered twice in one registry.
    #[error("conflict in bundle \"{bundle}\": several {registry} \"{name}\"")]
    DuplicateName {
        bundle: String,
        registry: String,
        name: String,
    },

    /// An auxiliary output path collides with another file or directory.
    #[error("name conflict at {path:?}: {message}")]
    NameConflict { path: PathBuf, message: String },

    /// A content transform rejected its input.
    #[error("{kind} transform failed for {path:?}: {message}")]
    Transform {
        kind: String,
        path: PathBuf,
        message: String,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Data validation error (bad plan file, serialization failure, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Operation not allowed in the assembler's current state.
    #[error("invalid state: {message}")]
    State { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BundleError>;

impl BundleError {
    /// Create a duplicate-name error for one registry of a bundle.
    pub fn duplicate(
        bundle: impl Into<String>,
        registry: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::DuplicateName {
            bundle: bundle.into(),
            registry: registry.into(),
            name: name.into(),
        }
    }

    /// Create a name conflict error for an output path.
    pub fn name_conflict(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::NameConflict {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a transform error for one fragment.
    pub fn transform(
        kind: impl std::fmt::Display,
        path: impl Into<PathBuf>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Transform {
            kind: kind.to_string(),
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a state error from any displayable message.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
