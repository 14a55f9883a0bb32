//! Error types for declarative operations.
//!
//! Errors are categorized so the transaction engine can tell structural
//! problems (abort the whole run) from per-instance ones (mark the instance
//! failed and keep going), and decide what is worth retrying.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for declarative operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of errors for run-policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The configuration as a whole is invalid (duplicate types, cycles).
    Structural,
    /// A single declaration is invalid.
    Validation,
    /// No usable provider, or the provider cannot find what it needs.
    Provider,
    /// An external command failed or timed out.
    Command,
    /// Filesystem error.
    Io,
}

impl ErrorCategory {
    /// Whether errors of this category abort the run before any enactment.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Structural)
    }

    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Command)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Structural => "Invalid configuration structure",
            Self::Validation => "Invalid resource declaration",
            Self::Provider => "Provider unavailable",
            Self::Command => "Command failed",
            Self::Io => "Filesystem error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while defining types, building catalogs or
/// converging resources.
#[derive(Debug, Error)]
pub enum Error {
    /// A resource type was registered twice.
    #[error("resource type '{0}' is already defined")]
    DuplicateType(String),

    /// A provider was registered twice for the same type.
    #[error("provider '{provider}' is already registered for type '{type_name}'")]
    DuplicateProvider {
        /// Owning type
        type_name: String,
        /// Provider name
        provider: String,
    },

    /// The named type has not been defined.
    #[error("unknown resource type '{0}'")]
    UnknownType(String),

    /// A declaration carried a bad attribute.
    #[error("{resource}: invalid attribute '{attribute}': {message}")]
    Validation {
        /// Resource reference, e.g. `Service[nginx]`
        resource: String,
        /// Offending attribute
        attribute: String,
        /// What is wrong with it
        message: String,
    },

    /// The ordering edges form a cycle.
    #[error("dependency cycle detected: {}", .cycle.join(" => "))]
    CyclicDependency {
        /// Resources on the cycle, first element repeated at the end
        cycle: Vec<String>,
    },

    /// No registered provider passed confinement.
    #[error("no suitable provider for {resource} (tried: {})", display_tried(.tried))]
    NoSuitableProvider {
        /// Resource reference
        resource: String,
        /// Providers that were considered
        tried: Vec<String>,
    },

    /// A command could not be found in any search directory.
    #[error("could not find command '{name}' in {}", display_paths(.paths))]
    CommandNotFound {
        /// Command name
        name: String,
        /// Directories that were searched
        paths: Vec<PathBuf>,
    },

    /// A command ran but exited unsuccessfully.
    #[error("command '{command}' failed")]
    CommandFailed {
        /// The full command line
        command: String,
    },

    /// A command did not finish in time and was killed.
    #[error("command '{command}' timed out after {seconds}s")]
    CommandTimeout {
        /// The full command line
        command: String,
        /// Timeout that elapsed
        seconds: u64,
    },

    /// A provider does not implement the requested property.
    #[error("provider '{provider}' cannot manage property '{property}'")]
    Unsupported {
        /// Provider name
        provider: String,
        /// Property name
        property: String,
    },

    /// An upstream dependency failed, so this resource was not attempted.
    #[error("dependency {0} failed")]
    DependencyFailed(String),

    /// IO error during file operations.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the error
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

fn display_tried(tried: &[String]) -> String {
    if tried.is_empty() {
        "none".to_string()
    } else {
        tried.join(", ")
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "(no search path)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

impl Error {
    /// Create an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a validation error.
    pub fn validation(
        resource: impl Into<String>,
        attribute: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateType(_) | Error::DuplicateProvider { .. } => ErrorCategory::Structural,
            Error::CyclicDependency { .. } => ErrorCategory::Structural,
            Error::UnknownType(_) | Error::Validation { .. } => ErrorCategory::Validation,
            Error::NoSuitableProvider { .. }
            | Error::CommandNotFound { .. }
            | Error::Unsupported { .. }
            | Error::DependencyFailed(_) => ErrorCategory::Provider,
            Error::CommandFailed { .. } | Error::CommandTimeout { .. } => ErrorCategory::Command,
            Error::Io { .. } => ErrorCategory::Io,
        }
    }

    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}
