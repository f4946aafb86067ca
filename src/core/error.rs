use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the server registry and its control surface.
///
/// None of these are process-fatal: each is scoped to a single command
/// invocation or a single request. A second `send` on an already resolved
/// request is not an error at all and therefore has no variant here.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PreviewError {
    /// Binding the loopback listener for a root failed
    #[error("Failed to bind static server for {root}: {source}")]
    Bind {
        root: String,
        #[source]
        source: std::io::Error,
    },

    /// No server (or no folder) exists for the given root
    #[error("Not found: {0}")]
    NotFound(String),

    /// The root cannot be used as a serving root (not a directory, bad path)
    #[error("Invalid root '{root}': {reason}")]
    InvalidRoot { root: String, reason: String },

    /// A request path resolved outside of the server root
    #[error("Path escapes server root: {}", .0.display())]
    PathTraversal(PathBuf),

    /// Reading an otherwise valid file failed
    #[error("Read error: {0}")]
    Read(#[from] std::io::Error),

    /// The command channel to the server manager is gone
    #[error("Control channel disconnected")]
    Disconnected,
}

/// Result alias used throughout the core
pub type PreviewResult<T> = Result<T, PreviewError>;

impl PreviewError {
    /// Short machine-readable name, used by the control API and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PreviewError::Bind { .. } => "bind_failure",
            PreviewError::NotFound(_) => "not_found",
            PreviewError::InvalidRoot { .. } => "invalid_root",
            PreviewError::PathTraversal(_) => "path_traversal",
            PreviewError::Read(_) => "read_failure",
            PreviewError::Disconnected => "disconnected",
        }
    }
}
