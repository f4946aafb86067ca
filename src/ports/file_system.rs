use std::path::Path;

use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::core::paths::ServerRoot;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// FileSystem defines the port (interface) for serving files under a root
pub trait FileSystem: Send + Sync + 'static {
    /// Serve the file addressed by the request URI
    ///
    /// # Arguments
    /// * `root` - The folder to serve files from
    /// * `resolved` - Where the request path resolved to under `root`
    /// * `req` - The HTTP request; its path has already been checked against `root`
    ///
    /// # Returns
    /// A future that resolves to the file response. Missing files and read
    /// errors are expressed as 404 / 500 responses, not as `Err`.
    fn serve_file(
        &self,
        root: &ServerRoot,
        resolved: &Path,
        req: Request<AxumBody>,
    ) -> impl std::future::Future<Output = FileSystemResult<Response<AxumBody>>> + Send;
}
