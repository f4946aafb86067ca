use std::{io::ErrorKind, path::Path};

use axum::body::Body as AxumBody;
use eyre::WrapErr;
use http::HeaderValue;
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::{
    core::{error::PreviewError, paths::ServerRoot},
    ports::file_system::{FileSystem, FileSystemError},
};

/// File system adapter using tower-http ServeDir for static file serving
#[derive(Debug, Clone)]
pub struct FileSystemAdapter {
    append_index_html: bool,
}

impl FileSystemAdapter {
    pub fn new() -> Self {
        Self {
            append_index_html: true,
        }
    }

    /// Serve `index.html` for directory requests (never a listing).
    pub fn with_index_html(mut self, enabled: bool) -> Self {
        self.append_index_html = enabled;
        self
    }

    /// The I/O error behind a 404 for a path that does exist on disk.
    ///
    /// `ServeDir` answers 404 for anything it cannot open, including files
    /// the process has no permission to read.
    async fn read_failure(&self, resolved: &Path) -> Option<std::io::Error> {
        let target = match tokio::fs::metadata(resolved).await {
            Ok(meta) if meta.is_file() => resolved.to_path_buf(),
            Ok(meta) if meta.is_dir() && self.append_index_html => resolved.join("index.html"),
            Ok(_) => return None,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return Some(e),
            Err(_) => return None,
        };

        match tokio::fs::File::open(&target).await {
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => Some(e),
        }
    }
}

impl Default for FileSystemAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_file(
        &self,
        root: &ServerRoot,
        resolved: &Path,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, FileSystemError> {
        let path = req.uri().path().to_string();
        let serve_dir =
            ServeDir::new(root.path()).append_index_html_on_directories(self.append_index_html);

        let response = serve_dir
            .oneshot(req)
            .await
            .wrap_err("ServeDir failed to serve file")
            .map_err(|e| {
                FileSystemError::IoError(std::io::Error::other(format!("ServeDir error: {e}")))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            if let Some(source) = self.read_failure(resolved).await {
                let err = PreviewError::Read(source);
                tracing::error!("Failed to read {} under {}: {}", path, root, err);
                return Ok(internal_error());
            }
        }

        if response.status() == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Failed to read {} under {}", path, root);
        }

        let (parts, tower_body) = response.into_parts();
        let axum_body = AxumBody::new(tower_body.map_err(|e| {
            tracing::error!("Error reading static file body: {}", e);
            axum::Error::new(e)
        }));

        Ok(Response::from_parts(parts, axum_body))
    }
}

fn internal_error() -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from("Internal Server Error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Content type for a request path, inferred from its extension.
pub fn content_type_for(path: &str) -> HeaderValue {
    let mime = mime_guess::from_path(Path::new(path)).first_or_octet_stream();
    HeaderValue::from_str(mime.as_ref())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}
