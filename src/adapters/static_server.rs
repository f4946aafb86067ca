//! Loopback static server for a single root.
//!
//! A server binds an ephemeral port, serves files below its root and routes
//! requests to filtered paths through the shared [`InterceptionPipeline`].
//! Lifecycle: `Created → Listening → Closing → Closed`. Closing stops the
//! accept loop immediately and lets in-flight requests finish, bounded by the
//! drain timeout.
use std::{
    collections::HashSet,
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header},
    response::Response,
    routing::any,
};
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
    task::JoinHandle,
};
use tracing::Instrument;

use crate::{
    adapters::file_system::{FileSystemAdapter, content_type_for},
    config::models::PreviewConfig,
    core::{
        error::{PreviewError, PreviewResult},
        interception::{FilterOutcome, InterceptionPipeline, ResponseOverride},
        paths::{ServerRoot, decode_request_path, resolve_request_path},
    },
    ports::{
        file_system::FileSystem,
        managed_server::{ManagedServer, ServerInfo},
    },
    tracing_setup,
    utils::RequestTracker,
};

/// Lifecycle state of a [`StaticServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Closing,
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Created => "created",
            ServerState::Listening => "listening",
            ServerState::Closing => "closing",
            ServerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Settings shared by every static server of a manager.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_address: IpAddr,
    pub drain_timeout: Duration,
    pub append_index_html: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            drain_timeout: Duration::from_secs(5),
            append_index_html: true,
        }
    }
}

impl From<&PreviewConfig> for ServerOptions {
    fn from(config: &PreviewConfig) -> Self {
        Self {
            bind_address: config.bind_ip(),
            drain_timeout: Duration::from_millis(config.server.drain_timeout_ms),
            append_index_html: config.server.append_index_html,
        }
    }
}

/// Per-request state shared between the server handle and its handler.
struct ServeContext {
    root: ServerRoot,
    filtered_paths: ArcSwap<HashSet<String>>,
    pipeline: Arc<InterceptionPipeline>,
    file_system: FileSystemAdapter,
    tracker: RequestTracker,
}

/// A running static file server bound to one root.
pub struct StaticServer {
    context: Arc<ServeContext>,
    local_addr: SocketAddr,
    drain_timeout: Duration,
    state: watch::Sender<ServerState>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StaticServer {
    /// Bind an ephemeral loopback port for `root` and start serving.
    pub async fn bind(
        root: ServerRoot,
        options: &ServerOptions,
        pipeline: Arc<InterceptionPipeline>,
    ) -> PreviewResult<Arc<Self>> {
        let (state, _) = watch::channel(ServerState::Created);
        let bind_error = |source| PreviewError::Bind {
            root: root.key().to_string(),
            source,
        };

        if !options.bind_address.is_loopback() {
            return Err(bind_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a loopback address", options.bind_address),
            )));
        }

        let listener = TcpListener::bind(SocketAddr::new(options.bind_address, 0))
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let context = Arc::new(ServeContext {
            root,
            filtered_paths: ArcSwap::from_pointee(HashSet::new()),
            pipeline,
            file_system: FileSystemAdapter::new().with_index_html(options.append_index_html),
            tracker: RequestTracker::new(),
        });

        let app = Router::new()
            .route("/", any(handle_request))
            .route("/{*path}", any(handle_request))
            .with_state(context.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server_root = context.root.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!("Static server for {} stopped with error: {}", server_root, e);
            }
        });

        state.send_replace(ServerState::Listening);
        tracing::info!(
            "Static server for {} listening on {}",
            context.root,
            local_addr
        );

        Ok(Arc::new(Self {
            context,
            local_addr,
            drain_timeout: options.drain_timeout,
            state,
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> usize {
        self.context.tracker.active()
    }

    /// Replace the whole set of filtered request paths.
    pub fn set_filtered_paths<I, P>(&self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let set: HashSet<String> = paths
            .into_iter()
            .map(|path| normalize_filtered_path(path.as_ref()))
            .collect();
        tracing::info!(
            "Filtering {} path(s) for {}",
            set.len(),
            self.context.root
        );
        self.context.filtered_paths.store(Arc::new(set));
    }

    /// Currently filtered paths, sorted.
    pub fn filtered_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.context.filtered_paths.load().iter().cloned().collect();
        paths.sort();
        paths
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[async_trait]
impl ManagedServer for StaticServer {
    fn root(&self) -> &ServerRoot {
        &self.context.root
    }

    fn info(&self) -> ServerInfo {
        ServerInfo::from_socket_addr(self.local_addr)
    }

    async fn close(&self) {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(shutdown) = shutdown else {
            // Someone else is closing; wait for them to finish.
            let mut state = self.state.subscribe();
            let _ = state.wait_for(|s| *s == ServerState::Closed).await;
            return;
        };

        self.state.send_replace(ServerState::Closing);
        tracing::info!(
            "Closing static server for {} ({} request(s) in flight)",
            self.context.root,
            self.in_flight()
        );
        let _ = shutdown.send(());

        if let Some(mut task) = self.take_task() {
            if tokio::time::timeout(self.drain_timeout, &mut task)
                .await
                .is_err()
            {
                tracing::warn!(
                    "Static server for {} did not drain within {:?}, aborting {} request(s)",
                    self.context.root,
                    self.drain_timeout,
                    self.in_flight()
                );
                task.abort();
            }
        }

        self.state.send_replace(ServerState::Closed);
        tracing::info!(
            "Static server for {} closed after {} request(s)",
            self.context.root,
            self.context.tracker.total()
        );
    }
}

impl fmt::Debug for StaticServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticServer")
            .field("root", &self.context.root.key())
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

fn normalize_filtered_path(path: &str) -> String {
    let decoded = decode_request_path(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|| path.to_string());
    if decoded.starts_with('/') {
        decoded
    } else {
        format!("/{decoded}")
    }
}

async fn handle_request(State(context): State<Arc<ServeContext>>, req: Request) -> Response {
    let _in_flight = context.tracker.track();
    let started = Instant::now();
    let span = tracing_setup::create_request_span(
        req.method().as_str(),
        req.uri().path(),
        context.root.key(),
    );

    async move {
        let response = context.respond(req).await;
        let span = tracing::Span::current();
        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", started.elapsed().as_millis() as u64);
        tracing::debug!("Responded {}", response.status());
        response
    }
    .instrument(span)
    .await
}

impl ServeContext {
    async fn respond(&self, req: Request) -> Response {
        let raw_path = req.uri().path().to_string();

        let resolved = match resolve_request_path(&self.root, &raw_path).await {
            Ok(resolved) => {
                tracing::debug!("Resolved {} to {}", raw_path, resolved.display());
                resolved
            }
            Err(PreviewError::PathTraversal(_)) => {
                tracing::warn!("Rejected path traversal attempt: {}", raw_path);
                return status_response(StatusCode::FORBIDDEN, "Forbidden");
            }
            Err(e) => {
                tracing::debug!("Unresolvable request path {}: {}", raw_path, e);
                return status_response(StatusCode::NOT_FOUND, "Not Found");
            }
        };

        let filtered = decode_request_path(&raw_path)
            .is_some_and(|decoded| self.filtered_paths.load().contains(decoded.as_ref()));

        let req = if filtered {
            let (parts, body) = req.into_parts();
            match self.pipeline.intercept(&self.root, &parts).await {
                FilterOutcome::Override(over) => return override_response(over, &raw_path),
                FilterOutcome::Fallback(reason) => {
                    tracing::debug!("Serving {} unmodified ({:?})", raw_path, reason);
                    Request::from_parts(parts, body)
                }
            }
        } else {
            req
        };

        match self.file_system.serve_file(&self.root, &resolved, req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Failed to serve {} under {}: {}", raw_path, self.root, e);
                status_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

fn override_response(over: ResponseOverride, request_path: &str) -> Response {
    let mut response = Response::new(Body::from(over.body));
    *response.status_mut() = over.status;
    *response.headers_mut() = over.headers;
    if !response.headers().contains_key(header::CONTENT_TYPE) {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type_for(request_path));
    }
    response
}

fn status_response(status: StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::core::interception::InterceptionTimeout;

    async fn bind_test_server(dir: &TempDir) -> Arc<StaticServer> {
        let root = ServerRoot::canonicalize(dir.path()).unwrap();
        let pipeline = Arc::new(InterceptionPipeline::new(InterceptionTimeout::After(
            Duration::from_millis(100),
        )));
        StaticServer::bind(root, &ServerOptions::default(), pipeline)
            .await
            .unwrap()
    }

    #[test]
    fn test_normalize_filtered_path() {
        assert_eq!(normalize_filtered_path("/index.txt"), "/index.txt");
        assert_eq!(normalize_filtered_path("index.txt"), "/index.txt");
        assert_eq!(normalize_filtered_path("/a%20b.html"), "/a b.html");
    }

    #[test]
    fn test_override_response_infers_content_type() {
        let response = override_response(ResponseOverride::new("<p>x</p>"), "/page.html");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");

        let response = override_response(
            ResponseOverride::new("{}")
                .with_status(StatusCode::ACCEPTED)
                .with_header(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/json"),
                ),
            "/page.html",
        );
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let dir = TempDir::new().unwrap();
        let server = bind_test_server(&dir).await;

        assert_eq!(server.state(), ServerState::Listening);
        assert!(server.local_addr().ip().is_loopback());
        assert!(server.info().port > 0);
        assert_eq!(server.in_flight(), 0);

        server.close().await;
        assert_eq!(server.state(), ServerState::Closed);

        // Closing twice is harmless.
        server.close().await;
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn test_refuses_non_loopback_address() {
        let dir = TempDir::new().unwrap();
        let root = ServerRoot::canonicalize(dir.path()).unwrap();
        let options = ServerOptions {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ..ServerOptions::default()
        };
        let pipeline = Arc::new(InterceptionPipeline::new(InterceptionTimeout::default()));

        let err = StaticServer::bind(root, &options, pipeline).await.unwrap_err();
        assert!(matches!(err, PreviewError::Bind { .. }));
        assert!(err.to_string().contains("not a loopback address"));
    }

    #[tokio::test]
    async fn test_filtered_paths_are_replaced() {
        let dir = TempDir::new().unwrap();
        let server = bind_test_server(&dir).await;

        server.set_filtered_paths(["/a.html", "/b.html"]);
        assert_eq!(server.filtered_paths(), vec!["/a.html", "/b.html"]);

        server.set_filtered_paths(["/c.html"]);
        assert_eq!(server.filtered_paths(), vec!["/c.html"]);

        server.set_filtered_paths(Vec::<String>::new());
        assert!(server.filtered_paths().is_empty());

        server.close().await;
    }
}
