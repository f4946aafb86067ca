//! Preview server - per-folder loopback static file servers for editor previews.
//!
//! Every folder ("root") gets exactly one static server on an ephemeral
//! loopback port. Requests to paths registered as *filtered* are announced to
//! subscribers before any bytes go out; a subscriber can answer with its own
//! body, release the request to be served from disk, or stay silent and let
//! the configured timeout serve the file anyway.
//!
//! # Features
//! - One server per canonical root, reused on repeated requests for the same folder
//! - Concurrent start/close with per-root serialisation and isolation between roots
//! - Request interception with at-most-once, timeout-bounded responses
//! - Path traversal protection independent of any caller-side checks
//! - In-process, command-channel and HTTP/JSON control surfaces
//! - Preview capability checks and URLs for the active project
//! - Structured tracing, layered configuration and graceful drain on close
//!
//! # Quick Example
//! ```no_run
//! use preview_server::core::{ResponseOverride, ServerManager};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let manager = ServerManager::default();
//! let info = manager.get_server("./site").await?;
//! manager.set_filtered_paths("./site", ["/index.html"]).await?;
//!
//! let _subscription = manager.subscribe(|event| {
//!     if event.location.pathname == "/index.html" {
//!         event.response.send(ResponseOverride::new("<h1>live</h1>"));
//!     }
//! });
//! println!("preview at {}", info.base_url());
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! **ports** hold the traits, **adapters** the axum/tower-http implementations
//! and the control channel, **core** the registry, interception pipeline and
//! manager.
//!
//! # Concurrency & Data Structures
//! The root → server map is an `scc::HashMap` of per-root async slots.
//! Filtered paths, the subscriber list and the timeout are swapped atomically
//! with `arc-swap`, so in-flight requests never observe a half-applied update.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{ControlChannel, ControlHandle, FileSystemAdapter, StaticServer},
    core::{PreviewError, PreviewResult, ServerManager, StaticServerProvider},
    ports::server_control::ServerControl,
    utils::GracefulShutdown,
};
