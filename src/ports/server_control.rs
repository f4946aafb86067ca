use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    core::{error::PreviewResult, interception::RequestStream},
    ports::managed_server::ServerInfo,
};

/// One live server as reported by [`ServerControl::servers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub root: String,
    pub address: String,
    pub port: u16,
}

impl ServerSummary {
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

/// Control surface for starting, stopping and configuring static servers.
///
/// Every root argument is canonicalised before use, so `/srv/site` and
/// `/srv/site/` address the same server.
#[async_trait]
pub trait ServerControl: Send + Sync {
    /// Start serving `root`, or return the running server for it.
    async fn get_server(&self, root: &str) -> PreviewResult<ServerInfo>;

    /// Stop the server for `root`. Succeeds when none is running.
    async fn close_server(&self, root: &str) -> PreviewResult<()>;

    /// Replace the set of request paths routed through interception.
    async fn set_filtered_paths(&self, root: &str, paths: Vec<String>) -> PreviewResult<()>;

    /// Negative restores the default, `0` disables the timeout.
    async fn set_interception_timeout(&self, timeout_ms: i64) -> PreviewResult<()>;

    /// Live servers, in no particular order.
    async fn servers(&self) -> PreviewResult<Vec<ServerSummary>>;

    /// Receive an event for every filtered request until the stream is dropped.
    async fn subscribe_requests(&self) -> PreviewResult<RequestStream>;

    /// Whether commands can still reach the manager.
    fn is_connected(&self) -> bool;
}
