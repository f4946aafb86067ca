use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::paths::ServerRoot;

/// Where a running static server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub address: String,
    pub port: u16,
}

impl ServerInfo {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// `http://address:port/`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}/", self.address, self.port)
    }
}

/// A server the [`PathRegistry`](crate::core::PathRegistry) can own and stop.
#[async_trait]
pub trait ManagedServer: Send + Sync + 'static {
    /// The folder this server serves
    fn root(&self) -> &ServerRoot;

    /// Address and port the server is bound to
    fn info(&self) -> ServerInfo;

    /// Stop accepting connections and drain in-flight requests.
    ///
    /// Must be safe to call more than once.
    async fn close(&self);
}
