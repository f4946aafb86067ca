//! Server manager: the in-process control surface.
//!
//! `ServerManager` ties the [`PathRegistry`] to real [`StaticServer`]s and a
//! single [`InterceptionPipeline`] shared by all of them. Every root argument
//! is canonicalised before it reaches the registry, so spelling variants of a
//! folder always map to the same server.
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    adapters::static_server::{ServerOptions, StaticServer},
    config::models::PreviewConfig,
    core::{
        error::{PreviewError, PreviewResult},
        interception::{
            InterceptionPipeline, InterceptionTimeout, RequestEvent, RequestStream, Subscription,
        },
        paths::ServerRoot,
        registry::PathRegistry,
    },
    ports::{
        managed_server::{ManagedServer, ServerInfo},
        server_control::{ServerControl, ServerSummary},
    },
};

/// Owns every static server of the process. Cheap to share behind an `Arc`.
pub struct ServerManager {
    registry: PathRegistry<StaticServer>,
    pipeline: Arc<InterceptionPipeline>,
    options: ServerOptions,
}

impl ServerManager {
    pub fn new(options: ServerOptions, timeout: InterceptionTimeout) -> Self {
        Self {
            registry: PathRegistry::new(),
            pipeline: Arc::new(InterceptionPipeline::new(timeout)),
            options,
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new(ServerOptions::from(config), config.interception.timeout())
    }

    /// Start serving `root`, or return the server already serving it.
    pub async fn get_server(&self, root: &str) -> PreviewResult<ServerInfo> {
        let root = ServerRoot::canonicalize(root)?;
        let options = &self.options;
        let pipeline = self.pipeline.clone();
        let server = self
            .registry
            .get_or_create(root, |root| StaticServer::bind(root, options, pipeline))
            .await?;
        Ok(server.info())
    }

    /// Look up a running server without starting one.
    pub async fn find_server(&self, root: &str) -> PreviewResult<Option<Arc<StaticServer>>> {
        let root = ServerRoot::canonicalize(root)?;
        Ok(self.registry.get(root.key()).await)
    }

    /// Stop the server for `root`. Unknown or already closed roots succeed.
    pub async fn close_server(&self, root: &str) -> PreviewResult<()> {
        let key = match ServerRoot::canonicalize(root) {
            Ok(root) => root.key().to_string(),
            // A deleted folder may still have a live server under its old key.
            Err(PreviewError::NotFound(_)) => root_key_lossy(root),
            Err(e) => return Err(e),
        };
        if !self.registry.close(&key).await {
            tracing::debug!("No server running for {}", key);
        }
        Ok(())
    }

    /// Replace the filtered request paths of the server for `root`.
    pub async fn set_filtered_paths<I, P>(&self, root: &str, paths: I) -> PreviewResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let server = self
            .find_server(root)
            .await?
            .ok_or_else(|| PreviewError::NotFound(format!("no server running for {root}")))?;
        server.set_filtered_paths(paths);
        Ok(())
    }

    /// Negative restores the default, `0` disables the timeout.
    pub fn set_interception_timeout(&self, timeout_ms: i64) {
        self.pipeline
            .set_timeout(InterceptionTimeout::from_millis(timeout_ms));
    }

    pub fn interception_timeout(&self) -> InterceptionTimeout {
        self.pipeline.timeout()
    }

    /// Register a synchronous callback for every filtered request.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&RequestEvent) + Send + Sync + 'static,
    {
        self.pipeline.subscribe(callback)
    }

    /// Receive filtered requests through a channel.
    pub fn requests(&self) -> RequestStream {
        self.pipeline.stream()
    }

    pub async fn servers(&self) -> Vec<ServerSummary> {
        self.registry
            .servers()
            .await
            .iter()
            .map(|server| {
                let info = server.info();
                ServerSummary {
                    root: server.root().key().to_string(),
                    address: info.address,
                    port: info.port,
                }
            })
            .collect()
    }

    /// Close every server, waiting for each to drain.
    pub async fn close_all(&self) -> usize {
        let closed = self.registry.close_all().await;
        tracing::info!("Closed {} static server(s)", closed);
        closed
    }
}

impl Default for ServerManager {
    fn default() -> Self {
        Self::new(ServerOptions::default(), InterceptionTimeout::default())
    }
}

/// Registry key for a root that can no longer be canonicalised.
fn root_key_lossy(root: &str) -> String {
    let trimmed = root.trim_end_matches(std::path::MAIN_SEPARATOR);
    format!("{trimmed}{}", std::path::MAIN_SEPARATOR)
}

#[async_trait]
impl ServerControl for ServerManager {
    async fn get_server(&self, root: &str) -> PreviewResult<ServerInfo> {
        ServerManager::get_server(self, root).await
    }

    async fn close_server(&self, root: &str) -> PreviewResult<()> {
        ServerManager::close_server(self, root).await
    }

    async fn set_filtered_paths(&self, root: &str, paths: Vec<String>) -> PreviewResult<()> {
        ServerManager::set_filtered_paths(self, root, paths).await
    }

    async fn set_interception_timeout(&self, timeout_ms: i64) -> PreviewResult<()> {
        ServerManager::set_interception_timeout(self, timeout_ms);
        Ok(())
    }

    async fn servers(&self) -> PreviewResult<Vec<ServerSummary>> {
        Ok(ServerManager::servers(self).await)
    }

    async fn subscribe_requests(&self) -> PreviewResult<RequestStream> {
        Ok(self.requests())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn root_of(dir: &TempDir) -> String {
        dir.path().to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_trailing_slash_reuses_server() {
        let dir = TempDir::new().unwrap();
        let manager = ServerManager::default();

        let plain = manager.get_server(&root_of(&dir)).await.unwrap();
        let slashed = manager
            .get_server(&format!("{}/", root_of(&dir)))
            .await
            .unwrap();
        assert_eq!(plain, slashed);
        assert_eq!(manager.servers().await.len(), 1);

        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_missing_root_is_not_found() {
        let manager = ServerManager::default();
        let err = manager
            .get_server("/definitely/not/a/folder")
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::NotFound(_)));
        assert!(manager.servers().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_unknown_root_is_ok() {
        let dir = TempDir::new().unwrap();
        let manager = ServerManager::default();
        manager.close_server(&root_of(&dir)).await.unwrap();
        manager.close_server("/definitely/not/a/folder").await.unwrap();
    }

    #[tokio::test]
    async fn test_filtered_paths_need_a_server() {
        let dir = TempDir::new().unwrap();
        let manager = ServerManager::default();

        let err = manager
            .set_filtered_paths(&root_of(&dir), ["/index.html"])
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::NotFound(_)));

        manager.get_server(&root_of(&dir)).await.unwrap();
        manager
            .set_filtered_paths(&root_of(&dir), ["/index.html"])
            .await
            .unwrap();
        let server = manager.find_server(&root_of(&dir)).await.unwrap().unwrap();
        assert_eq!(server.filtered_paths(), vec!["/index.html"]);

        manager.close_all().await;
    }

    #[tokio::test]
    async fn test_interception_timeout_mapping() {
        let manager = ServerManager::default();

        manager.set_interception_timeout(250);
        assert_eq!(
            manager.interception_timeout(),
            InterceptionTimeout::After(Duration::from_millis(250))
        );

        manager.set_interception_timeout(0);
        assert_eq!(manager.interception_timeout(), InterceptionTimeout::Disabled);

        manager.set_interception_timeout(-1);
        assert_eq!(manager.interception_timeout(), InterceptionTimeout::default());
    }
}
