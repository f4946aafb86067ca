//! Preview capability for the active project.
//!
//! The provider answers "can this file be previewed" synchronously and maps
//! project files to URLs on the project's static server. It only answers
//! `true` once the server for the project root is up.
use std::{
    path::{Component, Path},
    sync::Arc,
};

use arc_swap::ArcSwapOption;

use crate::{
    config::models::ProjectConfig,
    core::{
        error::{PreviewError, PreviewResult},
        interception::RequestStream,
        paths::ServerRoot,
    },
    ports::{managed_server::ServerInfo, server_control::ServerControl},
};

pub struct StaticServerProvider {
    control: Arc<dyn ServerControl>,
    project: ArcSwapOption<ServerRoot>,
    server: ArcSwapOption<ServerInfo>,
    extensions: Vec<String>,
}

impl StaticServerProvider {
    /// Provider previewing `.htm` / `.html` files.
    pub fn new(control: Arc<dyn ServerControl>) -> Self {
        Self::with_extensions(control, ["htm", "html"])
    }

    pub fn with_extensions<I, E>(control: Arc<dyn ServerControl>, extensions: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        Self {
            control,
            project: ArcSwapOption::empty(),
            server: ArcSwapOption::empty(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Build from the `[project]` section, setting the root when configured.
    pub fn from_config(
        control: Arc<dyn ServerControl>,
        project: &ProjectConfig,
    ) -> PreviewResult<Self> {
        let provider = Self::with_extensions(control, &project.preview_extensions);
        if let Some(root) = &project.root {
            provider.set_project_root(root)?;
        }
        Ok(provider)
    }

    /// Switch to another project. The new project is not servable until
    /// [`ready_to_serve`](Self::ready_to_serve) succeeds.
    pub fn set_project_root(&self, root: impl AsRef<Path>) -> PreviewResult<()> {
        let root = ServerRoot::canonicalize(root)?;
        tracing::info!("Preview project root set to {}", root);
        self.project.store(Some(Arc::new(root)));
        self.server.store(None);
        Ok(())
    }

    pub fn project_root(&self) -> Option<ServerRoot> {
        self.project.load_full().map(|root| ServerRoot::clone(&root))
    }

    /// Start (or reuse) the static server for the project root.
    pub async fn ready_to_serve(&self) -> PreviewResult<ServerInfo> {
        let project = self
            .project
            .load_full()
            .ok_or_else(|| PreviewError::NotFound("no project root set".to_string()))?;
        let info = self.control.get_server(project.key()).await?;

        // The project may have changed while the server was starting.
        let current = self.project.load();
        if current.as_deref() == Some(&*project) {
            self.server.store(Some(Arc::new(info.clone())));
        }
        Ok(info)
    }

    /// Stop the project's server.
    pub async fn stop_serving(&self) -> PreviewResult<()> {
        let Some(project) = self.project.load_full() else {
            return Ok(());
        };
        self.server.store(None);
        self.control.close_server(project.key()).await
    }

    /// Whether `path` can be previewed through the project's server.
    pub fn can_serve(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        if !self.control.is_connected() || self.server.load().is_none() {
            return false;
        }
        let Some(project) = self.project.load_full() else {
            return false;
        };

        if path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        if path == project.path() {
            return true;
        }
        if !path.starts_with(project.path()) {
            return false;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    /// `http://address:port/` of the project's server.
    pub fn base_url(&self) -> Option<String> {
        self.server.load_full().map(|info| info.base_url())
    }

    /// Preview URL for a project file, if it can be served.
    pub fn url_for(&self, path: impl AsRef<Path>) -> Option<String> {
        let path = path.as_ref();
        if !self.can_serve(path) {
            return None;
        }
        let project = self.project.load_full()?;
        let base = self.base_url()?;
        let relative = path.strip_prefix(project.path()).ok()?;

        let encoded: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(segment) => {
                    Some(urlencoding::encode(&segment.to_string_lossy()).into_owned())
                }
                _ => None,
            })
            .collect();
        Some(format!("{base}{}", encoded.join("/")))
    }

    /// Filtered requests, answered through each event's `response` handle.
    pub async fn requests(&self) -> PreviewResult<RequestStream> {
        self.control.subscribe_requests().await
    }
}
