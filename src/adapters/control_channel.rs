//! Command channel in front of a [`ServerManager`].
//!
//! Callers talk to a [`ControlHandle`]; every call becomes a [`Command`]
//! carrying a oneshot reply. The actor owning the manager runs each command on
//! its own task, so a slow bind never holds up unrelated commands.
//!
//! Disconnecting the channel only cuts the callers off. Servers that are
//! already running keep serving, and commands still waiting for a reply fail
//! with [`PreviewError::Disconnected`].
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Instrument;

use crate::{
    core::{
        error::{PreviewError, PreviewResult},
        interception::RequestStream,
        manager::ServerManager,
    },
    ports::{
        managed_server::ServerInfo,
        server_control::{ServerControl, ServerSummary},
    },
    tracing_setup,
};

type Reply<T> = oneshot::Sender<PreviewResult<T>>;

/// Messages to the control actor
pub enum Command {
    GetServer {
        root: String,
        reply: Reply<ServerInfo>,
    },
    CloseServer {
        root: String,
        reply: Reply<()>,
    },
    SetFilteredPaths {
        root: String,
        paths: Vec<String>,
        reply: Reply<()>,
    },
    SetInterceptionTimeout {
        timeout_ms: i64,
        reply: Reply<()>,
    },
    Servers {
        reply: Reply<Vec<ServerSummary>>,
    },
    SubscribeRequests {
        reply: Reply<RequestStream>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::GetServer { .. } => "get_server",
            Command::CloseServer { .. } => "close_server",
            Command::SetFilteredPaths { .. } => "set_filtered_paths",
            Command::SetInterceptionTimeout { .. } => "set_interception_timeout",
            Command::Servers { .. } => "servers",
            Command::SubscribeRequests { .. } => "subscribe_requests",
        }
    }

    async fn execute(self, manager: &ServerManager) {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match self {
            Command::GetServer { root, reply } => {
                let _ = reply.send(manager.get_server(&root).await);
            }
            Command::CloseServer { root, reply } => {
                let _ = reply.send(manager.close_server(&root).await);
            }
            Command::SetFilteredPaths { root, paths, reply } => {
                let _ = reply.send(manager.set_filtered_paths(&root, paths).await);
            }
            Command::SetInterceptionTimeout { timeout_ms, reply } => {
                manager.set_interception_timeout(timeout_ms);
                let _ = reply.send(Ok(()));
            }
            Command::Servers { reply } => {
                let _ = reply.send(Ok(manager.servers().await));
            }
            Command::SubscribeRequests { reply } => {
                let _ = reply.send(Ok(manager.requests()));
            }
        }
    }
}

/// Actor that owns the manager and executes commands.
pub struct ControlChannel {
    manager: Arc<ServerManager>,
    receiver: mpsc::Receiver<Command>,
    connected: watch::Receiver<bool>,
}

impl ControlChannel {
    /// Spawn the actor and return the handle used to reach it.
    pub fn spawn(manager: Arc<ServerManager>, buffer: usize) -> ControlHandle {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let (connected_tx, connected) = watch::channel(true);

        let actor = ControlChannel {
            manager,
            receiver,
            connected,
        };
        tokio::spawn(actor.run());

        ControlHandle {
            sender,
            connected: Arc::new(connected_tx),
        }
    }

    async fn run(mut self) {
        tracing::debug!("Control channel started");
        loop {
            tokio::select! {
                changed = self.connected.changed() => {
                    if changed.is_err() || !*self.connected.borrow() {
                        break;
                    }
                }
                command = self.receiver.recv() => {
                    let Some(command) = command else { break };
                    let manager = self.manager.clone();
                    let span = tracing_setup::create_command_span(command.name());
                    tokio::spawn(
                        async move { command.execute(&manager).await }.instrument(span),
                    );
                }
            }
        }
        // Queued commands are dropped with the receiver; their callers see Disconnected.
        tracing::info!("Control channel disconnected; running servers keep serving");
    }
}

/// Cloneable client side of a [`ControlChannel`].
#[derive(Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<Command>,
    connected: Arc<watch::Sender<bool>>,
}

impl ControlHandle {
    /// Cut every handle off from the manager.
    pub fn disconnect(&self) {
        if self.connected.send_replace(false) {
            tracing::info!("Disconnecting control channel");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> PreviewResult<T> {
        if !self.is_connected() {
            return Err(PreviewError::Disconnected);
        }

        let (reply, response) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| PreviewError::Disconnected)?;

        tokio::select! {
            result = response => result.map_err(|_| PreviewError::Disconnected)?,
            _ = wait_for_disconnect(self.connected.subscribe()) => Err(PreviewError::Disconnected),
        }
    }
}

async fn wait_for_disconnect(mut connected: watch::Receiver<bool>) {
    while *connected.borrow_and_update() {
        if connected.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl ServerControl for ControlHandle {
    async fn get_server(&self, root: &str) -> PreviewResult<ServerInfo> {
        let root = root.to_string();
        self.request(|reply| Command::GetServer { root, reply }).await
    }

    async fn close_server(&self, root: &str) -> PreviewResult<()> {
        let root = root.to_string();
        self.request(|reply| Command::CloseServer { root, reply }).await
    }

    async fn set_filtered_paths(&self, root: &str, paths: Vec<String>) -> PreviewResult<()> {
        let root = root.to_string();
        self.request(|reply| Command::SetFilteredPaths { root, paths, reply }).await
    }

    async fn set_interception_timeout(&self, timeout_ms: i64) -> PreviewResult<()> {
        self.request(|reply| Command::SetInterceptionTimeout { timeout_ms, reply }).await
    }

    async fn servers(&self) -> PreviewResult<Vec<ServerSummary>> {
        self.request(|reply| Command::Servers { reply }).await
    }

    async fn subscribe_requests(&self) -> PreviewResult<RequestStream> {
        self.request(|reply| Command::SubscribeRequests { reply }).await
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow() && !self.sender.is_closed()
    }
}
