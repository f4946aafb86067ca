//! Root → server registry.
//!
//! Each canonical root owns a slot guarded by its own async mutex, so creation
//! for one root is serialised while different roots never contend. A slot is
//! retired (and removed from the map) when its server closes; callers that
//! were queued on a retired slot start over with a fresh one.
use std::{future::Future, sync::Arc};

use futures_util::future::join_all;
use scc::HashMap;
use tokio::sync::Mutex;

use crate::{
    core::{error::PreviewResult, paths::ServerRoot},
    ports::managed_server::ManagedServer,
};

struct SlotState<S> {
    server: Option<Arc<S>>,
    retired: bool,
}

impl<S> Default for SlotState<S> {
    fn default() -> Self {
        Self {
            server: None,
            retired: false,
        }
    }
}

type Slot<S> = Arc<Mutex<SlotState<S>>>;

/// Owns every running server, keyed by canonical root.
pub struct PathRegistry<S: ManagedServer> {
    slots: HashMap<String, Slot<S>>,
}

impl<S: ManagedServer> PathRegistry<S> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    async fn slot(&self, key: &str) -> Slot<S> {
        self.slots
            .entry_async(key.to_string())
            .await
            .or_insert_with(|| Arc::new(Mutex::new(SlotState::default())))
            .get()
            .clone()
    }

    async fn existing_slot(&self, key: &str) -> Option<Slot<S>> {
        self.slots
            .get_async(key)
            .await
            .map(|entry| entry.get().clone())
    }

    /// Return the server for `root`, launching it if none is running.
    ///
    /// Concurrent callers for the same root wait for the first launch and
    /// receive the same server. A failed launch leaves no record behind.
    pub async fn get_or_create<F, Fut>(&self, root: ServerRoot, launch: F) -> PreviewResult<Arc<S>>
    where
        F: FnOnce(ServerRoot) -> Fut,
        Fut: Future<Output = PreviewResult<Arc<S>>>,
    {
        let key = root.key().to_string();
        let mut state = loop {
            let guard = self.slot(&key).await.lock_owned().await;
            if !guard.retired {
                break guard;
            }
        };

        if let Some(server) = &state.server {
            return Ok(server.clone());
        }

        match launch(root).await {
            Ok(server) => {
                state.server = Some(server.clone());
                Ok(server)
            }
            Err(e) => {
                state.retired = true;
                let _ = self.slots.remove_async(&key).await;
                Err(e)
            }
        }
    }

    /// Look up the running server for a root key.
    pub async fn get(&self, key: &str) -> Option<Arc<S>> {
        let slot = self.existing_slot(key).await?;
        let state = slot.lock().await;
        state.server.clone()
    }

    /// Close and forget the server for `key`. Returns `false` if none existed.
    pub async fn close(&self, key: &str) -> bool {
        let Some(slot) = self.existing_slot(key).await else {
            return false;
        };

        let server = {
            let mut state = slot.lock().await;
            if state.retired {
                return false;
            }
            state.retired = true;
            let _ = self.slots.remove_async(key).await;
            state.server.take()
        };

        match server {
            Some(server) => {
                server.close().await;
                true
            }
            None => false,
        }
    }

    /// Close every server. Returns how many were running.
    pub async fn close_all(&self) -> usize {
        let keys = self.keys().await;
        join_all(keys.iter().map(|key| self.close(key)))
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count()
    }

    /// Snapshot of the running servers.
    pub async fn servers(&self) -> Vec<Arc<S>> {
        let mut servers = Vec::new();
        for key in self.keys().await {
            if let Some(server) = self.get(&key).await {
                servers.push(server);
            }
        }
        servers
    }

    async fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        self.slots
            .retain_async(|key, _| {
                keys.push(key.clone());
                true
            })
            .await;
        keys
    }
}

impl<S: ManagedServer> Default for PathRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
