//! One sync peer: store, policy, client and a restartable server.

use std::{net::SocketAddr, path::Path, sync::Arc};

use tokio::sync::Mutex;
use todosync_client::{ClientConfig, SyncClient, peer_addr};
use todosync_core::{
    JsonFileStorage, ServeMonitor, SyncConfig, SyncError, SyncPolicy, SyncStatus, TodoStore,
};

use crate::{
    error::ServerError,
    server::{ServerContext, ServerHandle, SyncServer},
};

/// The sync-facing surface of one instance.
///
/// Owns the shared store and policy, a client for outgoing requests and, while
/// started, the server.
#[derive(Debug)]
pub struct SyncNode {
    config: SyncConfig,
    store: TodoStore,
    policy: Arc<SyncPolicy>,
    monitor: ServeMonitor,
    client: SyncClient,
    server: Mutex<Option<ServerHandle>>,
}

impl SyncNode {
    /// Node over an already opened store.
    pub fn new(config: SyncConfig, store: TodoStore) -> Self {
        let policy = Arc::new(SyncPolicy::from_config(&config.server));
        let monitor = ServeMonitor::new();
        let client = SyncClient::new(
            config.server.passphrase.key(),
            store.clone(),
            Arc::clone(&policy),
            ClientConfig::from_server_config(&config.server),
        )
        .with_monitor(monitor.clone());

        Self { config, store, policy, monitor, client, server: Mutex::new(None) }
    }

    /// Load (or create) the configuration in `data_dir` and open the lists
    /// file next to it.
    pub fn open(data_dir: &Path) -> Result<Self, ServerError> {
        Self::open_with(data_dir, |_| {})
    }

    /// Like [`SyncNode::open`], letting the caller adjust the loaded
    /// configuration (command-line overrides) before anything uses it.
    pub fn open_with(
        data_dir: &Path,
        configure: impl FnOnce(&mut SyncConfig),
    ) -> Result<Self, ServerError> {
        let mut config = SyncConfig::load_or_init(data_dir)?;
        configure(&mut config);
        let storage = JsonFileStorage::new(SyncConfig::lists_path(data_dir));
        let active = config.database.active_list().map(str::to_string);
        let store = TodoStore::open(Arc::new(storage), active)?;
        Ok(Self::new(config, store))
    }

    /// Effective configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Shared store.
    pub fn store(&self) -> &TodoStore {
        &self.store
    }

    /// Live policy flags.
    pub fn policy(&self) -> &Arc<SyncPolicy> {
        &self.policy
    }

    /// Served-pull counter.
    pub fn monitor(&self) -> &ServeMonitor {
        &self.monitor
    }

    /// Pull from `host` (`HOST[:PORT]`, default port from the configuration).
    pub async fn sync_pull(&self, host: &str) -> Result<SyncStatus, SyncError> {
        self.client.sync_pull(&peer_addr(host, self.config.server.port)).await
    }

    /// Push to `host`: the peer pulls our lists back.
    ///
    /// The local server must be running for the reverse pull to succeed.
    pub async fn sync_push(&self, host: &str) -> Result<SyncStatus, SyncError> {
        if !self.server_running().await {
            tracing::warn!("pushing while the local server is stopped; the peer cannot pull back");
        }
        self.client.sync_push(&peer_addr(host, self.config.server.port)).await
    }

    /// True while the server accepts connections.
    pub async fn server_running(&self) -> bool {
        self.server.lock().await.as_ref().is_some_and(ServerHandle::is_running)
    }

    /// Bound address of the running server.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(ServerHandle::local_addr)
    }

    /// Start the server. Returns the bound address; a no-op if it is already
    /// running.
    pub async fn start_server(&self) -> Result<SocketAddr, ServerError> {
        let mut server = self.server.lock().await;
        if let Some(handle) = server.as_ref().filter(|h| h.is_running()) {
            return Ok(handle.local_addr());
        }

        let config = &self.config.server;
        let context = ServerContext {
            bind_addr: config.bind_addr()?,
            key: config.passphrase.key(),
            store: self.store.clone(),
            policy: Arc::clone(&self.policy),
            monitor: self.monitor.clone(),
            client: SyncClient::new(
                config.passphrase.key(),
                self.store.clone(),
                Arc::clone(&self.policy),
                ClientConfig::from_server_config(config),
            ),
            reply_port: config.reply_port(),
            io_timeout: config.io_timeout(),
        };

        let handle = SyncServer::start(context).await?;
        let addr = handle.local_addr();
        *server = Some(handle);
        Ok(addr)
    }

    /// Stop the server if it is running.
    pub async fn stop_server(&self) -> Result<(), ServerError> {
        let handle = self.server.lock().await.take();
        match handle {
            Some(handle) => handle.stop().await,
            None => Ok(()),
        }
    }

    /// Stop and start the server, e.g. after a configuration change.
    pub async fn restart_server(&self) -> Result<SocketAddr, ServerError> {
        self.stop_server().await?;
        self.start_server().await
    }
}
