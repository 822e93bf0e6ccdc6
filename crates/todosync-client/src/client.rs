//! Pull and push requests.
//!
//! `SyncClient` drives a [`Requester`] over a `TcpStream`: it connects,
//! performs the requester's actions in order, stages and merges a received
//! collection, and reports a [`SyncStatus`].

use std::{
    collections::VecDeque,
    fs,
    io::{self, Write},
    net::{IpAddr, SocketAddr},
    path::Path,
    sync::Arc,
    time::Duration,
};

use tokio::net::TcpStream;
use todosync_core::{
    Environment, MergeSummary, Requester, RequesterAction, RequesterEvent, ServeMonitor,
    SessionCipher, SessionOutcome, StorageError, SyncError, SyncPolicy, SyncStatus, TodoStore,
    config::ServerConfig,
};
use todosync_crypto::Key;
use todosync_proto::Request;

use crate::{SystemEnv, transport};

/// Timeouts and buffer sizes for client sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-read and per-write timeout.
    pub io_timeout: Duration,
    /// How long a push keeps pulls enabled waiting for the reverse pull.
    pub push_linger: Duration,
    /// Payload read window.
    pub read_chunk_size: usize,
}

impl ClientConfig {
    /// Client settings from the `[server]` section.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            io_timeout: config.io_timeout(),
            push_linger: config.push_linger(),
            read_chunk_size: config.read_chunk_size,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_server_config(&ServerConfig::default())
    }
}

/// Resolve user input `HOST[:PORT]` to a connectable address string,
/// appending `default_port` when no port is given.
pub fn peer_addr(input: &str, default_port: u16) -> String {
    let input = input.trim();
    if input.parse::<SocketAddr>().is_ok() {
        return input.to_string();
    }
    if let Ok(ip) = input.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    match input.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => input.to_string(),
        _ => format!("{input}:{default_port}"),
    }
}

/// Client half of a node.
///
/// Cheap to clone; clones share the store, policy and monitor.
#[derive(Clone)]
pub struct SyncClient<E: Environment = SystemEnv> {
    cipher: SessionCipher<E>,
    store: TodoStore,
    policy: Arc<SyncPolicy>,
    monitor: Option<ServeMonitor>,
    config: ClientConfig,
}

impl<E: Environment> std::fmt::Debug for SyncClient<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient").field("config", &self.config).finish_non_exhaustive()
    }
}

impl SyncClient<SystemEnv> {
    /// Client using OS randomness.
    pub fn new(key: Key, store: TodoStore, policy: Arc<SyncPolicy>, config: ClientConfig) -> Self {
        Self::with_env(SystemEnv::new(), key, store, policy, config)
    }
}

impl<E: Environment> SyncClient<E> {
    /// Client drawing IVs from `env`.
    pub fn with_env(
        env: E,
        key: Key,
        store: TodoStore,
        policy: Arc<SyncPolicy>,
        config: ClientConfig,
    ) -> Self {
        Self { cipher: SessionCipher::new(key, env), store, policy, monitor: None, config }
    }

    /// Observe served pulls so a push can wait for the reverse pull.
    #[must_use]
    pub fn with_monitor(mut self, monitor: ServeMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Store merged into.
    pub fn store(&self) -> &TodoStore {
        &self.store
    }

    /// Session settings.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Request the collection at `addr` and merge it into the local store.
    pub async fn sync_pull(&self, addr: &str) -> Result<SyncStatus, SyncError> {
        tracing::info!(peer = addr, "pulling lists");
        let (_, summary) = self
            .run(addr, Request::Pull)
            .await
            .inspect_err(|e| log_failure(addr, Request::Pull, e))?;
        let summary = summary.ok_or_else(|| SyncError::InvalidState {
            reason: "pull finished without merging".to_string(),
        })?;

        let status = SyncStatus::Pulled {
            peer: addr.to_string(),
            lists_received: summary.lists_received,
            list_count: summary.list_count,
            todo_total: summary.todo_total,
        };
        tracing::info!(peer = addr, "{status}");
        Ok(status)
    }

    /// Invite the peer at `addr` to pull our collection.
    ///
    /// Pulls are forced on for the whole exchange. With a monitor attached
    /// the call returns only once the peer's reverse pull was served or the
    /// linger window expired, so a caller may stop the server afterwards.
    pub async fn sync_push(&self, addr: &str) -> Result<SyncStatus, SyncError> {
        tracing::info!(peer = addr, "pushing lists");
        let guard = self.policy.override_pull();
        let baseline = self.monitor.as_ref().map(ServeMonitor::served);

        self.run(addr, Request::Push).await.inspect_err(|e| log_failure(addr, Request::Push, e))?;

        let reverse_pull_served = match (&self.monitor, baseline) {
            (Some(monitor), Some(baseline)) => {
                let linger = self.config.push_linger;
                tracing::debug!(
                    peer = addr,
                    override_engaged = guard.engaged(),
                    "waiting for reverse pull"
                );
                let served = monitor.wait_served_after(baseline, linger).await;
                if !served {
                    tracing::warn!(peer = addr, "peer did not pull within {linger:?}");
                }
                served
            },
            _ => false,
        };
        drop(guard);

        let status = SyncStatus::PushAccepted { peer: addr.to_string(), reverse_pull_served };
        tracing::info!(peer = addr, "{status}");
        Ok(status)
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream, SyncError> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(SyncError::Connect { addr: addr.to_string(), source }),
            Err(_) => Err(SyncError::ConnectTimeout {
                addr: addr.to_string(),
                timeout: self.config.connect_timeout,
            }),
        }
    }

    async fn run(
        &self,
        addr: &str,
        request: Request,
    ) -> Result<(SessionOutcome, Option<MergeSummary>), SyncError> {
        let mut stream = self.connect(addr).await?;
        let mut requester = Requester::new(self.cipher.clone(), request);
        let mut summary = None;

        let mut pending: VecDeque<_> = requester.handle(RequesterEvent::Connected)?.into();
        while let Some(action) = pending.pop_front() {
            let next = match action {
                RequesterAction::SendFrame(frame) => {
                    transport::write_all(&mut stream, &frame, self.config.io_timeout).await?;
                    requester.handle(RequesterEvent::FrameSent)?
                },
                RequesterAction::ReadFrame => {
                    let body = transport::read_frame(&mut stream, self.config.io_timeout).await?;
                    requester.handle(RequesterEvent::FrameReceived(body))?
                },
                RequesterAction::ReadPayload { len } => {
                    let payload = transport::read_payload(
                        &mut stream,
                        len,
                        self.config.read_chunk_size,
                        self.config.io_timeout,
                    )
                    .await?;
                    requester.handle(RequesterEvent::PayloadReceived(payload))?
                },
                RequesterAction::Deliver(document) => {
                    summary = Some(self.stage_and_merge(document).await?);
                    requester.handle(RequesterEvent::Merged)?
                },
                RequesterAction::Finish(outcome) => return Ok((outcome, summary)),
            };
            pending.extend(next);
        }

        Err(SyncError::InvalidState { reason: "session ended without finishing".to_string() })
    }

    /// Write the received document to a staging file, read it back and
    /// merge it. The store is untouched on any failure.
    ///
    /// Runs on the blocking pool: staging and persisting both hit the disk.
    async fn stage_and_merge(&self, document: Vec<u8>) -> Result<MergeSummary, SyncError> {
        let store = self.store.clone();
        let dir = store.storage().staging_dir();
        tokio::task::spawn_blocking(move || stage_and_merge_blocking(&store, &document))
            .await
            .map_err(|e| StorageError::Io { path: dir, source: io::Error::other(e) })?
    }
}

fn stage_and_merge_blocking(store: &TodoStore, document: &[u8]) -> Result<MergeSummary, SyncError> {
    let dir = store.storage().staging_dir();
    let io_err = |path: &Path, source| StorageError::Io { path: path.to_path_buf(), source };

    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let mut staged = tempfile::NamedTempFile::new_in(&dir).map_err(|e| io_err(&dir, e))?;
    staged.write_all(document).map_err(|e| io_err(staged.path(), e))?;
    staged.flush().map_err(|e| io_err(staged.path(), e))?;

    let received = fs::read(staged.path()).map_err(|e| io_err(staged.path(), e))?;
    tracing::debug!(
        path = %staged.path().display(),
        bytes = received.len(),
        "staged received lists"
    );

    Ok(store.apply_incoming_document(&received)?)
}

fn log_failure(addr: &str, request: Request, error: &SyncError) {
    match error {
        SyncError::Rejected { .. } | SyncError::NoData => {
            tracing::warn!(peer = addr, %request, category = ?error.category(), "{error}");
        },
        _ => tracing::error!(peer = addr, %request, category = ?error.category(), "{error}"),
    }
}
