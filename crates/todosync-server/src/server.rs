//! TCP accept loop and responder driver.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
};
use todosync_client::{SyncClient, SystemEnv, transport};
use todosync_core::{
    Responder, ResponderAction, ResponderEvent, ServeMonitor, SessionCipher, SessionOutcome,
    SyncError, SyncPolicy, TodoStore,
};
use todosync_crypto::Key;
use todosync_proto::Request;

use crate::error::ServerError;

/// Everything a running server shares with its sessions.
#[derive(Debug, Clone)]
pub struct ServerContext {
    /// Address to bind.
    pub bind_addr: SocketAddr,
    /// Session key.
    pub key: Key,
    /// Store served on pulls.
    pub store: TodoStore,
    /// Live policy, read once per request.
    pub policy: Arc<SyncPolicy>,
    /// Bumped after every served pull.
    pub monitor: ServeMonitor,
    /// Client used for reverse pulls.
    pub client: SyncClient,
    /// Port the reverse pull connects to on the pusher's host.
    pub reply_port: u16,
    /// Per-read and per-write timeout.
    pub io_timeout: Duration,
}

/// Sync server entry point.
#[derive(Debug)]
pub struct SyncServer;

impl SyncServer {
    /// Bind and start accepting connections on a background task.
    ///
    /// Each connection is handled on its own task; there is no connection
    /// limit.
    pub async fn start(context: ServerContext) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind(context.bind_addr)
            .await
            .map_err(|source| ServerError::Bind { addr: context.bind_addr, source })?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tracing::info!("Server listening on {}", local_addr);
        let task = tokio::spawn(accept_loop(listener, Arc::new(context), shutdown_rx));

        Ok(ServerHandle { local_addr, shutdown: Some(shutdown_tx), task })
    }
}

/// Handle to a running server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True while the accept loop is alive.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop accepting and wait for the accept loop to exit.
    ///
    /// Sessions already in progress run to completion.
    pub async fn stop(mut self) -> Result<(), ServerError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        (&mut self.task).await.map_err(|e| ServerError::Internal(e.to_string()))?;
        tracing::info!("Server on {} stopped", self.local_addr);
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, &context).await {
                            tracing::warn!(%peer, category = ?e.category(), "Session error: {}", e);
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("Accept error: {}", e);
                },
            },
        }
    }
}

/// Drive one responder session over `stream`.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &ServerContext,
) -> Result<(), SyncError> {
    tracing::debug!(%peer, "New connection");
    let mut responder = Responder::new(SessionCipher::new(context.key.clone(), SystemEnv::new()));

    let request = transport::read_frame(&mut stream, context.io_timeout).await?;
    let mut pending: VecDeque<_> = responder.handle(ResponderEvent::FrameReceived(request))?.into();
    let mut wrote = false;

    while let Some(action) = pending.pop_front() {
        match action {
            ResponderAction::Decide(request) => {
                let event = decide(request, context);
                pending.extend(responder.handle(event)?);
            },
            ResponderAction::SendFrame(bytes) | ResponderAction::SendPayload(bytes) => {
                transport::write_all(&mut stream, &bytes, context.io_timeout).await?;
                wrote = true;
            },
            ResponderAction::ReversePull => spawn_reverse_pull(peer, context),
            ResponderAction::Close { outcome } => {
                report(peer, &outcome, context);
                let _ = stream.shutdown().await;
                return Ok(());
            },
        }

        if pending.is_empty() && wrote && !responder.is_done() {
            wrote = false;
            pending.extend(responder.handle(ResponderEvent::FrameSent)?);
        }
    }
    Ok(())
}

fn decide(request: Request, context: &ServerContext) -> ResponderEvent {
    let policy = context.policy.snapshot();
    match request {
        Request::Pull if !policy.allow_pull => {
            ResponderEvent::PullDecided { allowed: false, document: None }
        },
        Request::Pull => {
            let document = context.store.serve_document().unwrap_or_else(|e| {
                tracing::error!("Failed to read lists for pull: {}", e);
                None
            });
            ResponderEvent::PullDecided { allowed: true, document }
        },
        Request::Push => ResponderEvent::PushDecided { allowed: policy.allow_push },
    }
}

fn spawn_reverse_pull(peer: SocketAddr, context: &ServerContext) {
    let target = SocketAddr::new(peer.ip(), context.reply_port).to_string();
    let client = context.client.clone();
    tracing::debug!(%peer, %target, "Starting reverse pull");

    tokio::spawn(async move {
        if let Err(e) = client.sync_pull(&target).await {
            tracing::warn!(%target, "Reverse pull failed: {}", e);
        }
    });
}

fn report(peer: SocketAddr, outcome: &SessionOutcome, context: &ServerContext) {
    match outcome {
        SessionOutcome::Served { bytes } => {
            context.monitor.record_served();
            tracing::info!(%peer, bytes, "Served lists");
        },
        SessionOutcome::PushAccepted => tracing::info!(%peer, "Accepted push, pulling lists"),
        SessionOutcome::NoData => tracing::info!(%peer, "Pull accepted but no lists to send"),
        SessionOutcome::Rejected(request) => {
            tracing::warn!(%peer, %request, "Request denied by policy")
        },
        SessionOutcome::Dropped(reason) => tracing::warn!(%peer, "Dropped session: {}", reason),
    }
}
