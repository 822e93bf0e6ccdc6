//! Server error types.

use std::{io, net::SocketAddr};

use thiserror::Error;
use todosync_core::{ConfigError, StorageError};

/// Errors starting, stopping or configuring the server.
///
/// Session failures never surface here; they end only their connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The collection could not be loaded.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Binding the listening socket failed.
    #[error("unable to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Transport/network error
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The accept loop task failed.
    #[error("internal error: {0}")]
    Internal(String),
}
