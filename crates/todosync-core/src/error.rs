//! Sync error and status types.

use std::{fmt, time::Duration};

use thiserror::Error;
use todosync_crypto::CipherError;
use todosync_proto::{ProtoError, Request, Token};

use crate::storage::StorageError;

/// Broad class of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreachable host, refused, timed out, connection reset.
    Connection,
    /// Unexpected token, decrypt failure, malformed header or payload.
    Protocol,
    /// Staging or persisting the merged collection failed.
    Persistence,
    /// The peer declined by policy, or had nothing to send.
    Policy,
}

/// Errors from one sync exchange.
///
/// None of these are fatal to the process; only the affected session is torn
/// down.
#[derive(Debug, Error)]
pub enum SyncError {
    /// TCP connect failed.
    #[error("unable to connect to {addr}: {source}")]
    Connect {
        /// Peer address as given by the caller.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not complete in time.
    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Peer address as given by the caller.
        addr: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// A read did not complete in time.
    #[error("timed out waiting for {waiting_for}")]
    Timeout {
        /// What the session was waiting for.
        waiting_for: &'static str,
    },

    /// Transport failure mid-session.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decryption or encryption failed.
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Framing, token or payload decoding failed.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Peer answered with a token that makes no sense here.
    #[error("peer responded to {request} with {token}")]
    UnexpectedToken {
        /// Request we sent.
        request: Request,
        /// Token we got back.
        token: Token,
    },

    /// Stream ended before the announced payload was complete.
    #[error("payload truncated: expected {expected} bytes, got {received}")]
    Truncated {
        /// Bytes announced by the size header.
        expected: u64,
        /// Bytes received before end of stream.
        received: u64,
    },

    /// Event arrived in a state that cannot accept it.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Description of the state error.
        reason: String,
    },

    /// Staging or persisting failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Peer declined the request.
    #[error("{request} denied by peer")]
    Rejected {
        /// Request that was declined.
        request: Request,
    },

    /// Peer accepted but had no collection to send.
    #[error("peer has no lists to send")]
    NoData,
}

impl SyncError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connect { .. }
            | Self::ConnectTimeout { .. }
            | Self::Timeout { .. }
            | Self::Io(_) => ErrorCategory::Connection,
            Self::Cipher(_)
            | Self::Proto(_)
            | Self::UnexpectedToken { .. }
            | Self::Truncated { .. }
            | Self::InvalidState { .. } => ErrorCategory::Protocol,
            Self::Storage(_) => ErrorCategory::Persistence,
            Self::Rejected { .. } | Self::NoData => ErrorCategory::Policy,
        }
    }
}

/// Successful outcome of a sync call, displayed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// Remote collection pulled and merged.
    Pulled {
        /// Peer address.
        peer: String,
        /// Lists received.
        lists_received: usize,
        /// Local list count after the merge.
        list_count: usize,
        /// Local item total after the merge.
        todo_total: usize,
    },
    /// Peer accepted the invitation to pull from us.
    PushAccepted {
        /// Peer address.
        peer: String,
        /// True if the peer's reverse pull was observed before returning.
        reverse_pull_served: bool,
    },
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pulled { peer, lists_received, list_count, todo_total } => write!(
                f,
                "Pull from {peer} successful: {lists_received} lists received, \
                 {list_count} lists / {todo_total} to-dos held"
            ),
            Self::PushAccepted { peer, reverse_pull_served: true } => {
                write!(f, "Push to {peer} successful: lists pulled by peer")
            },
            Self::PushAccepted { peer, reverse_pull_served: false } => {
                write!(f, "Push to {peer} accepted: peer will pull lists")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_denials_are_not_protocol_errors() {
        let rejected = SyncError::Rejected { request: Request::Pull };
        assert_eq!(rejected.category(), ErrorCategory::Policy);
        assert_eq!(SyncError::NoData.category(), ErrorCategory::Policy);
    }

    #[test]
    fn decrypt_failure_is_protocol() {
        assert_eq!(SyncError::Cipher(CipherError::TagMismatch).category(), ErrorCategory::Protocol);
        let truncated = SyncError::Truncated { expected: 10, received: 3 };
        assert_eq!(truncated.category(), ErrorCategory::Protocol);
    }

    #[test]
    fn timeouts_are_connection_errors() {
        let err = SyncError::ConnectTimeout {
            addr: "10.0.0.1:5364".into(),
            timeout: Duration::from_secs(3),
        };
        assert_eq!(err.category(), ErrorCategory::Connection);
        assert_eq!(err.to_string(), "connection to 10.0.0.1:5364 timed out after 3s");
    }

    #[test]
    fn rejection_message_is_human_readable() {
        let rejected = SyncError::Rejected { request: Request::Pull };
        assert_eq!(rejected.to_string(), "PULL_REQUEST denied by peer");
    }

    #[test]
    fn status_display() {
        let status = SyncStatus::Pulled {
            peer: "127.0.0.1:5364".into(),
            lists_received: 1,
            list_count: 2,
            todo_total: 5,
        };
        assert_eq!(
            status.to_string(),
            "Pull from 127.0.0.1:5364 successful: 1 lists received, 2 lists / 5 to-dos held"
        );
    }
}
