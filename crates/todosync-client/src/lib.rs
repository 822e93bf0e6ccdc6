//! todosync client.
//!
//! Tokio driver for the requester session:
//!
//! ```text
//! todosync-client
//!   ├─ SystemEnv    (production Environment impl)
//!   ├─ transport    (framed reads/writes with timeouts)
//!   └─ SyncClient   (sync_pull / sync_push)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod system_env;
pub mod transport;

pub use client::{ClientConfig, SyncClient, peer_addr};
pub use system_env::SystemEnv;
