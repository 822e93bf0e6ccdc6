//! todosync server.
//!
//! Tokio driver for the responder session and the node that ties a store,
//! policy, client and server together:
//!
//! ```text
//! todosync-server
//!   ├─ SyncServer     (accept loop, one task per connection)
//!   ├─ ServerHandle   (stop / is_running / local_addr)
//!   └─ SyncNode       (sync_pull, sync_push, start/stop/restart_server)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod node;
mod server;

pub use error::ServerError;
pub use node::SyncNode;
pub use server::{ServerContext, ServerHandle, SyncServer};
