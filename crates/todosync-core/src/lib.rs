//! todosync core.
//!
//! Everything both peers share that does not touch a socket:
//!
//! ```text
//! todosync-core
//!   ├─ Environment        (time + randomness seam)
//!   ├─ SyncConfig         (TOML config file)
//!   ├─ SyncPolicy         (live allow_pull / allow_push flags)
//!   ├─ Persistence        (on-disk collection document)
//!   ├─ TodoStore          (single-writer database + merge)
//!   ├─ Responder          (sans-IO server session)
//!   └─ Requester          (sans-IO client session)
//! ```
//!
//! The session machines return actions; the tokio drivers in
//! `todosync-client` and `todosync-server` perform them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod merge;
pub mod monitor;
pub mod policy;
pub mod session;
pub mod storage;
pub mod store;

pub use config::{ConfigError, SyncConfig};
pub use env::Environment;
pub use error::{ErrorCategory, SyncError, SyncStatus};
pub use merge::merge;
pub use monitor::ServeMonitor;
pub use policy::{PolicySnapshot, PullOverride, SyncPolicy};
pub use session::{
    Requester, RequesterAction, RequesterEvent, RequesterState, Responder, ResponderAction,
    ResponderEvent, ResponderState, SessionCipher, SessionOutcome,
};
pub use storage::{JsonFileStorage, MemoryStorage, Persistence, StorageError};
pub use store::{Database, MergeSummary, TodoStore};
