//! Persistence of the collection document.
//!
//! The server serves the persisted document as-is, so disk and memory are
//! kept consistent by [`crate::TodoStore`], which persists before it commits
//! any change to memory.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use thiserror::Error;
use todosync_proto::{Collection, ProtoError};
use uuid::Uuid;

/// Errors from storage and store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Stored or received document is not a valid collection.
    #[error("invalid collection document: {0}")]
    Document(#[from] ProtoError),

    /// No list with this name.
    #[error("list not found: {0:?}")]
    ListNotFound(String),

    /// A list with this name already exists.
    #[error("list already exists: {0:?}")]
    ListExists(String),

    /// No item with this id in the list.
    #[error("to-do {id} not found in list {list:?}")]
    TodoNotFound {
        /// List searched.
        list: String,
        /// Missing item id.
        id: Uuid,
    },

    /// Writes are disabled (test storage).
    #[error("storage is read-only")]
    ReadOnly,
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Durable home of the collection document.
pub trait Persistence: Send + Sync + 'static {
    /// Raw persisted document, or `None` if nothing was ever persisted.
    fn load_raw(&self) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replace the persisted document with `collection`.
    fn persist(&self, collection: &Collection) -> Result<(), StorageError>;

    /// Directory where received payloads are staged before merging.
    fn staging_dir(&self) -> PathBuf;
}

/// JSON document on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Storage backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Persistence for JsonFileStorage {
    fn load_raw(&self) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&self.path, e)),
        }
    }

    fn persist(&self, collection: &Collection) -> Result<(), StorageError> {
        let dir = self.dir();
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let document = collection.to_json()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| StorageError::io(&dir, e))?;
        tmp.write_all(&document).map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&self.path).map_err(|e| StorageError::io(&self.path, e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = document.len(),
            "persisted collection"
        );
        Ok(())
    }

    fn staging_dir(&self) -> PathBuf {
        self.dir()
    }
}

/// In-memory storage for tests and embedding.
///
/// Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    document: Arc<Mutex<Option<Vec<u8>>>>,
    read_only: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Empty storage (nothing persisted).
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-loaded with `collection`.
    pub fn with_collection(collection: &Collection) -> Result<Self, StorageError> {
        let storage = Self::new();
        storage.persist(collection)?;
        Ok(storage)
    }

    /// Storage pre-loaded with raw bytes, valid or not.
    pub fn with_raw(document: Vec<u8>) -> Self {
        let storage = Self::new();
        storage.set_raw(document);
        storage
    }

    /// Overwrite the stored bytes, bypassing validation and the read-only
    /// flag.
    pub fn set_raw(&self, document: Vec<u8>) {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document);
    }

    /// Make every subsequent `persist` fail with [`StorageError::ReadOnly`].
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl Persistence for MemoryStorage {
    fn load_raw(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.document.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn persist(&self, collection: &Collection) -> Result<(), StorageError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::ReadOnly);
        }
        let document = collection.to_json()?;
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Some(document);
        Ok(())
    }

    fn staging_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}
