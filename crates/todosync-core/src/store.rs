//! The shared to-do database.
//!
//! One [`TodoStore`] is shared by the server tasks, the client and the local
//! user. Every change, including a merge, is computed on a copy, persisted,
//! and only then committed to memory, all under a single lock acquisition.
//! A failed persist therefore leaves both memory and disk unchanged.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use todosync_proto::{Collection, SortKey, Todo, TodoList};
use uuid::Uuid;

use crate::{
    merge::{choose_active_list, merge},
    storage::{MemoryStorage, Persistence, StorageError},
};

/// In-memory state of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    /// All lists.
    pub collection: Collection,
    /// List the user is working in.
    pub active_list: Option<String>,
    /// Number of lists.
    pub list_count: usize,
    /// Items across all lists.
    pub todo_total: usize,
}

impl Database {
    /// Database over `collection` with fresh counters.
    pub fn new(collection: Collection, active_list: Option<String>) -> Self {
        let mut db = Self { collection, active_list, list_count: 0, todo_total: 0 };
        db.recompute();
        db
    }

    /// Mutable access to the list called `name`.
    pub fn list_mut(&mut self, name: &str) -> Result<&mut TodoList, StorageError> {
        self.collection.get_mut(name).ok_or_else(|| StorageError::ListNotFound(name.to_string()))
    }

    /// Refresh `list_count` and `todo_total` from the collection.
    pub fn recompute(&mut self) {
        self.list_count = self.collection.len();
        self.todo_total = self.collection.todo_total();
    }

    fn active_name(&self) -> Result<String, StorageError> {
        match &self.active_list {
            Some(name) if self.collection.contains(name) => Ok(name.clone()),
            Some(name) => Err(StorageError::ListNotFound(name.clone())),
            None => Err(StorageError::ListNotFound(String::new())),
        }
    }
}

/// Result of merging a received collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Lists in the received collection.
    pub lists_received: usize,
    /// Lists held after the merge.
    pub list_count: usize,
    /// Items held after the merge.
    pub todo_total: usize,
    /// Active list after the merge.
    pub active_list: Option<String>,
}

/// Thread-safe handle to the database and its persistence.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct TodoStore {
    db: Arc<Mutex<Database>>,
    storage: Arc<dyn Persistence>,
    configured_active: Option<String>,
}

impl std::fmt::Debug for TodoStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db = self.lock();
        f.debug_struct("TodoStore")
            .field("list_count", &db.list_count)
            .field("todo_total", &db.todo_total)
            .field("active_list", &db.active_list)
            .finish_non_exhaustive()
    }
}

impl TodoStore {
    /// Load the persisted collection.
    ///
    /// `configured_active` is the `[database] active_list` setting; when it is
    /// unset the first list becomes active.
    pub fn open(
        storage: Arc<dyn Persistence>,
        configured_active: Option<String>,
    ) -> Result<Self, StorageError> {
        let configured_active = configured_active.filter(|name| !name.is_empty());
        let collection = match storage.load_raw()? {
            Some(raw) => Collection::from_json(&raw)?,
            None => Collection::new(),
        };
        let active =
            configured_active.clone().or_else(|| collection.first_name().map(str::to_string));
        let db = Database::new(collection, active);

        tracing::debug!(lists = db.list_count, todos = db.todo_total, "store opened");
        Ok(Self { db: Arc::new(Mutex::new(db)), storage, configured_active })
    }

    /// Empty store over fresh [`MemoryStorage`].
    pub fn in_memory() -> Self {
        Self {
            db: Arc::new(Mutex::new(Database::default())),
            storage: Arc::new(MemoryStorage::new()),
            configured_active: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persistence backing this store.
    pub fn storage(&self) -> &Arc<dyn Persistence> {
        &self.storage
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Database {
        self.lock().clone()
    }

    /// Copy of the current collection.
    pub fn collection(&self) -> Collection {
        self.lock().collection.clone()
    }

    /// Number of lists.
    pub fn list_count(&self) -> usize {
        self.lock().list_count
    }

    /// Items across all lists.
    pub fn todo_total(&self) -> usize {
        self.lock().todo_total
    }

    /// Active list name.
    pub fn active_list(&self) -> Option<String> {
        self.lock().active_list.clone()
    }

    /// The document to send for a pull request.
    ///
    /// `None` when there is nothing worth sending: no document, an empty
    /// collection, or a document that does not parse.
    pub fn serve_document(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let _db = self.lock();
        let Some(raw) = self.storage.load_raw()? else {
            return Ok(None);
        };
        match Collection::from_json(&raw) {
            Ok(collection) if collection.is_empty() => Ok(None),
            Ok(_) => Ok(Some(raw)),
            Err(e) => {
                tracing::error!(error = %e, "persisted collection is invalid, nothing to serve");
                Ok(None)
            },
        }
    }

    /// Merge a received collection, recompute counters and persist, as one
    /// step.
    pub fn apply_incoming(&self, incoming: Collection) -> Result<MergeSummary, StorageError> {
        let mut db = self.lock();

        let lists_received = incoming.len();
        let active = choose_active_list(
            self.configured_active.as_deref(),
            db.active_list.clone(),
            db.collection.is_empty(),
            &incoming,
        );
        let next = Database::new(merge(db.collection.clone(), incoming), active);

        self.storage.persist(&next.collection)?;
        *db = next;

        tracing::info!(
            lists_received,
            lists = db.list_count,
            todos = db.todo_total,
            "merged incoming collection"
        );
        Ok(MergeSummary {
            lists_received,
            list_count: db.list_count,
            todo_total: db.todo_total,
            active_list: db.active_list.clone(),
        })
    }

    /// Parse a received document and merge it.
    pub fn apply_incoming_document(&self, document: &[u8]) -> Result<MergeSummary, StorageError> {
        let incoming = Collection::from_json(document)?;
        self.apply_incoming(incoming)
    }

    /// Apply a local edit with the same persist-then-commit discipline as a
    /// merge.
    pub fn mutate<R>(
        &self,
        edit: impl FnOnce(&mut Database) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut db = self.lock();
        let mut next = db.clone();
        let result = edit(&mut next)?;
        next.recompute();
        self.storage.persist(&next.collection)?;
        *db = next;
        Ok(result)
    }

    /// Create an empty list and make it active.
    pub fn create_list(&self, name: &str) -> Result<(), StorageError> {
        self.mutate(|db| {
            if db.collection.contains(name) {
                return Err(StorageError::ListExists(name.to_string()));
            }
            db.collection.insert(name, TodoList::new());
            db.active_list = Some(name.to_string());
            tracing::info!(list = name, "created list");
            Ok(())
        })
    }

    /// Delete a list. If it was active, the first remaining list becomes
    /// active.
    pub fn remove_list(&self, name: &str) -> Result<(), StorageError> {
        self.mutate(|db| {
            db.collection.remove(name).ok_or_else(|| StorageError::ListNotFound(name.to_string()))?;
            if db.active_list.as_deref() == Some(name) {
                db.active_list = db.collection.first_name().map(str::to_string);
            }
            tracing::info!(list = name, "removed list");
            Ok(())
        })
    }

    /// Make `name` the active list.
    pub fn set_active_list(&self, name: &str) -> Result<(), StorageError> {
        self.mutate(|db| {
            if !db.collection.contains(name) {
                return Err(StorageError::ListNotFound(name.to_string()));
            }
            db.active_list = Some(name.to_string());
            Ok(())
        })
    }

    /// Append an item to a list, returning its id.
    pub fn add_todo(&self, list: &str, todo: Todo) -> Result<Uuid, StorageError> {
        self.mutate(|db| {
            let items = db.list_mut(list)?;
            let id = todo.id;
            items.push(todo);
            Ok(id)
        })
    }

    /// Remove an item by id.
    pub fn remove_todo(&self, list: &str, id: Uuid) -> Result<Todo, StorageError> {
        self.mutate(|db| {
            db.list_mut(list)?
                .remove(id)
                .ok_or_else(|| StorageError::TodoNotFound { list: list.to_string(), id })
        })
    }

    /// Mark an item done or not done.
    pub fn set_complete(&self, list: &str, id: Uuid, complete: bool) -> Result<(), StorageError> {
        self.mutate(|db| {
            let todo = db
                .list_mut(list)?
                .get_mut(id)
                .ok_or_else(|| StorageError::TodoNotFound { list: list.to_string(), id })?;
            todo.complete = complete;
            Ok(())
        })
    }

    /// Sort the active list.
    pub fn sort_active_list(&self, key: SortKey, reverse: bool) -> Result<(), StorageError> {
        self.mutate(|db| {
            let name = db.active_name()?;
            if let Some(items) = db.collection.get_mut(&name) {
                items.sort_by_key(key, reverse);
            }
            Ok(())
        })
    }
}
