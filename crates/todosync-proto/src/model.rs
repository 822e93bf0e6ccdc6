//! Collection data model.
//!
//! A [`Collection`] maps unique list names to ordered [`TodoList`]s and is the
//! unit exchanged by the protocol. It serializes to the same JSON document
//! that is kept on disk:
//!
//! ```json
//! { "Home": [ { "id": "…", "reminder": "buy milk", "priority": "Normal", "complete": false } ] }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtoError;

/// Item priority. Orders `High < Normal < Low` so an ascending sort puts the
/// most urgent items first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "PriorityRepr")]
pub enum Priority {
    /// Most urgent
    High,
    /// Default priority
    #[default]
    Normal,
    /// Least urgent
    Low,
}

/// Accepted input encodings: names, or the legacy numeric levels `1..=3`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PriorityRepr {
    Name(String),
    Level(i64),
}

impl TryFrom<PriorityRepr> for Priority {
    type Error = String;

    fn try_from(repr: PriorityRepr) -> Result<Self, Self::Error> {
        match repr {
            PriorityRepr::Name(name) => match name.as_str() {
                "High" | "high" => Ok(Self::High),
                "Normal" | "normal" => Ok(Self::Normal),
                "Low" | "low" => Ok(Self::Low),
                other => Err(format!("unknown priority {other:?}")),
            },
            PriorityRepr::Level(1) => Ok(Self::High),
            PriorityRepr::Level(2) => Ok(Self::Normal),
            PriorityRepr::Level(3) => Ok(Self::Low),
            PriorityRepr::Level(other) => Err(format!("priority level {other} out of range")),
        }
    }
}

/// Key used to order a list for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// By priority, most urgent first
    #[default]
    Priority,
    /// Alphabetically by reminder text
    Reminder,
    /// Open items before completed ones
    Complete,
}

/// A single to-do item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Stable identity, independent of the reminder text.
    ///
    /// Documents written before ids existed get a fresh one on load.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// What to do. Never empty.
    pub reminder: String,
    /// Urgency
    #[serde(default)]
    pub priority: Priority,
    /// Done flag
    #[serde(default)]
    pub complete: bool,
}

impl Todo {
    /// Create an open item with a fresh id.
    pub fn new(reminder: impl Into<String>, priority: Priority) -> Result<Self, ProtoError> {
        let reminder = reminder.into();
        if reminder.trim().is_empty() {
            return Err(ProtoError::InvalidCollection("reminder must not be empty".to_string()));
        }
        Ok(Self { id: Uuid::new_v4(), reminder, priority, complete: false })
    }
}

/// An ordered sequence of items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoList {
    todos: Vec<Todo>,
}

impl TodoList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.todos.len()
    }

    /// True if the list has no items.
    pub fn is_empty(&self) -> bool {
        self.todos.is_empty()
    }

    /// Items in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Todo> {
        self.todos.iter()
    }

    /// Append an item.
    pub fn push(&mut self, todo: Todo) {
        self.todos.push(todo);
    }

    /// Index of the item with `id`.
    pub fn position(&self, id: Uuid) -> Option<usize> {
        self.todos.iter().position(|t| t.id == id)
    }

    /// Item with `id`.
    pub fn get(&self, id: Uuid) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }

    /// Mutable item with `id`.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Todo> {
        self.todos.iter_mut().find(|t| t.id == id)
    }

    /// Remove and return the item with `id`.
    pub fn remove(&mut self, id: Uuid) -> Option<Todo> {
        self.position(id).map(|i| self.todos.remove(i))
    }

    /// Stable sort by `key`, descending when `reverse` is set.
    pub fn sort_by_key(&mut self, key: SortKey, reverse: bool) {
        match key {
            SortKey::Priority => self.todos.sort_by_key(|t| t.priority),
            SortKey::Reminder => self.todos.sort_by(|a, b| a.reminder.cmp(&b.reminder)),
            SortKey::Complete => self.todos.sort_by_key(|t| t.complete),
        }
        if reverse {
            self.todos.reverse();
        }
    }
}

impl FromIterator<Todo> for TodoList {
    fn from_iter<I: IntoIterator<Item = Todo>>(iter: I) -> Self {
        Self { todos: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a TodoList {
    type Item = &'a Todo;
    type IntoIter = std::slice::Iter<'a, Todo>;

    fn into_iter(self) -> Self::IntoIter {
        self.todos.iter()
    }
}

/// All named lists held by one instance.
///
/// Backed by an ordered map, so iteration and [`Collection::first_name`] are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    lists: BTreeMap<String, TodoList>,
}

impl Collection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lists.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// True if there are no lists.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Sum of item counts across all lists.
    pub fn todo_total(&self) -> usize {
        self.lists.values().map(TodoList::len).sum()
    }

    /// List named `name`.
    pub fn get(&self, name: &str) -> Option<&TodoList> {
        self.lists.get(name)
    }

    /// Mutable list named `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut TodoList> {
        self.lists.get_mut(name)
    }

    /// True if a list named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.lists.contains_key(name)
    }

    /// Insert or replace a list, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, list: TodoList) -> Option<TodoList> {
        self.lists.insert(name.into(), list)
    }

    /// Remove a list.
    pub fn remove(&mut self, name: &str) -> Option<TodoList> {
        self.lists.remove(name)
    }

    /// First list name in key order.
    pub fn first_name(&self) -> Option<&str> {
        self.lists.keys().next().map(String::as_str)
    }

    /// List names in key order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lists.keys().map(String::as_str)
    }

    /// `(name, list)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TodoList)> {
        self.lists.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Parse and validate a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtoError> {
        let collection: Self = serde_json::from_slice(bytes)?;
        collection.validate()?;
        Ok(collection)
    }

    /// Serialize to the pretty-printed on-disk form.
    pub fn to_json(&self) -> Result<Vec<u8>, ProtoError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ProtoError> {
        for (name, list) in &self.lists {
            if let Some(todo) = list.iter().find(|t| t.reminder.trim().is_empty()) {
                return Err(ProtoError::InvalidCollection(format!(
                    "list {name:?} has an item ({}) with an empty reminder",
                    todo.id
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, TodoList)> for Collection {
    fn from_iter<I: IntoIterator<Item = (String, TodoList)>>(iter: I) -> Self {
        Self { lists: iter.into_iter().collect() }
    }
}

impl IntoIterator for Collection {
    type Item = (String, TodoList);
    type IntoIter = std::collections::btree_map::IntoIter<String, TodoList>;

    fn into_iter(self) -> Self::IntoIter {
        self.lists.into_iter()
    }
}
