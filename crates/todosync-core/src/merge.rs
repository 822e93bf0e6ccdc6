//! Merge engine.
//!
//! Last-writer-wins at list granularity: every list in the incoming
//! collection replaces the local list of the same name, local-only lists are
//! kept. No item-level diffing.

use todosync_proto::Collection;

/// Merge `incoming` into `local`.
///
/// The result contains every list name of both inputs. Merge never removes
/// a list.
pub fn merge(local: Collection, incoming: Collection) -> Collection {
    let mut merged = local;
    for (name, list) in incoming {
        merged.insert(name, list);
    }
    merged
}

/// Pick the active list after a merge.
///
/// A configured name always wins. Otherwise, if the collection was empty
/// before the merge, the first incoming list in key order becomes active.
/// Otherwise the current choice stays.
pub(crate) fn choose_active_list(
    configured: Option<&str>,
    current: Option<String>,
    was_empty: bool,
    incoming: &Collection,
) -> Option<String> {
    match configured.filter(|name| !name.is_empty()) {
        Some(name) => Some(name.to_string()),
        None if was_empty => incoming.first_name().map(str::to_string).or(current),
        None => current,
    }
}
