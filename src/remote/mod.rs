//! Remote real-time document store.
//!
//! The store is addressed by slash separated paths (`families/AB12CD/members`).
//! Writes replace the whole value at a path; subscriptions deliver the
//! current value first and then the full value again after every change.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod rest;

pub use memory::MemoryRemote;
pub use rest::RestRemote;

/// Whole-value snapshots for one path. `Value::Null` means the path holds no data.
pub type SnapshotStream = BoxStream<'static, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("remote store returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode remote payload: {0}")]
    Decode(String),
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the value stored at `path`.
    async fn write(&self, path: &str, value: Value) -> Result<(), RemoteError>;

    /// One-shot read. `None` when nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Open a live subscription for `path`. Dropping the stream unsubscribes.
    async fn subscribe(&self, path: &str) -> Result<SnapshotStream, RemoteError>;
}

pub const FAMILIES_ROOT: &str = "families";

pub fn family_path(code: &str) -> String {
    format!("{FAMILIES_ROOT}/{code}")
}

pub fn collection_path(code: &str, remote_name: &str) -> String {
    format!("{FAMILIES_ROOT}/{code}/{remote_name}")
}

/// Split a store path into its non-empty segments.
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Child of `value` named by `segment`. Arrays are addressed by index.
fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn existing_child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Borrow the value at `segments` inside `root`, if present.
pub(crate) fn value_at<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = child(current, segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Replace the value at `segments` inside `root`, creating intermediate
/// objects. Writing `Null` removes the key and prunes empty parents.
pub(crate) fn set_value_at(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    if value.is_null() {
        remove_value_at(root, parents, last);
        return;
    }

    let mut current = root;
    for segment in parents {
        current = child_slot(current, segment);
    }
    *child_slot(current, last) = value;
}

/// Make room for `segment` under `value`. Returns the index to use when
/// `value` stays an array: an existing element or one past the end. Any
/// other index turns the array into an index-keyed object, which is how
/// the store itself keeps sparse arrays.
fn prepare_slot(value: &mut Value, segment: &str) -> Option<usize> {
    if let Value::Array(items) = value {
        match segment.parse::<usize>() {
            Ok(index) if index < items.len() => return Some(index),
            Ok(index) if index == items.len() => {
                items.push(Value::Null);
                return Some(index);
            }
            _ => {
                *value = index_keyed(std::mem::take(items));
                return None;
            }
        }
    }
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    None
}

fn child_slot<'a>(value: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = prepare_slot(value, segment);
    match (value, index) {
        (Value::Array(items), Some(index)) => &mut items[index],
        (Value::Object(map), _) => map.entry(segment.to_string()).or_insert(Value::Null),
        (other, _) => other,
    }
}

fn index_keyed(items: Vec<Value>) -> Value {
    Value::Object(
        items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| !item.is_null())
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
    )
}

fn remove_child(value: &mut Value, segment: &str) {
    match value {
        Value::Object(map) => {
            map.remove(segment);
        }
        Value::Array(items) => {
            let Ok(index) = segment.parse::<usize>() else {
                return;
            };
            let Some(slot) = items.get_mut(index) else {
                return;
            };
            *slot = Value::Null;
            while items.last().is_some_and(Value::is_null) {
                items.pop();
            }
            if items.iter().any(Value::is_null) {
                *value = index_keyed(std::mem::take(items));
            }
        }
        _ => {}
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn remove_value_at(root: &mut Value, parents: &[&str], last: &str) {
    match parents.split_first() {
        None => remove_child(root, last),
        Some((head, rest)) => {
            let emptied = match existing_child_mut(root, head) {
                Some(child) => {
                    remove_value_at(child, rest, last);
                    is_empty_container(child)
                }
                None => false,
            };
            if emptied {
                remove_child(root, head);
            }
        }
    }
}
