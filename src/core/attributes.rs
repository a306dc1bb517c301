//! TP-006: Runtime attribute state.
//!
//! Attribute values set after a component reaches a lifecycle stage. This is
//! the only mutable part of a flattened model; it sits behind a `RwLock` so
//! evaluation can run concurrently with the setter.

use super::assignment::Value;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Namespace of a component name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Node,
    Relationship,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Relationship => write!(f, "relationship"),
        }
    }
}

type Key = (ComponentKind, String);

#[derive(Debug, Default)]
pub struct AttributeStore {
    values: RwLock<FxHashMap<Key, IndexMap<String, Value>>>,
}

impl Clone for AttributeStore {
    /// Point-in-time snapshot.
    fn clone(&self) -> Self {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Self {
            values: RwLock::new(values.clone()),
        }
    }
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute, returning the previous runtime value.
    pub fn set(
        &self,
        kind: ComponentKind,
        component: &str,
        name: &str,
        value: Value,
    ) -> Option<Value> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values
            .entry((kind, component.to_string()))
            .or_default()
            .insert(name.to_string(), value)
    }

    pub fn get(&self, kind: ComponentKind, component: &str, name: &str) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(&(kind, component.to_string()))
            .and_then(|attrs| attrs.get(name))
            .cloned()
    }

    pub fn contains(&self, kind: ComponentKind, component: &str, name: &str) -> bool {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(&(kind, component.to_string()))
            .is_some_and(|attrs| attrs.contains_key(name))
    }

    /// All runtime attributes of one component, in set order.
    pub fn component(&self, kind: ComponentKind, component: &str) -> IndexMap<String, Value> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values
            .get(&(kind, component.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every runtime value of a component (e.g. after it is deleted).
    pub fn clear(&self, kind: ComponentKind, component: &str) {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(&(kind, component.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        values.values().all(IndexMap::is_empty)
    }
}
