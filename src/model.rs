//! # Data Model
//!
//! Core data structures for the normalized cache: entity keys, the normalized
//! value graph, and entity nodes with snapshot support.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier for an entity node, scoped by its type name.
///
/// Keys are the unit of identity for the whole cache: every reference from
/// query data or request graphs is a lookup by key, never an ownership edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// The entity type (e.g., "Item", "User")
    pub type_name: String,
    /// Unique identifier within the type
    pub id: String,
}

impl EntityKey {
    /// Create a new entity key
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// A node in the normalized value graph.
///
/// Entity references are non-owning [`DataValue::Ref`] edges resolved through
/// the identity store. Anything the declared shape does not model is carried
/// as an inert `Scalar` blob and never interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataValue {
    /// Absent or null value
    Null,
    /// Opaque leaf value, stored uninterpreted
    Scalar(Value),
    /// Non-owning reference to an entity node, by key
    Ref(EntityKey),
    /// Ordered sequence of values
    List(Vec<DataValue>),
    /// Structured but unidentified data, with deterministic field order
    Object(BTreeMap<String, DataValue>),
}

impl DataValue {
    /// Check whether this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Get the entity key if this value is a reference
    pub fn as_entity_key(&self) -> Option<&EntityKey> {
        match self {
            DataValue::Ref(key) => Some(key),
            _ => None,
        }
    }

    /// Get the elements if this value is a sequence
    pub fn as_list(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get a field of an object value
    pub fn field(&self, name: &str) -> Option<&DataValue> {
        match self {
            DataValue::Object(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Get the raw value if this is an opaque scalar
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            DataValue::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

impl Default for DataValue {
    fn default() -> Self {
        DataValue::Null
    }
}

impl From<Value> for DataValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DataValue::Null,
            other => DataValue::Scalar(other),
        }
    }
}

impl From<EntityKey> for DataValue {
    fn from(key: EntityKey) -> Self {
        DataValue::Ref(key)
    }
}

/// Plain-value copy of an entity's current state, used for equality comparison
pub type Snapshot = BTreeMap<String, DataValue>;

/// An entity node owned by the identity store.
///
/// Node identity is the key: the store never holds two nodes for the same
/// `(type, id)`, and field updates mutate the node in place so that all
/// outstanding references observe them without re-resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    /// The key this node is registered under
    pub key: EntityKey,
    /// Current field values, normalized
    pub fields: Snapshot,
}

impl EntityNode {
    /// Create a new node with no fields
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            fields: BTreeMap::new(),
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&DataValue> {
        self.fields.get(field)
    }

    /// Set a field value in place
    pub fn set(&mut self, field: impl Into<String>, value: DataValue) {
        self.fields.insert(field.into(), value);
    }

    /// Take a plain-value snapshot of the current field state
    pub fn snapshot(&self) -> Snapshot {
        self.fields.clone()
    }
}
