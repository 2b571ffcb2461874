//! # Shape Module
//!
//! Declared-shape descriptors supplied by the type definitions external to
//! the cache core. A shape tells the merge walk which parts of a raw payload
//! are entity references and which are opaque; entity types reference each
//! other by name, so cyclic type definitions need no special handling.

use std::collections::{BTreeMap, HashMap};

/// Declared shape of a value in a fetched payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Uninterpreted value, stored as an inert blob
    Opaque,
    /// A registered entity type, referenced by name
    Entity(String),
    /// Ordered sequence whose elements share one shape
    List(Box<Shape>),
    /// Structured but unidentified object with per-field shapes
    Object(BTreeMap<String, Shape>),
}

impl Shape {
    /// Shorthand for an entity shape
    pub fn entity(type_name: impl Into<String>) -> Self {
        Shape::Entity(type_name.into())
    }

    /// Shorthand for a sequence shape
    pub fn list(inner: Shape) -> Self {
        Shape::List(Box::new(inner))
    }

    /// Shorthand for an object shape
    pub fn object(fields: impl IntoIterator<Item = (&'static str, Shape)>) -> Self {
        Shape::Object(
            fields
                .into_iter()
                .map(|(name, shape)| (name.to_string(), shape))
                .collect(),
        )
    }
}

/// Field layout for one entity type.
///
/// Only declared fields are recursively merged; everything else in a payload
/// passes through as opaque. The identifier field names the raw payload key
/// that carries the entity's identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityShape {
    /// The entity type name this layout describes
    pub type_name: String,
    /// Raw payload field carrying the identifier (default: `id`)
    pub identifier_field: String,
    /// Declared fields and their shapes
    pub fields: BTreeMap<String, Shape>,
}

impl EntityShape {
    /// Create a new entity shape with the default identifier field
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            identifier_field: "id".to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// Override the identifier field name
    pub fn identifier_field(mut self, name: impl Into<String>) -> Self {
        self.identifier_field = name.into();
        self
    }

    /// Declare a field and its shape
    pub fn field(mut self, name: impl Into<String>, shape: Shape) -> Self {
        self.fields.insert(name.into(), shape);
        self
    }
}

/// Registry of entity shapes, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    types: HashMap<String, EntityShape>,
}

impl ShapeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity shape, replacing any previous layout for the type
    pub fn register(&mut self, shape: EntityShape) {
        self.types.insert(shape.type_name.clone(), shape);
    }

    /// Look up the layout for a type name
    pub fn get(&self, type_name: &str) -> Option<&EntityShape> {
        self.types.get(type_name)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_builders() {
        let shape = Shape::object([("items", Shape::list(Shape::entity("Item")))]);
        let Shape::Object(fields) = &shape else {
            panic!("expected object shape");
        };
        assert_eq!(
            fields.get("items"),
            Some(&Shape::List(Box::new(Shape::Entity("Item".to_string()))))
        );
    }

    #[test]
    fn test_entity_shape_builder() {
        let shape = EntityShape::new("User")
            .identifier_field("uid")
            .field("name", Shape::Opaque)
            .field("manager", Shape::entity("User"));

        assert_eq!(shape.type_name, "User");
        assert_eq!(shape.identifier_field, "uid");
        assert_eq!(shape.fields.len(), 2);
    }

    #[test]
    fn test_registry_resolves_cyclic_types() {
        let mut registry = ShapeRegistry::new();
        registry.register(EntityShape::new("User").field("friend", Shape::entity("User")));

        let user = registry.get("User").expect("registered");
        assert_eq!(user.fields.get("friend"), Some(&Shape::entity("User")));
        assert!(registry.get("Unknown").is_none());
    }
}
