//! # Normalizing Merge
//!
//! Reconciles a raw fetched payload against a declared shape, producing and
//! updating nodes in the identity store while preserving node identity for
//! repeated identifiers. The walk is driven entirely by the shape: declared
//! entity fields recurse, everything else passes through as an opaque blob.

use crate::model::{DataValue, EntityKey, Snapshot};
use crate::shape::{Shape, ShapeRegistry};
use crate::store::IdentityStore;
use anyhow::{anyhow, bail, Result};
use serde_json::Value;

/// Fallback shape for fields the declared layout does not model.
const OPAQUE: &Shape = &Shape::Opaque;

/// Merge a raw payload into the store under a declared shape, returning the
/// normalized value graph for it.
///
/// With `skip_if_unchanged`, an entity whose recomputed snapshot is deep-equal
/// to its current one is left untouched, so re-merging an identical payload
/// produces no observable store mutation. The merge is idempotent either way:
/// the same payload yields the same node identities and an equal snapshot.
pub fn merge(
    raw: &Value,
    shape: &Shape,
    store: &mut IdentityStore,
    shapes: &ShapeRegistry,
    skip_if_unchanged: bool,
) -> Result<DataValue> {
    match shape {
        Shape::Opaque => Ok(DataValue::from(raw.clone())),
        Shape::List(inner) => match raw {
            Value::Null => Ok(DataValue::Null),
            Value::Array(items) => {
                // Membership reflects the new payload exactly; elements absent
                // from it drop out of the sequence, though their nodes survive
                // if referenced elsewhere.
                let merged = items
                    .iter()
                    .map(|item| merge(item, inner, store, shapes, skip_if_unchanged))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DataValue::List(merged))
            }
            other => bail!("expected a sequence, got {}", value_kind(other)),
        },
        Shape::Object(fields) => match raw {
            Value::Null => Ok(DataValue::Null),
            Value::Object(map) => {
                let mut merged = Snapshot::new();
                for (name, value) in map {
                    let field_shape = fields.get(name).unwrap_or(OPAQUE);
                    merged.insert(
                        name.clone(),
                        merge(value, field_shape, store, shapes, skip_if_unchanged)?,
                    );
                }
                Ok(DataValue::Object(merged))
            }
            other => bail!("expected an object, got {}", value_kind(other)),
        },
        Shape::Entity(type_name) => {
            let entity_shape = shapes
                .get(type_name)
                .ok_or_else(|| anyhow!("unknown entity type: {type_name}"))?;
            match raw {
                Value::Null => Ok(DataValue::Null),
                Value::Object(map) => {
                    let mut fields = Snapshot::new();
                    for (name, value) in map {
                        let field_shape = entity_shape.fields.get(name).unwrap_or(OPAQUE);
                        fields.insert(
                            name.clone(),
                            merge(value, field_shape, store, shapes, skip_if_unchanged)?,
                        );
                    }

                    match identifier_of(map.get(&entity_shape.identifier_field)) {
                        Some(id) => {
                            let key = EntityKey::new(type_name.clone(), id);
                            let unchanged = skip_if_unchanged
                                && store.get(&key).is_some_and(|node| {
                                    fields
                                        .iter()
                                        .all(|(name, value)| node.get(name) == Some(value))
                                });
                            if !unchanged {
                                store.upsert(key.clone(), fields);
                            }
                            Ok(DataValue::Ref(key))
                        }
                        // No identifier: structured data without identity
                        None => Ok(DataValue::Object(fields)),
                    }
                }
                other => bail!(
                    "expected an object for entity type {}, got {}",
                    type_name,
                    value_kind(other)
                ),
            }
        }
    }
}

/// Fetch-more accumulation: grow `existing` with `incoming` instead of
/// replacing it. Sequence fields present in both sides are extended in order;
/// everything else takes the incoming value. Entity-node targets are extended
/// in the store so all references observe the growth.
pub fn accumulate(existing: &mut DataValue, incoming: &DataValue, store: &mut IdentityStore) {
    match (&mut *existing, incoming) {
        (DataValue::List(items), DataValue::List(new_items)) => {
            items.extend(new_items.iter().cloned());
        }
        (DataValue::Object(fields), DataValue::Object(new_fields)) => {
            accumulate_fields(fields, new_fields);
        }
        (DataValue::Ref(key), DataValue::Object(new_fields)) => {
            let key = key.clone();
            if let Some(node) = store.get_mut(&key) {
                accumulate_fields(&mut node.fields, new_fields);
            }
        }
        (DataValue::Ref(key), DataValue::Ref(new_key)) if key != new_key => {
            let new_fields = store.get(new_key).map(|node| node.snapshot());
            let key = key.clone();
            if let (Some(new_fields), Some(node)) = (new_fields, store.get_mut(&key)) {
                accumulate_fields(&mut node.fields, &new_fields);
            }
        }
        (DataValue::Ref(_), DataValue::Ref(_)) => {}
        (_, incoming) => *existing = incoming.clone(),
    }
}

fn accumulate_fields(fields: &mut Snapshot, incoming: &Snapshot) {
    for (name, value) in incoming {
        match (fields.get_mut(name), value) {
            (Some(DataValue::List(items)), DataValue::List(new_items)) => {
                items.extend(new_items.iter().cloned());
            }
            (Some(DataValue::Object(nested)), DataValue::Object(new_nested)) => {
                accumulate_fields(nested, new_nested);
            }
            _ => {
                fields.insert(name.clone(), value.clone());
            }
        }
    }
}

fn identifier_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "an object",
    }
}
