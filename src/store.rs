//! # Identity Store
//!
//! The single source of truth for entity identity: a mapping from
//! [`EntityKey`] to the one live node for that key. Upserts update existing
//! nodes in place so that outstanding references observe new values without
//! re-resolution. Nothing is evicted implicitly; removal happens only through
//! the reclamation sweep or a full [`IdentityStore::clear`].
//!
//! The store also supports recorded mutation via [`RecordingStore`], which
//! captures a reversible [`ChangeLog`] for optimistic updates.

use crate::model::{EntityKey, EntityNode, Snapshot};
use hashbrown::HashMap;
use std::collections::HashSet;

/// Global mapping from entity key to its live node.
#[derive(Debug, Clone, Default)]
pub struct IdentityStore {
    entities: HashMap<EntityKey, EntityNode>,
}

impl IdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the node for a key
    pub fn get(&self, key: &EntityKey) -> Option<&EntityNode> {
        self.entities.get(key)
    }

    /// Get a mutable reference to the node for a key
    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut EntityNode> {
        self.entities.get_mut(key)
    }

    /// Check whether a key has a live node
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Insert or update the node for `key`.
    ///
    /// An existing node is updated field by field in place; fields absent
    /// from `fields` keep their current values. Returns true when the store
    /// actually changed.
    pub fn upsert(&mut self, key: EntityKey, fields: Snapshot) -> bool {
        match self.entities.get_mut(&key) {
            Some(node) => {
                let mut changed = false;
                for (name, value) in fields {
                    if node.fields.get(&name) != Some(&value) {
                        node.fields.insert(name, value);
                        changed = true;
                    }
                }
                changed
            }
            None => {
                let mut node = EntityNode::new(key.clone());
                node.fields = fields;
                self.entities.insert(key, node);
                true
            }
        }
    }

    /// Remove the node for a key, returning it if present
    pub fn delete(&mut self, key: &EntityKey) -> Option<EntityNode> {
        self.entities.remove(key)
    }

    /// Delete every node whose key is not in `marked`, returning the number
    /// of nodes removed. This is the sweep half of reclamation.
    pub fn sweep(&mut self, marked: &HashSet<EntityKey>) -> usize {
        let before = self.entities.len();
        self.entities.retain(|key, _| marked.contains(key));
        before - self.entities.len()
    }

    /// Iterate over all live keys
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.keys()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the store holds no nodes
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Remove every node unconditionally
    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Run `f` against a recording view of this store and return the change
    /// log it produced
    pub fn record<F>(&mut self, f: F) -> ChangeLog
    where
        F: FnOnce(&mut RecordingStore<'_>),
    {
        let mut recording = RecordingStore {
            store: self,
            log: ChangeLog::default(),
        };
        f(&mut recording);
        recording.log
    }
}

/// One recorded store mutation, holding the state it replaced.
#[derive(Debug)]
enum ChangeEntry {
    /// An upsert touched `key`; `prev` is the node before it (absent on create)
    Upsert {
        key: EntityKey,
        prev: Option<EntityNode>,
    },
    /// A delete removed `key`; `prev` is the removed node
    Delete { key: EntityKey, prev: EntityNode },
}

/// Reversible record of store mutations.
///
/// Produced by [`IdentityStore::record`]; [`ChangeLog::undo`] replays the log
/// in reverse, restoring the prior store state exactly.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: Vec<ChangeEntry>,
}

impl ChangeLog {
    /// Number of recorded mutations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Undo every recorded mutation, newest first
    pub fn undo(self, store: &mut IdentityStore) {
        for entry in self.entries.into_iter().rev() {
            match entry {
                ChangeEntry::Upsert { key, prev } => match prev {
                    Some(node) => {
                        store.entities.insert(key, node);
                    }
                    None => {
                        store.entities.remove(&key);
                    }
                },
                ChangeEntry::Delete { key, prev } => {
                    store.entities.insert(key, prev);
                }
            }
        }
    }
}

/// Mutable view of an [`IdentityStore`] that records every mutation into a
/// [`ChangeLog`] so it can be undone later.
#[derive(Debug)]
pub struct RecordingStore<'a> {
    store: &'a mut IdentityStore,
    log: ChangeLog,
}

impl RecordingStore<'_> {
    /// Get the node for a key
    pub fn get(&self, key: &EntityKey) -> Option<&EntityNode> {
        self.store.get(key)
    }

    /// Insert or update the node for `key`, recording the prior state
    pub fn upsert(&mut self, key: EntityKey, fields: Snapshot) {
        let prev = self.store.get(&key).cloned();
        self.store.upsert(key.clone(), fields);
        self.log.entries.push(ChangeEntry::Upsert { key, prev });
    }

    /// Remove the node for a key, recording it for undo
    pub fn delete(&mut self, key: &EntityKey) {
        if let Some(prev) = self.store.delete(key) {
            self.log.entries.push(ChangeEntry::Delete {
                key: key.clone(),
                prev,
            });
        }
    }
}
