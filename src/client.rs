//! # Query Client
//!
//! Explicit owner of one isolated cache: the identity store, the query
//! registry, and the declared shapes. Clients are created at initialization
//! and passed by reference; nothing in this crate is a module-level
//! singleton, so tests and multi-tenant embeddings can run any number of
//! isolated instances side by side.

use crate::config::ClientConfig;
use crate::lifecycle::{Endpoint, Query};
use crate::model::{EntityKey, EntityNode};
use crate::observer::ObserverOptions;
use crate::registry::QueryRegistry;
use crate::shape::{Shape, ShapeRegistry};
use crate::store::IdentityStore;
use parking_lot::Mutex;
use std::sync::Arc;

pub(crate) struct ClientCore {
    pub(crate) store: Arc<Mutex<IdentityStore>>,
    pub(crate) registry: Arc<QueryRegistry>,
    pub(crate) shapes: ShapeRegistry,
    pub(crate) config: ClientConfig,
}

/// Handle to one isolated cache. Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
    core: Arc<ClientCore>,
}

impl QueryClient {
    /// Create a client with default configuration
    pub fn new(shapes: ShapeRegistry) -> Self {
        Self::with_config(shapes, ClientConfig::default())
    }

    /// Create a client with explicit configuration
    pub fn with_config(shapes: ShapeRegistry, config: ClientConfig) -> Self {
        let store = Arc::new(Mutex::new(IdentityStore::new()));
        let registry = Arc::new(QueryRegistry::new(Arc::clone(&store), config.gc.clone()));
        Self {
            core: Arc::new(ClientCore {
                store,
                registry,
                shapes,
                config,
            }),
        }
    }

    /// Create a query instance and register it with the registry
    pub fn create_query(
        &self,
        type_name: impl Into<String>,
        data_shape: Shape,
        endpoint: Endpoint,
    ) -> Query {
        let query = Query::new(
            Arc::clone(&self.core),
            type_name.into(),
            data_shape,
            endpoint,
        );
        self.core.registry.set_query(&query);
        query
    }

    /// Create a mutation instance. Mutations register like queries, so data
    /// committed by a settled mutation keeps its entities alive until the
    /// instance is disposed.
    pub fn create_mutation(
        &self,
        type_name: impl Into<String>,
        data_shape: Shape,
        endpoint: Endpoint,
    ) -> Query {
        self.create_query(type_name, data_shape, endpoint)
    }

    /// The registry owning all live instances
    pub fn registry(&self) -> &Arc<QueryRegistry> {
        &self.core.registry
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Observer options seeded with the client's default freshness window
    pub fn observer_options(&self) -> ObserverOptions {
        ObserverOptions::default().stale_time(self.core.config.stale_time)
    }

    /// Look up an entity node by key, returning a plain-value copy
    pub fn entity(&self, key: &EntityKey) -> Option<EntityNode> {
        self.core.store.lock().get(key).cloned()
    }

    /// Number of live entity nodes
    pub fn entity_count(&self) -> usize {
        self.core.store.lock().len()
    }

    /// Run `f` against the identity store
    pub fn with_store<R>(&self, f: impl FnOnce(&IdentityStore) -> R) -> R {
        f(&self.core.store.lock())
    }

    /// Full teardown: destroy every registered instance and every entity
    /// node. Used for session reset.
    pub fn clear(&self) {
        self.core.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    #[test]
    fn test_client_registers_created_queries() {
        let client = test_support::client();
        let query = client.create_query(
            "ItemQuery",
            Shape::entity("Item"),
            test_support::resolve_endpoint(serde_json::json!({"id": "1"})),
        );

        assert_eq!(client.registry().len(), 1);
        assert!(client
            .registry()
            .find("ItemQuery", |_| true)
            .is_some_and(|found| found == query));
    }

    #[test]
    fn test_clear_empties_registry_and_store() {
        let client = test_support::client();
        let query = client.create_query(
            "ItemQuery",
            Shape::entity("Item"),
            test_support::resolve_endpoint(serde_json::json!({"id": "1"})),
        );

        client.clear();
        assert!(client.registry().is_empty());
        assert_eq!(client.entity_count(), 0);
        assert!(query.is_disposed());
    }

    #[test]
    fn test_clients_are_isolated() {
        let first = test_support::client();
        let second = test_support::client();
        first.create_query(
            "ItemQuery",
            Shape::entity("Item"),
            test_support::resolve_endpoint(serde_json::json!({"id": "1"})),
        );

        assert_eq!(first.registry().len(), 1);
        assert!(second.registry().is_empty());
    }
}
