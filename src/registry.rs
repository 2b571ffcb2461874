//! # Query Registry
//!
//! Owns the set of all live query and mutation instances, grouped by type
//! name in insertion order, and reclaims entity nodes that are no longer
//! reachable from any of them.
//!
//! Reclamation is mark-and-sweep: the mark phase walks every registered
//! instance's `data` and `request` graphs collecting reachable entity keys
//! (cycle-safe through the by-key indirection), and the sweep deletes every
//! unmarked store entry. While any instance is still loading the sweep is
//! deferred on a single debounced timer, because a pending result may
//! reference entities not yet reflected in the instance's data.

use crate::config::GcTuning;
use crate::lifecycle::Query;
use crate::model::{DataValue, EntityKey};
use crate::store::IdentityStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Registry of live instances plus the reclamation scheduler.
pub struct QueryRegistry {
    buckets: Mutex<BTreeMap<String, Vec<Query>>>,
    store: Arc<Mutex<IdentityStore>>,
    tuning: GcTuning,
    sweep_pending: AtomicBool,
}

impl QueryRegistry {
    /// Create a registry sweeping the given store
    pub fn new(store: Arc<Mutex<IdentityStore>>, tuning: GcTuning) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            store,
            tuning,
            sweep_pending: AtomicBool::new(false),
        }
    }

    /// Register an instance under its type bucket (created lazily)
    pub fn set_query(&self, query: &Query) {
        let mut buckets = self.buckets.lock();
        buckets
            .entry(query.type_name().to_string())
            .or_default()
            .push(query.clone());
    }

    /// Unregister an instance, mark it permanently disposed, and trigger a
    /// reclamation pass
    pub fn remove_query(self: &Arc<Self>, query: &Query) {
        let removed = {
            let mut buckets = self.buckets.lock();
            match buckets.get_mut(query.type_name()) {
                Some(bucket) => {
                    let before = bucket.len();
                    bucket.retain(|registered| registered != query);
                    before != bucket.len()
                }
                None => false,
            }
        };
        if !removed {
            return;
        }
        query.finish_dispose();
        self.run_gc();
    }

    /// Find the first registered instance of a type matching the predicate.
    /// Stale-flagged instances are skipped.
    pub fn find(&self, type_name: &str, predicate: impl Fn(&Query) -> bool) -> Option<Query> {
        self.find_all(type_name, predicate, false).into_iter().next()
    }

    /// Find all registered instances of a type matching the predicate, in
    /// registration order. Stale-flagged instances are skipped unless
    /// `include_stale` is set.
    pub fn find_all(
        &self,
        type_name: &str,
        predicate: impl Fn(&Query) -> bool,
        include_stale: bool,
    ) -> Vec<Query> {
        let buckets = self.buckets.lock();
        buckets
            .get(type_name)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|query| include_stale || !query.is_stale())
                    .filter(|query| predicate(query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered instances across all buckets
    pub fn len(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    /// Check if no instances are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every registered instance and every entity node, regardless
    /// of reachability. Full teardown.
    pub fn clear(&self) {
        let drained: Vec<Query> = {
            let mut buckets = self.buckets.lock();
            let drained = buckets.values().flatten().cloned().collect();
            buckets.clear();
            drained
        };
        for query in &drained {
            query.finish_dispose();
        }
        self.store.lock().clear();
        debug!(instances = drained.len(), "registry cleared");
    }

    /// Run a reclamation pass, or defer it when an instance is still loading.
    ///
    /// Re-entrant calls while a deferred sweep is pending are no-ops.
    pub fn run_gc(self: &Arc<Self>) {
        if self.sweep_pending.load(Ordering::SeqCst) {
            return;
        }

        let instances: Vec<Query> = {
            let buckets = self.buckets.lock();
            buckets.values().flatten().cloned().collect()
        };

        let mut roots = Vec::with_capacity(instances.len() * 2);
        for query in &instances {
            if query.is_loading() {
                self.defer_sweep();
                return;
            }
            roots.push(query.data());
            roots.push(query.request());
        }

        let mut store = self.store.lock();
        let mut marked = HashSet::new();
        for root in &roots {
            collect_reachable(root, &store, &mut marked);
        }
        let removed = store.sweep(&marked);
        if removed > 0 {
            debug!(removed, live = store.len(), "gc sweep");
        }
    }

    fn defer_sweep(self: &Arc<Self>) {
        if self.sweep_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(self);
                let delay = self.tuning.sweep_delay;
                debug!(delay_ms = delay.as_millis() as u64, "gc sweep deferred");
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    registry.sweep_pending.store(false, Ordering::SeqCst);
                    registry.run_gc();
                });
            }
            Err(_) => {
                // No runtime to defer on; the next lifecycle transition
                // triggers another pass.
                self.sweep_pending.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// Mark phase: collect every entity key reachable from `value`.
///
/// Each key is visited at most once, and only identified entities recurse
/// into their fields, so cyclic references terminate.
pub fn collect_reachable(
    value: &DataValue,
    store: &IdentityStore,
    marked: &mut HashSet<EntityKey>,
) {
    match value {
        DataValue::Ref(key) => {
            if marked.insert(key.clone()) {
                if let Some(node) = store.get(key) {
                    for field in node.fields.values() {
                        collect_reachable(field, store, marked);
                    }
                }
            }
        }
        DataValue::List(items) => {
            for item in items {
                collect_reachable(item, store, marked);
            }
        }
        DataValue::Object(fields) => {
            for field in fields.values() {
                collect_reachable(field, store, marked);
            }
        }
        DataValue::Null | DataValue::Scalar(_) => {}
    }
}
