//! # Query Observer
//!
//! Ephemeral subscription binding one external subscriber to one query
//! instance. On each mount or update the observer decides whether a fetch or
//! a fetch-more should be triggered; actually driving the fetch is the
//! binding layer's job. While subscribed, commit-time events are relayed to
//! the subscriber's callbacks.

use crate::lifecycle::Query;
use crate::model::DataValue;
use anyhow::Error;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback receiving committed data
pub type DataCallback = Arc<dyn Fn(&DataValue, &Query) + Send + Sync>;
/// Callback receiving a surfaced endpoint failure
pub type ErrorCallback = Arc<dyn Fn(&Arc<Error>, &Query) + Send + Sync>;

/// Per-subscription options: the variables the subscriber wants, freshness
/// policy, and event callbacks.
#[derive(Clone)]
pub struct ObserverOptions {
    /// Request variables the subscriber wants
    pub request: DataValue,
    /// Pagination variables the subscriber wants
    pub pagination: DataValue,
    /// Whether fetching is enabled at all
    pub enabled: bool,
    /// Freshness window; data older than this triggers a refetch on mount
    pub stale_time: Duration,
    /// Whether a fetch-more action is available to trigger
    pub fetch_more: bool,
    /// Raw payload used to seed an unfetched query on first mount, merged
    /// through the normal path as if it had been fetched
    pub initial_data: Option<Value>,
    /// Fired on every successful commit
    pub on_success: Option<DataCallback>,
    /// Fired when an endpoint failure is committed
    pub on_error: Option<ErrorCallback>,
    /// Fired once, on the first successful commit
    pub on_fetched: Option<DataCallback>,
    /// Fired when a fetch-more commit lands
    pub on_query_more: Option<DataCallback>,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            request: DataValue::Null,
            pagination: DataValue::Null,
            enabled: true,
            stale_time: Duration::ZERO,
            fetch_more: false,
            initial_data: None,
            on_success: None,
            on_error: None,
            on_fetched: None,
            on_query_more: None,
        }
    }
}

impl ObserverOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request variables
    pub fn request(mut self, request: impl Into<DataValue>) -> Self {
        self.request = request.into();
        self
    }

    /// Set the pagination variables
    pub fn pagination(mut self, pagination: impl Into<DataValue>) -> Self {
        self.pagination = pagination.into();
        self
    }

    /// Enable or disable fetching
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the freshness window
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    /// Mark that a fetch-more action is available
    pub fn fetch_more(mut self, fetch_more: bool) -> Self {
        self.fetch_more = fetch_more;
        self
    }

    /// Set the initial data used to seed an unfetched query
    pub fn initial_data(mut self, initial_data: Value) -> Self {
        self.initial_data = Some(initial_data);
        self
    }

    /// Set the success callback
    pub fn on_success(mut self, f: impl Fn(&DataValue, &Query) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Set the error callback
    pub fn on_error(mut self, f: impl Fn(&Arc<Error>, &Query) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the first-fetch callback
    pub fn on_fetched(mut self, f: impl Fn(&DataValue, &Query) + Send + Sync + 'static) -> Self {
        self.on_fetched = Some(Arc::new(f));
        self
    }

    /// Set the fetch-more callback
    pub fn on_query_more(mut self, f: impl Fn(&DataValue, &Query) + Send + Sync + 'static) -> Self {
        self.on_query_more = Some(Arc::new(f));
        self
    }
}

/// What a mount or update should trigger, if anything.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchDecision {
    /// Issue a fresh fetch (initial load or refetch) with these variables
    Fetch {
        request: DataValue,
        pagination: DataValue,
    },
    /// Issue a fetch-more with these variables
    FetchMore {
        request: DataValue,
        pagination: DataValue,
    },
}

struct ObserverInner {
    query: Query,
    options: Mutex<ObserverOptions>,
    mounted: AtomicBool,
}

/// One subscriber's binding to one query instance. Cheap to clone; clones
/// share the subscription.
#[derive(Clone)]
pub struct QueryObserver {
    inner: Arc<ObserverInner>,
}

impl QueryObserver {
    /// Create an observer for a query; no subscription happens until
    /// [`QueryObserver::set_options`] or [`QueryObserver::subscribe`]
    pub fn new(query: &Query) -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                query: query.clone(),
                options: Mutex::new(ObserverOptions::default()),
                mounted: AtomicBool::new(false),
            }),
        }
    }

    /// The query this observer is bound to
    pub fn query(&self) -> &Query {
        &self.inner.query
    }

    /// Whether the first mount has happened
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Start receiving commit notifications
    pub fn subscribe(&self) {
        self.inner.query.subscribe(self);
    }

    /// Stop receiving notifications; none are delivered after this returns
    pub fn unsubscribe(&self) {
        self.inner.query.unsubscribe(self);
    }

    /// Store new options, subscribe, seed an unfetched query from any
    /// initial data, and decide what this mount or update should trigger.
    pub fn set_options(&self, options: ObserverOptions) -> Option<FetchDecision> {
        *self.inner.options.lock() = options;
        self.subscribe();
        self.hydrate_if_unfetched();
        let decision = self.decide();
        self.inner.mounted.store(true, Ordering::SeqCst);
        decision
    }

    /// Seed the query from `initial_data` on first mount. Applies only while
    /// the query has never fetched and nothing is in flight; the seeded data
    /// counts as cached, so the staleness rule decides whether a fetch still
    /// follows.
    fn hydrate_if_unfetched(&self) {
        let query = &self.inner.query;
        if self.is_mounted() || query.is_disposed() || query.is_fetched() || query.is_loading() {
            return;
        }
        let initial = self.inner.options.lock().initial_data.clone();
        if let Some(initial) = initial {
            query.hydrate(initial);
        }
    }

    fn decide(&self) -> Option<FetchDecision> {
        let query = &self.inner.query;
        if query.is_disposed() {
            return None;
        }
        let options = self.inner.options.lock();
        if !options.enabled {
            return None;
        }

        let fetch = || FetchDecision::Fetch {
            request: options.request.clone(),
            pagination: options.pagination.clone(),
        };

        if !self.is_mounted() {
            if !query.is_fetched() && !query.is_loading() {
                return Some(fetch());
            }
            if query.is_fetched() {
                let stale = query
                    .cached_at()
                    .is_none_or(|at| at.elapsed() >= options.stale_time);
                if stale {
                    return Some(fetch());
                }
            }
        }

        if options.request != query.request() {
            return Some(fetch());
        }

        if options.fetch_more && query.is_fetched() && options.pagination != query.pagination() {
            return Some(FetchDecision::FetchMore {
                request: options.request.clone(),
                pagination: options.pagination.clone(),
            });
        }

        None
    }

    pub(crate) fn ptr_eq(&self, other: &QueryObserver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn emit_success(&self, data: &DataValue, query: &Query) {
        let callback = self.inner.options.lock().on_success.clone();
        if let Some(callback) = callback {
            callback(data, query);
        }
    }

    pub(crate) fn emit_error(&self, error: &Arc<Error>, query: &Query) {
        let callback = self.inner.options.lock().on_error.clone();
        if let Some(callback) = callback {
            callback(error, query);
        }
    }

    pub(crate) fn emit_fetched(&self, data: &DataValue, query: &Query) {
        let callback = self.inner.options.lock().on_fetched.clone();
        if let Some(callback) = callback {
            callback(data, query);
        }
    }

    pub(crate) fn emit_query_more(&self, data: &DataValue, query: &Query) {
        let callback = self.inner.options.lock().on_query_more.clone();
        if let Some(callback) = callback {
            callback(data, query);
        }
    }
}
