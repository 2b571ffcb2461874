//! # Query Lifecycle
//!
//! The per-instance asynchronous state machine: issuing runs, tracking status
//! flags, cancellation, and committing settled results through the merge.
//!
//! Settlements are two-phase. An operation resolves to a [`Commit`] value;
//! nothing is applied until [`Commit::commit`] is invoked, which performs the
//! merge, flips the status flags, and fires notifications in one atomic step.
//! A commit on a disposed or superseded operation applies nothing.

use crate::client::ClientCore;
use crate::config::{MutateOptions, QueryOptions};
use crate::error::QueryError;
use crate::merge::{accumulate, merge};
use crate::model::DataValue;
use crate::observer::QueryObserver;
use crate::shape::Shape;
use crate::store::ChangeLog;
use anyhow::Error;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Future returned by an endpoint call.
pub type EndpointFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// The externally supplied function performing the actual I/O for a query or
/// mutation. The sole I/O boundary of the cache.
pub type Endpoint = Arc<dyn Fn(EndpointRequest, Query) -> EndpointFuture + Send + Sync>;

/// Cooperative cancellation signal threaded through every asynchronous call.
///
/// The signal is checked synchronously at the start of the commit step; an
/// endpoint may additionally observe it to stop its own work early, but is
/// not required to.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Create a fresh, un-aborted signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate the signal; any settlement carrying it is discarded
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Check whether the signal was invalidated
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Options handed to the endpoint for one run.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    /// Current request variables
    pub request: DataValue,
    /// Current pagination variables
    pub pagination: DataValue,
    /// Caller-supplied per-call context, passed through untouched
    /// (`Value::Null` when unset)
    pub context: Value,
    /// Cancellation signal for this run
    pub signal: AbortSignal,
}

#[derive(Default)]
struct QueryState {
    request: DataValue,
    pagination: DataValue,
    previous_request: DataValue,
    previous_pagination: DataValue,
    data: DataValue,
    result: Option<Value>,
    error: Option<Arc<Error>>,
    is_loading: bool,
    is_refetching: bool,
    is_fetching_more: bool,
    is_fetched: bool,
    stale: bool,
    cached_at: Option<Instant>,
    token: Option<AbortSignal>,
}

struct QueryInner {
    type_name: String,
    data_shape: Shape,
    endpoint: Endpoint,
    core: Arc<ClientCore>,
    state: Mutex<QueryState>,
    observers: Mutex<Vec<QueryObserver>>,
    disposed: AtomicBool,
}

/// One logical query or mutation binding, registered with the query registry
/// on creation and permanently disposed on teardown.
///
/// Cheap to clone; all clones share one instance.
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Query {}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("type_name", &self.inner.type_name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Query {
    pub(crate) fn new(
        core: Arc<ClientCore>,
        type_name: String,
        data_shape: Shape,
        endpoint: Endpoint,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                type_name,
                data_shape,
                endpoint,
                core,
                state: Mutex::new(QueryState::default()),
                observers: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The type name this instance is bucketed under
    pub fn type_name(&self) -> &str {
        &self.inner.type_name
    }

    /// Current normalized data
    pub fn data(&self) -> DataValue {
        self.inner.state.lock().data.clone()
    }

    /// Last raw result, before normalization
    pub fn result(&self) -> Option<Value> {
        self.inner.state.lock().result.clone()
    }

    /// Current error, if the last settlement was an endpoint failure
    pub fn error(&self) -> Option<Arc<Error>> {
        self.inner.state.lock().error.clone()
    }

    /// Current request variables
    pub fn request(&self) -> DataValue {
        self.inner.state.lock().request.clone()
    }

    /// Current pagination variables
    pub fn pagination(&self) -> DataValue {
        self.inner.state.lock().pagination.clone()
    }

    /// Whether a run is currently in flight
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().is_loading
    }

    /// Whether the in-flight run is a refetch
    pub fn is_refetching(&self) -> bool {
        self.inner.state.lock().is_refetching
    }

    /// Whether the in-flight run is a fetch-more
    pub fn is_fetching_more(&self) -> bool {
        self.inner.state.lock().is_fetching_more
    }

    /// Whether this instance has ever committed a successful result
    pub fn is_fetched(&self) -> bool {
        self.inner.state.lock().is_fetched
    }

    /// Whether this instance was flagged stale
    pub fn is_stale(&self) -> bool {
        self.inner.state.lock().stale
    }

    /// Flag or unflag this instance as stale; stale instances are excluded
    /// from default registry lookups
    pub fn set_stale(&self, stale: bool) {
        self.inner.state.lock().stale = stale;
    }

    /// When the current data was committed
    pub fn cached_at(&self) -> Option<Instant> {
        self.inner.state.lock().cached_at
    }

    /// Whether this instance has been permanently disposed
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn core(&self) -> &Arc<ClientCore> {
        &self.inner.core
    }

    /// Issue a run: record the new variables (keeping the previous pair for
    /// rollback), supersede any in-flight operation, and await the endpoint.
    ///
    /// A settlement that arrives after cancellation or disposal resolves to
    /// [`QueryError::Disposed`], which the commit boundary swallows.
    async fn run(&self, options: QueryOptions) -> Result<Value, QueryError> {
        let (signal, endpoint_request) = {
            let mut state = self.inner.state.lock();
            state.previous_request =
                mem::replace(&mut state.request, options.request.clone().unwrap_or_default());
            state.previous_pagination = mem::replace(
                &mut state.pagination,
                options.pagination.clone().unwrap_or_default(),
            );

            // Last-issued-wins: only the most recent token may commit.
            if state.is_loading {
                if let Some(token) = state.token.take() {
                    token.abort();
                }
            }
            let signal = AbortSignal::new();
            state.token = Some(signal.clone());
            state.is_loading = true;
            state.error = None;

            let endpoint_request = EndpointRequest {
                request: state.request.clone(),
                pagination: state.pagination.clone(),
                context: options.context.clone().unwrap_or(Value::Null),
                signal: signal.clone(),
            };
            (signal, endpoint_request)
        };

        debug!(query = %self.inner.type_name, "run issued");
        let settled = (self.inner.endpoint)(endpoint_request, self.clone()).await;

        if signal.is_aborted() || self.is_disposed() {
            debug!(query = %self.inner.type_name, "settlement discarded");
            return Err(QueryError::Disposed);
        }

        match settled {
            Ok(raw) => Ok(match &options.convert {
                Some(convert) => convert(raw),
                None => raw,
            }),
            Err(err) => Err(QueryError::Endpoint(err)),
        }
    }

    /// Run a query; the result replaces `data` at commit.
    pub async fn query(&self, options: QueryOptions) -> Commit {
        let outcome = self.run(options).await;
        Commit::new(self.clone(), outcome, CommitMode::Replace, None)
    }

    /// Run a mutation, optionally applying an optimistic update first.
    ///
    /// The speculative change is recorded and reverted at commit: a success
    /// then applies the real payload, a failure leaves it reverted.
    pub async fn mutate(&self, options: MutateOptions) -> Commit {
        let recorder = options.optimistic_update.as_ref().map(|update| {
            let mut store = self.inner.core.store.lock();
            store.record(|recording| update(recording))
        });
        let outcome = self.run(options.into()).await;
        Commit::new(self.clone(), outcome, CommitMode::Replace, recorder)
    }

    /// Run a fetch-more; the result is merged without discarding existing
    /// `data`, and sequence fields grow in place.
    pub async fn query_more(&self, options: QueryOptions) -> Commit {
        self.inner.state.lock().is_fetching_more = true;
        let outcome = self.run(options).await;
        Commit::new(self.clone(), outcome, CommitMode::Accumulate, None)
    }

    /// Re-run with the last known variables when none are supplied.
    pub async fn refetch(&self, mut options: QueryOptions) -> Commit {
        {
            let mut state = self.inner.state.lock();
            state.is_refetching = true;
            if options.request.is_none() {
                options.request = Some(state.request.clone());
            }
            if options.pagination.is_none() {
                options.pagination = Some(state.pagination.clone());
            }
        }
        let outcome = self.run(options).await;
        Commit::new(self.clone(), outcome, CommitMode::Replace, None)
    }

    /// Invalidate the in-flight operation, if any, and revert the variables
    /// recorded at its call time.
    pub fn abort(&self) {
        debug!(query = %self.inner.type_name, "abort");
        let mut state = self.inner.state.lock();
        if let Some(token) = state.token.take() {
            token.abort();
        }
        if !self.is_disposed() {
            state.request = state.previous_request.clone();
            state.pagination = state.previous_pagination.clone();
        }
    }

    /// Tear this instance down: unregister it, mark it permanently disposed,
    /// and abort any in-flight operation. Irreversible.
    pub fn dispose(&self) {
        self.inner.core.registry.remove_query(self);
    }

    pub(crate) fn finish_dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(query = %self.inner.type_name, "disposed");
        let mut state = self.inner.state.lock();
        if let Some(token) = state.token.take() {
            token.abort();
        }
        drop(state);
        self.inner.observers.lock().clear();
    }

    /// Seed this instance with pre-existing data as if it had been fetched,
    /// without a run and without notifications. Used by observers to hydrate
    /// an unfetched query from initial data; freshness is judged against the
    /// seeding time.
    pub(crate) fn hydrate(&self, raw: Value) {
        let prepared = {
            let mut store = self.inner.core.store.lock();
            match merge(
                &raw,
                &self.inner.data_shape,
                &mut store,
                &self.inner.core.shapes,
                true,
            ) {
                Ok(prepared) => prepared,
                Err(err) => {
                    self.inner.state.lock().error = Some(Arc::new(err));
                    return;
                }
            }
        };

        debug!(query = %self.inner.type_name, "hydrated");
        let mut state = self.inner.state.lock();
        state.data = prepared;
        state.result = Some(raw);
        state.is_fetched = true;
        state.cached_at = Some(Instant::now());
    }

    pub(crate) fn subscribe(&self, observer: &QueryObserver) {
        let mut observers = self.inner.observers.lock();
        if !observers.iter().any(|existing| existing.ptr_eq(observer)) {
            observers.push(observer.clone());
        }
    }

    pub(crate) fn unsubscribe(&self, observer: &QueryObserver) {
        self.inner
            .observers
            .lock()
            .retain(|existing| !existing.ptr_eq(observer));
    }

    fn observers(&self) -> Vec<QueryObserver> {
        self.inner.observers.lock().clone()
    }

    fn commit_success(&self, raw: Value, mode: CommitMode) -> CommitOutcome {
        let prepared = {
            let mut store = self.inner.core.store.lock();
            match merge(
                &raw,
                &self.inner.data_shape,
                &mut store,
                &self.inner.core.shapes,
                true,
            ) {
                Ok(prepared) => prepared,
                Err(err) => return self.commit_error(err),
            }
        };

        let (data, first_fetch, was_fetching_more) = {
            let mut state = self.inner.state.lock();
            state.result = Some(raw.clone());
            match mode {
                CommitMode::Replace => {
                    state.data = prepared;
                }
                CommitMode::Accumulate => {
                    if state.data.is_null() {
                        state.data = prepared;
                    } else {
                        let mut store = self.inner.core.store.lock();
                        accumulate(&mut state.data, &prepared, &mut store);
                    }
                }
            }
            state.cached_at = Some(Instant::now());
            state.error = None;
            let first_fetch = !state.is_fetched;
            let was_fetching_more = state.is_fetching_more;
            state.is_loading = false;
            state.is_refetching = false;
            state.is_fetching_more = false;
            state.is_fetched = true;
            (state.data.clone(), first_fetch, was_fetching_more)
        };

        debug!(query = %self.inner.type_name, "commit success");
        for observer in self.observers() {
            observer.emit_success(&data, self);
            if first_fetch {
                observer.emit_fetched(&data, self);
            }
            if was_fetching_more {
                observer.emit_query_more(&data, self);
            }
        }

        CommitOutcome {
            data,
            error: None,
            result: Some(raw),
        }
    }

    fn commit_error(&self, err: Error) -> CommitOutcome {
        let err = Arc::new(err);
        {
            let mut state = self.inner.state.lock();
            // Prior data stays untouched; only the error surfaces.
            state.error = Some(err.clone());
            state.is_loading = false;
            state.is_refetching = false;
            state.is_fetching_more = false;
        }

        debug!(query = %self.inner.type_name, error = %err, "commit error");
        for observer in self.observers() {
            observer.emit_error(&err, self);
        }

        CommitOutcome {
            data: DataValue::Null,
            error: Some(err),
            result: None,
        }
    }
}

enum CommitMode {
    /// The committed payload replaces `data`
    Replace,
    /// The committed payload grows `data` in place (fetch-more)
    Accumulate,
}

/// A settled operation waiting for its explicit commit point.
///
/// Produced by `query`, `mutate`, `query_more`, and `refetch`; applying it is
/// a separate, synchronous step so the caller controls exactly when the side
/// effects land, regardless of when the surrounding asynchronous step
/// resumes.
#[must_use = "a settlement has no effect until committed"]
pub struct Commit {
    query: Query,
    outcome: Result<Value, QueryError>,
    mode: CommitMode,
    recorder: Option<ChangeLog>,
}

impl Commit {
    fn new(
        query: Query,
        outcome: Result<Value, QueryError>,
        mode: CommitMode,
        recorder: Option<ChangeLog>,
    ) -> Self {
        Self {
            query,
            outcome,
            mode,
            recorder,
        }
    }

    /// Check whether this settlement will be discarded at commit
    pub fn is_discarded(&self) -> bool {
        matches!(self.outcome, Err(QueryError::Disposed)) || self.query.is_disposed()
    }

    /// Atomically apply the settlement: revert any optimistic update, then
    /// merge the payload, flip status flags, and notify observers. A
    /// disposed or superseded settlement applies nothing.
    pub fn commit(self) -> CommitOutcome {
        let Commit {
            query,
            outcome,
            mode,
            recorder,
        } = self;

        if let Some(log) = recorder {
            let mut store = query.inner.core.store.lock();
            log.undo(&mut store);
        }

        if query.is_disposed() {
            return CommitOutcome::discarded();
        }

        match outcome {
            Ok(raw) => query.commit_success(raw, mode),
            Err(QueryError::Disposed) => CommitOutcome::discarded(),
            Err(QueryError::Endpoint(err)) => query.commit_error(err),
        }
    }
}

/// What a commit returned: the normalized data, the surfaced error, and the
/// raw result. All empty for a discarded settlement.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Normalized data after the commit
    pub data: DataValue,
    /// Surfaced endpoint failure, if any
    pub error: Option<Arc<Error>>,
    /// Raw result as returned by the endpoint
    pub result: Option<Value>,
}

impl CommitOutcome {
    fn discarded() -> Self {
        Self {
            data: DataValue::Null,
            error: None,
            result: None,
        }
    }

    /// Check whether the settlement was discarded rather than applied
    pub fn is_discarded(&self) -> bool {
        self.data.is_null() && self.error.is_none() && self.result.is_none()
    }
}
