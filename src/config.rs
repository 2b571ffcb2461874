//! # Configuration
//!
//! Explicit option structs for each operation, with defined defaults, plus
//! tuning for the reclamation scheduler and the client as a whole.

use crate::model::DataValue;
use crate::store::RecordingStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hook that transforms a raw endpoint result before it is committed.
pub type ConvertFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Speculative graph mutation applied before a mutation's request settles,
/// recorded so it can be reverted at settlement.
pub type OptimisticUpdate = Arc<dyn Fn(&mut RecordingStore<'_>) + Send + Sync>;

/// Options for `query`, `query_more`, and `refetch`.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Request variables for this run. `refetch` falls back to the
    /// instance's last request when unset.
    pub request: Option<DataValue>,
    /// Pagination variables for this run
    pub pagination: Option<DataValue>,
    /// Opaque per-call context handed to the endpoint untouched
    pub context: Option<Value>,
    /// Result conversion hook
    pub convert: Option<ConvertFn>,
}

impl QueryOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request variables
    pub fn request(mut self, request: impl Into<DataValue>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Set the pagination variables
    pub fn pagination(mut self, pagination: impl Into<DataValue>) -> Self {
        self.pagination = Some(pagination.into());
        self
    }

    /// Set the per-call context
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the result conversion hook
    pub fn convert(mut self, convert: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.convert = Some(Arc::new(convert));
        self
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("request", &self.request)
            .field("pagination", &self.pagination)
            .field("context", &self.context)
            .field("convert", &self.convert.is_some())
            .finish()
    }
}

/// Options for `mutate`.
#[derive(Clone, Default)]
pub struct MutateOptions {
    /// Request variables for this run
    pub request: Option<DataValue>,
    /// Pagination variables for this run
    pub pagination: Option<DataValue>,
    /// Opaque per-call context handed to the endpoint untouched
    pub context: Option<Value>,
    /// Result conversion hook
    pub convert: Option<ConvertFn>,
    /// Speculative update applied before the request is issued
    pub optimistic_update: Option<OptimisticUpdate>,
}

impl MutateOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request variables
    pub fn request(mut self, request: impl Into<DataValue>) -> Self {
        self.request = Some(request.into());
        self
    }

    /// Set the pagination variables
    pub fn pagination(mut self, pagination: impl Into<DataValue>) -> Self {
        self.pagination = Some(pagination.into());
        self
    }

    /// Set the per-call context
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the result conversion hook
    pub fn convert(mut self, convert: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.convert = Some(Arc::new(convert));
        self
    }

    /// Set the optimistic update
    pub fn optimistic_update(
        mut self,
        update: impl Fn(&mut RecordingStore<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.optimistic_update = Some(Arc::new(update));
        self
    }
}

impl fmt::Debug for MutateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutateOptions")
            .field("request", &self.request)
            .field("pagination", &self.pagination)
            .field("context", &self.context)
            .field("convert", &self.convert.is_some())
            .field("optimistic_update", &self.optimistic_update.is_some())
            .finish()
    }
}

impl From<MutateOptions> for QueryOptions {
    fn from(options: MutateOptions) -> Self {
        QueryOptions {
            request: options.request,
            pagination: options.pagination,
            context: options.context,
            convert: options.convert,
        }
    }
}

/// Tuning for the reclamation sweep scheduler.
#[derive(Debug, Clone)]
pub struct GcTuning {
    /// Delay before retrying a sweep that was deferred because an instance
    /// was still loading. A policy knob, not an upper bound: continuous load
    /// traffic can keep deferring the sweep.
    pub sweep_delay: Duration,
}

impl Default for GcTuning {
    fn default() -> Self {
        Self {
            sweep_delay: Duration::from_millis(1000),
        }
    }
}

impl GcTuning {
    /// Retry quickly; suited to tests and short-lived clients
    pub fn eager() -> Self {
        Self {
            sweep_delay: Duration::from_millis(25),
        }
    }

    /// Retry rarely; trades reclamation latency for fewer wakeups
    pub fn relaxed() -> Self {
        Self {
            sweep_delay: Duration::from_secs(5),
        }
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default freshness window used when observer options leave it unset
    pub stale_time: Duration,
    /// Reclamation scheduler tuning
    pub gc: GcTuning,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            stale_time: Duration::ZERO,
            gc: GcTuning::default(),
        }
    }
}
