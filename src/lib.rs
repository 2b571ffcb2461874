//! # normquery
//!
//! A client-side cache and lifecycle orchestrator for asynchronous queries
//! and mutations whose results merge into a single normalized,
//! identity-keyed object graph.
//!
//! The crate provides a normalized identity store with mark-and-sweep
//! reclamation, a per-query asynchronous state machine with cooperative
//! cancellation and deferred commits, and a merge algorithm that reconciles
//! fetched payloads with the existing graph while preserving object
//! identity. Network I/O is delegated entirely to an externally supplied
//! endpoint function.

pub mod client;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod model;
pub mod observer;
pub mod registry;
pub mod shape;
pub mod store;
pub mod test_support;

// Re-export main types for convenience
pub use client::QueryClient;
pub use config::{ClientConfig, GcTuning, MutateOptions, QueryOptions};
pub use error::QueryError;
pub use lifecycle::{
    AbortSignal, Commit, CommitOutcome, Endpoint, EndpointFuture, EndpointRequest, Query,
};
pub use merge::{accumulate, merge};
pub use model::{DataValue, EntityKey, EntityNode, Snapshot};
pub use observer::{FetchDecision, ObserverOptions, QueryObserver};
pub use registry::QueryRegistry;
pub use shape::{EntityShape, Shape, ShapeRegistry};
pub use store::{ChangeLog, IdentityStore, RecordingStore};
