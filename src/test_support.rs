//! Test helpers: canned shapes and scripted endpoints for exercising the
//! cache without real I/O.

use crate::client::QueryClient;
use crate::lifecycle::{Endpoint, EndpointFuture, EndpointRequest, Query};
use crate::shape::{EntityShape, Shape, ShapeRegistry};
use anyhow::anyhow;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Wrap an async closure as an endpoint
pub fn endpoint_from<F, Fut>(f: F) -> Endpoint
where
    F: Fn(EndpointRequest, Query) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(move |request, query| -> EndpointFuture { Box::pin(f(request, query)) })
}

/// Endpoint that resolves every call with a copy of `payload`
pub fn resolve_endpoint(payload: Value) -> Endpoint {
    endpoint_from(move |_request, _query| {
        let payload = payload.clone();
        async move { Ok(payload) }
    })
}

/// Endpoint that rejects every call with `message`
pub fn fail_endpoint(message: &str) -> Endpoint {
    let message = message.to_string();
    endpoint_from(move |_request, _query| {
        let message = message.clone();
        async move { Err(anyhow!(message)) }
    })
}

/// Endpoint that holds every call until the returned gate is notified, then
/// resolves with a copy of `payload`
pub fn gated_endpoint(payload: Value) -> (Endpoint, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    let endpoint_gate = Arc::clone(&gate);
    let endpoint = endpoint_from(move |_request, _query| {
        let gate = Arc::clone(&endpoint_gate);
        let payload = payload.clone();
        async move {
            gate.notified().await;
            Ok(payload)
        }
    });
    (endpoint, gate)
}

/// Endpoint that resolves with `payload` and counts how many calls reached it
pub fn counting_endpoint(payload: Value) -> (Endpoint, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let endpoint_calls = Arc::clone(&calls);
    let endpoint = endpoint_from(move |_request, _query| {
        endpoint_calls.fetch_add(1, Ordering::SeqCst);
        let payload = payload.clone();
        async move { Ok(payload) }
    });
    (endpoint, calls)
}

/// Shapes shared by most tests: an `Item` entity with a self-reference, a
/// `Page` entity holding an item sequence, and a `User` entity whose friend
/// field closes a reference cycle.
pub fn item_shapes() -> ShapeRegistry {
    let mut shapes = ShapeRegistry::new();
    shapes.register(
        EntityShape::new("Item")
            .field("name", Shape::Opaque)
            .field("related", Shape::entity("Item")),
    );
    shapes.register(EntityShape::new("Page").field("items", Shape::list(Shape::entity("Item"))));
    shapes.register(EntityShape::new("User").field("friend", Shape::entity("User")));
    shapes
}

/// Unidentified list shape: `{ items: [Item] }`
pub fn item_list_shape() -> Shape {
    Shape::object([("items", Shape::list(Shape::entity("Item")))])
}

/// Client preloaded with [`item_shapes`]
pub fn client() -> QueryClient {
    QueryClient::new(item_shapes())
}
