//! Tests for the observer bridge between consumers and query instances.
//!
//! These cover the mount-time fetch decision and notification delivery:
//!
//! 1. An unfetched query is fetched on first mount
//! 2. Fresh data within the staleness window suppresses the refetch
//! 3. Initial data seeds an unfetched query through the merge path
//! 4. Changed request variables always trigger a fetch
//! 5. Changed pagination with fetch_more enabled triggers a fetch-more
//! 6. Callbacks fire in priority order and stop after unsubscribe

use normquery::test_support::{client, fail_endpoint, resolve_endpoint};
use normquery::{
    DataValue, EntityKey, FetchDecision, ObserverOptions, QueryObserver, QueryOptions, Shape,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn first_mount_fetches_an_unfetched_query() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );
    let observer = QueryObserver::new(&query);

    let decision = observer.set_options(ObserverOptions::new().request(json!({"id": 1})));
    match decision {
        Some(FetchDecision::Fetch { request, .. }) => {
            assert_eq!(request, DataValue::Scalar(json!({"id": 1})));
        }
        other => panic!("expected a fetch decision, got {other:?}"),
    }
    assert!(observer.is_mounted());
}

#[tokio::test]
async fn fresh_data_suppresses_the_mount_refetch() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );
    query
        .query(QueryOptions::new().request(json!({"id": 1})))
        .await
        .commit();

    let observer = QueryObserver::new(&query);
    let decision = observer.set_options(
        ObserverOptions::new()
            .request(json!({"id": 1}))
            .stale_time(Duration::from_secs(60)),
    );
    assert!(decision.is_none());
}

#[tokio::test]
async fn stale_data_is_refetched_on_mount() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );
    query
        .query(QueryOptions::new().request(json!({"id": 1})))
        .await
        .commit();

    // Zero staleness means cached data is always considered expired.
    let observer = QueryObserver::new(&query);
    let decision = observer.set_options(ObserverOptions::new().request(json!({"id": 1})));
    assert!(matches!(decision, Some(FetchDecision::Fetch { .. })));
}

#[tokio::test]
async fn initial_data_seeds_an_unfetched_query() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "network"})),
    );

    let observer = QueryObserver::new(&query);
    let decision = observer.set_options(
        ObserverOptions::new()
            .initial_data(json!({"id": "1", "name": "seeded"}))
            .stale_time(Duration::from_secs(60)),
    );

    // Seeded data is fresh, so no fetch follows; the payload went through
    // the normal merge and is visible everywhere.
    assert!(decision.is_none());
    assert!(query.is_fetched());
    assert_eq!(query.data(), DataValue::Ref(EntityKey::new("Item", "1")));
    let node = client.entity(&EntityKey::new("Item", "1")).expect("seeded");
    assert_eq!(node.get("name"), Some(&DataValue::Scalar(json!("seeded"))));
}

#[tokio::test]
async fn initial_data_with_zero_staleness_still_fetches() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "network"})),
    );

    let observer = QueryObserver::new(&query);
    let decision =
        observer.set_options(ObserverOptions::new().initial_data(json!({"id": "1"})));

    // The seed lands, but expired-on-arrival data is refetched anyway.
    assert!(query.is_fetched());
    assert!(matches!(decision, Some(FetchDecision::Fetch { .. })));
}

#[tokio::test]
async fn initial_data_never_overwrites_a_fetched_query() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "network"})),
    );
    query.query(QueryOptions::new()).await.commit();

    let observer = QueryObserver::new(&query);
    observer.set_options(
        ObserverOptions::new()
            .initial_data(json!({"id": "1", "name": "too-late"}))
            .stale_time(Duration::from_secs(60)),
    );

    let node = client.entity(&EntityKey::new("Item", "1")).expect("fetched");
    assert_eq!(node.get("name"), Some(&DataValue::Scalar(json!("network"))));
}

#[tokio::test]
async fn changed_request_variables_trigger_a_fetch() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "2"})),
    );
    query
        .query(QueryOptions::new().request(json!({"id": 1})))
        .await
        .commit();

    let observer = QueryObserver::new(&query);
    observer.set_options(
        ObserverOptions::new()
            .request(json!({"id": 1}))
            .stale_time(Duration::from_secs(60)),
    );

    // Mounted observer, new variables.
    let decision = observer.set_options(
        ObserverOptions::new()
            .request(json!({"id": 2}))
            .stale_time(Duration::from_secs(60)),
    );
    match decision {
        Some(FetchDecision::Fetch { request, .. }) => {
            assert_eq!(request, DataValue::Scalar(json!({"id": 2})));
        }
        other => panic!("expected a fetch decision, got {other:?}"),
    }
}

#[tokio::test]
async fn changed_pagination_triggers_a_fetch_more() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );
    query
        .query(QueryOptions::new().request(json!({"id": 1})))
        .await
        .commit();

    let observer = QueryObserver::new(&query);
    let decision = observer.set_options(
        ObserverOptions::new()
            .request(json!({"id": 1}))
            .pagination(json!({"page": 2}))
            .fetch_more(true)
            .stale_time(Duration::from_secs(60)),
    );
    match decision {
        Some(FetchDecision::FetchMore { pagination, .. }) => {
            assert_eq!(pagination, DataValue::Scalar(json!({"page": 2})));
        }
        other => panic!("expected a fetch-more decision, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_and_disposed_observers_decide_nothing() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );

    let observer = QueryObserver::new(&query);
    assert!(observer
        .set_options(ObserverOptions::new().enabled(false))
        .is_none());

    query.dispose();
    let observer = QueryObserver::new(&query);
    assert!(observer.set_options(ObserverOptions::new()).is_none());
}

#[tokio::test]
async fn callbacks_fire_in_priority_order() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "a"})),
    );

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = QueryObserver::new(&query);
    observer.set_options(
        ObserverOptions::new()
            .stale_time(Duration::from_secs(60))
            .on_success({
                let events = events.clone();
                move |_data, _query| events.lock().push("success")
            })
            .on_fetched({
                let events = events.clone();
                move |_data, _query| events.lock().push("fetched")
            })
            .on_query_more({
                let events = events.clone();
                move |_data, _query| events.lock().push("query_more")
            }),
    );

    query.query(QueryOptions::new()).await.commit();
    assert_eq!(*events.lock(), ["success", "fetched"]);

    query.query(QueryOptions::new()).await.commit();
    assert_eq!(*events.lock(), ["success", "fetched", "success"]);

    query
        .query_more(QueryOptions::new().pagination(json!({"page": 2})))
        .await
        .commit();
    assert_eq!(
        *events.lock(),
        ["success", "fetched", "success", "success", "query_more"]
    );
}

#[tokio::test]
async fn error_callback_fires_on_failure() {
    let client = client();
    let query = client.create_query("ItemQuery", Shape::entity("Item"), fail_endpoint("boom"));

    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = QueryObserver::new(&query);
    observer.set_options(ObserverOptions::new().enabled(false).on_error({
        let errors = errors.clone();
        move |error, _query| errors.lock().push(error.to_string())
    }));

    query.query(QueryOptions::new()).await.commit();
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].contains("boom"));
    drop(observer);
}

#[tokio::test]
async fn unsubscribed_observers_stop_receiving_notifications() {
    let client = client();
    let query = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let observer = QueryObserver::new(&query);
    observer.set_options(ObserverOptions::new().stale_time(Duration::from_secs(60)).on_success({
        let events = events.clone();
        move |_data, _query| events.lock().push("success")
    }));

    query.query(QueryOptions::new()).await.commit();
    assert_eq!(events.lock().len(), 1);

    observer.unsubscribe();
    query.query(QueryOptions::new()).await.commit();
    assert_eq!(events.lock().len(), 1);
}
