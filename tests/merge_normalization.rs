//! Tests for payload normalization across query instances.
//!
//! These cover the identity-keyed store from the outside:
//!
//! 1. Two instances that see the same entity share one stored node
//! 2. A later merge updates the shared node for every holder
//! 3. Fetching more pages appends into the previously committed data
//! 4. The registry finds live instances by name and predicate

use normquery::test_support::{client, endpoint_from, resolve_endpoint};
use normquery::{DataValue, EntityKey, QueryOptions, Shape};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn shared_entities_collapse_to_one_node() {
    let client = client();
    let a = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "first"})),
    );
    let b = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1", "name": "second"})),
    );

    a.query(QueryOptions::new()).await.commit();
    b.query(QueryOptions::new()).await.commit();

    assert_eq!(client.entity_count(), 1);
    let key = EntityKey::new("Item", "1");
    assert_eq!(a.data(), DataValue::Ref(key.clone()));
    assert_eq!(b.data(), DataValue::Ref(key.clone()));

    // The later merge won; both instances observe it through the shared node.
    let node = client.entity(&key).expect("stored");
    assert_eq!(node.get("name"), Some(&DataValue::Scalar(json!("second"))));
}

#[tokio::test]
async fn nested_entities_are_normalized_recursively() {
    let client = client();
    let query = client.create_query(
        "PageQuery",
        Shape::entity("Page"),
        resolve_endpoint(json!({
            "id": "p1",
            "items": [
                {"id": "1", "name": "a", "related": {"id": "2", "name": "b"}},
                {"id": "2", "name": "b"},
            ],
        })),
    );

    query.query(QueryOptions::new()).await.commit();

    // One Page node plus two Item nodes, each stored exactly once.
    assert_eq!(client.entity_count(), 3);
    let page = client.entity(&EntityKey::new("Page", "p1")).expect("page");
    let items = page.get("items").and_then(DataValue::as_list).expect("list");
    assert_eq!(items[0], DataValue::Ref(EntityKey::new("Item", "1")));
    assert_eq!(items[1], DataValue::Ref(EntityKey::new("Item", "2")));

    let first = client.entity(&EntityKey::new("Item", "1")).expect("item");
    assert_eq!(
        first.get("related"),
        Some(&DataValue::Ref(EntityKey::new("Item", "2")))
    );
}

#[tokio::test]
async fn fetching_more_appends_to_committed_lists() {
    let client = client();
    let pages = Arc::new(AtomicUsize::new(0));
    let endpoint = endpoint_from({
        let pages = pages.clone();
        move |_request, _query| {
            let page = pages.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(if page == 0 {
                    json!({"items": [{"id": "1", "name": "e1"}]})
                } else {
                    json!({"items": [{"id": "2", "name": "e2"}]})
                })
            }
        }
    });
    let query = client.create_query(
        "ItemListQuery",
        normquery::test_support::item_list_shape(),
        endpoint,
    );

    query.query(QueryOptions::new()).await.commit();

    let commit = query
        .query_more(QueryOptions::new().pagination(json!({"page": 2})))
        .await;
    assert!(query.is_fetching_more());
    let outcome = commit.commit();
    assert!(!query.is_fetching_more());

    let items = outcome
        .data
        .field("items")
        .and_then(DataValue::as_list)
        .expect("accumulated list");
    assert_eq!(
        items,
        &[
            DataValue::Ref(EntityKey::new("Item", "1")),
            DataValue::Ref(EntityKey::new("Item", "2")),
        ]
    );
    assert_eq!(query.pagination(), DataValue::Scalar(json!({"page": 2})));
}

#[tokio::test]
async fn registry_lookup_by_name_and_predicate() {
    let client = client();
    let a = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "1"})),
    );
    let b = client.create_query(
        "ItemQuery",
        Shape::entity("Item"),
        resolve_endpoint(json!({"id": "2"})),
    );
    a.query(QueryOptions::new().request(json!({"id": 1})))
        .await
        .commit();
    b.query(QueryOptions::new().request(json!({"id": 2})))
        .await
        .commit();

    let found = client
        .registry()
        .find("ItemQuery", |query| {
            query
                .request()
                .as_scalar()
                .and_then(|request| request.get("id"))
                .and_then(Value::as_i64)
                == Some(1)
        })
        .expect("matching instance");
    assert!(found == a);

    assert_eq!(
        client.registry().find_all("ItemQuery", |_| true, false).len(),
        2
    );
    assert!(client.registry().find("MissingQuery", |_| true).is_none());
}
