mod common;

use std::sync::Arc;

use common::{FakeCluster, FakeDriver};
use couchbase_explorer::ConnectionRegistry;
use couchbase_explorer::catalog;
use couchbase_explorer::errors::ExplorerError;
use couchbase_explorer::models::structs::Keyspace;

async fn connected(cluster: &Arc<FakeCluster>) -> ConnectionRegistry {
    let registry = ConnectionRegistry::new(Arc::new(FakeDriver {
        cluster: cluster.clone(),
    }));
    registry
        .connect("c1", "localhost", "admin", "pw", false)
        .await
        .unwrap();
    registry
}

fn hotel() -> Keyspace {
    Keyspace::new("c1", "travel", "inventory", "hotel")
}

#[tokio::test]
async fn exactly_limit_documents_has_no_more() {
    let cluster = common::sample_cluster(10);
    let registry = connected(&cluster).await;

    let page = catalog::list_document_ids(&registry, &hotel(), 10, 0)
        .await
        .unwrap();
    assert_eq!(page.document_ids.len(), 10);
    assert!(!page.has_more);
}

#[tokio::test]
async fn one_extra_document_sets_has_more() {
    let cluster = common::sample_cluster(11);
    let registry = connected(&cluster).await;

    let page = catalog::list_document_ids(&registry, &hotel(), 10, 0)
        .await
        .unwrap();
    assert_eq!(page.document_ids.len(), 10);
    assert!(page.has_more);
    assert_eq!(page.document_ids.first().map(String::as_str), Some("doc0000"));
    assert_eq!(page.document_ids.last().map(String::as_str), Some("doc0009"));

    let next = catalog::list_document_ids(&registry, &hotel(), 10, 10)
        .await
        .unwrap();
    assert_eq!(next.document_ids, vec!["doc0010".to_string()]);
    assert!(!next.has_more);
}

#[tokio::test]
async fn unknown_session_is_not_connected() {
    let cluster = common::sample_cluster(1);
    let registry = ConnectionRegistry::new(Arc::new(FakeDriver {
        cluster: cluster.clone(),
    }));
    let err = catalog::list_buckets(&registry, "missing").await.unwrap_err();
    assert_eq!(err, ExplorerError::NotConnected("missing".to_string()));
    assert_eq!(FakeCluster::count(&cluster.bucket_fetches), 0);
}

#[tokio::test]
async fn listings_are_sorted_by_name() {
    let cluster = FakeCluster::new();
    cluster.add_bucket("zeta");
    cluster.add_bucket("alpha");
    cluster.add_collection("alpha", "tenant_b", "users");
    cluster.add_collection("alpha", "tenant_a", "orders");
    cluster.add_collection("alpha", "tenant_a", "carts");
    let registry = connected(&cluster).await;

    let buckets = catalog::list_buckets(&registry, "c1").await.unwrap();
    let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);

    let scopes = catalog::list_scopes(&registry, "c1", "alpha").await.unwrap();
    assert_eq!(scopes[0].name, "tenant_a");
    let collections = catalog::list_collections(&registry, "c1", "alpha", "tenant_a")
        .await
        .unwrap();
    let names: Vec<&str> = collections.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["carts", "orders"]);
}

#[tokio::test]
async fn unknown_scope_has_no_collections() {
    let cluster = common::sample_cluster(0);
    let registry = connected(&cluster).await;
    let collections = catalog::list_collections(&registry, "c1", "travel", "nope")
        .await
        .unwrap();
    assert!(collections.is_empty());
    let collections = catalog::list_collections(&registry, "c1", "no-bucket", "inventory")
        .await
        .unwrap();
    assert!(collections.is_empty());
}

#[tokio::test]
async fn get_document_returns_content_and_cas() {
    let cluster = common::sample_cluster(3);
    let registry = connected(&cluster).await;
    let doc = catalog::get_document(&registry, &hotel(), "doc0002")
        .await
        .unwrap();
    assert_eq!(doc.content["n"], 2);
    assert!(doc.cas > 0);

    let err = catalog::get_document(&registry, &hotel(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ExplorerError::Fetch(_)));
}
