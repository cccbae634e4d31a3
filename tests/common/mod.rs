#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use couchbase_explorer::config::ExplorerConfig;
use couchbase_explorer::credentials::{CredentialStore, MemoryCredentialStore};
use couchbase_explorer::driver::{ClusterDriver, ClusterHandle};
use couchbase_explorer::editor::{DocumentEditorSurface, EditorDocument};
use couchbase_explorer::errors::ExplorerError;
use couchbase_explorer::models::structs::{
    BucketInfo, CollectionInfo, ConnectionDraft, Credentials, DocumentContent, IndexInfo, Keyspace,
    ScopeInfo,
};
use couchbase_explorer::settings::{MemorySettingsStore, SettingsStore};
use couchbase_explorer::target::ConnectTarget;
use couchbase_explorer::{ExplorerController, NodeId};

type CollectionKey = (String, String, String);

/// In-process cluster with call counters.
#[derive(Default)]
pub struct FakeCluster {
    pub buckets: Mutex<Vec<BucketInfo>>,
    pub scopes: Mutex<BTreeMap<String, Vec<ScopeInfo>>>,
    pub documents: Mutex<BTreeMap<CollectionKey, BTreeMap<String, serde_json::Value>>>,
    pub indexes: Mutex<Vec<IndexInfo>>,
    pub query_available: AtomicBool,
    pub connect_error: Mutex<Option<String>>,
    pub connect_delay: Mutex<Option<Duration>>,
    pub fail_close: AtomicBool,
    /// Fail every id query past the first page.
    pub fail_later_pages: AtomicBool,
    /// Fail scope listing for this bucket only.
    pub fail_scopes_for: Mutex<Option<String>>,
    pub last_credentials: Mutex<Option<Credentials>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub bucket_fetches: AtomicUsize,
    pub scope_fetches: AtomicUsize,
    pub id_queries: AtomicUsize,
    pub document_reads: AtomicUsize,
    cas: AtomicU64,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_bucket(&self, name: &str) {
        self.buckets.lock().push(BucketInfo {
            name: name.to_string(),
            bucket_type: "Couchbase".to_string(),
            ram_quota_mb: 256,
            replicas: 1,
        });
    }

    pub fn add_collection(&self, bucket: &str, scope: &str, collection: &str) {
        let mut scopes = self.scopes.lock();
        let entry = scopes.entry(bucket.to_string()).or_default();
        let info = CollectionInfo {
            name: collection.to_string(),
            scope_name: scope.to_string(),
        };
        match entry.iter_mut().find(|s| s.name == scope) {
            Some(existing) => existing.collections.push(info),
            None => entry.push(ScopeInfo {
                name: scope.to_string(),
                collections: vec![info],
            }),
        }
        self.documents
            .lock()
            .entry(key(bucket, scope, collection))
            .or_default();
    }

    /// Adds `count` documents named `doc0000`, `doc0001`, ...
    pub fn add_documents(&self, bucket: &str, scope: &str, collection: &str, count: usize) {
        let mut documents = self.documents.lock();
        let docs = documents.entry(key(bucket, scope, collection)).or_default();
        for i in 0..count {
            let id = format!("doc{:04}", i);
            docs.insert(id.clone(), serde_json::json!({ "id": id, "n": i }));
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

fn key(bucket: &str, scope: &str, collection: &str) -> CollectionKey {
    (bucket.to_string(), scope.to_string(), collection.to_string())
}

pub struct FakeDriver {
    pub cluster: Arc<FakeCluster>,
}

#[async_trait::async_trait]
impl ClusterDriver for FakeDriver {
    async fn connect(
        &self,
        _target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ClusterHandle>, ExplorerError> {
        let delay = *self.cluster.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.cluster.connects.fetch_add(1, Ordering::SeqCst);
        *self.cluster.last_credentials.lock() = Some(credentials.clone());
        if let Some(message) = self.cluster.connect_error.lock().clone() {
            return Err(ExplorerError::ConnectFailure(message));
        }
        Ok(Arc::new(FakeHandle {
            cluster: self.cluster.clone(),
        }))
    }
}

pub struct FakeHandle {
    cluster: Arc<FakeCluster>,
}

#[async_trait::async_trait]
impl ClusterHandle for FakeHandle {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, ExplorerError> {
        self.cluster.bucket_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.cluster.buckets.lock().clone())
    }

    async fn list_scopes(&self, bucket: &str) -> Result<Vec<ScopeInfo>, ExplorerError> {
        self.cluster.scope_fetches.fetch_add(1, Ordering::SeqCst);
        if self.cluster.fail_scopes_for.lock().as_deref() == Some(bucket) {
            return Err(ExplorerError::Fetch(format!("scopes of {} unavailable", bucket)));
        }
        Ok(self.cluster.scopes.lock().get(bucket).cloned().unwrap_or_default())
    }

    async fn query_document_ids(
        &self,
        keyspace: &Keyspace,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, ExplorerError> {
        self.cluster.id_queries.fetch_add(1, Ordering::SeqCst);
        if offset > 0 && self.cluster.fail_later_pages.load(Ordering::SeqCst) {
            return Err(ExplorerError::Fetch("query timed out".to_string()));
        }
        let documents = self.cluster.documents.lock();
        let ids = documents
            .get(&key(&keyspace.bucket, &keyspace.scope, &keyspace.collection))
            .map(|docs| docs.keys().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(ids)
    }

    async fn get_document(
        &self,
        keyspace: &Keyspace,
        document_id: &str,
    ) -> Result<DocumentContent, ExplorerError> {
        self.cluster.document_reads.fetch_add(1, Ordering::SeqCst);
        let documents = self.cluster.documents.lock();
        let content = documents
            .get(&key(&keyspace.bucket, &keyspace.scope, &keyspace.collection))
            .and_then(|docs| docs.get(document_id).cloned())
            .ok_or_else(|| ExplorerError::Fetch(format!("document {} not found", document_id)))?;
        Ok(DocumentContent {
            id: document_id.to_string(),
            content,
            cas: self.cluster.cas.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn probe_query_service(&self) -> Result<(), ExplorerError> {
        if self.cluster.query_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExplorerError::Fetch("query service unavailable".to_string()))
        }
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>, ExplorerError> {
        Ok(self.cluster.indexes.lock().clone())
    }

    async fn close(&self) -> Result<(), ExplorerError> {
        self.cluster.closes.fetch_add(1, Ordering::SeqCst);
        if self.cluster.fail_close.load(Ordering::SeqCst) {
            return Err(ExplorerError::Fetch("close failed".to_string()));
        }
        Ok(())
    }
}

/// Credential store the test can keep inspecting after handing it over.
#[derive(Clone, Default)]
pub struct SharedCredentials(pub Arc<MemoryCredentialStore>);

impl CredentialStore for SharedCredentials {
    fn set(&self, id: &str, secret: &str) -> Result<(), ExplorerError> {
        self.0.set(id, secret)
    }

    fn get(&self, id: &str) -> Option<String> {
        self.0.get(id)
    }

    fn delete(&self, id: &str) -> Result<(), ExplorerError> {
        self.0.delete(id)
    }
}

#[derive(Clone, Default)]
pub struct SharedSettings(pub Arc<MemorySettingsStore>);

impl SettingsStore for SharedSettings {
    fn load(&self) -> Vec<couchbase_explorer::models::structs::ConnectionRecord> {
        self.0.load()
    }

    fn save(
        &self,
        records: &[couchbase_explorer::models::structs::ConnectionRecord],
    ) -> Result<(), ExplorerError> {
        self.0.save(records)
    }
}

#[derive(Clone, Default)]
pub struct RecordingEditor {
    pub opened: Arc<Mutex<Vec<EditorDocument>>>,
    pub refreshed: Arc<Mutex<Vec<EditorDocument>>>,
}

impl DocumentEditorSurface for RecordingEditor {
    fn open(&mut self, document: EditorDocument) {
        self.opened.lock().push(document);
    }

    fn refreshed(&mut self, document: EditorDocument) {
        self.refreshed.lock().push(document);
    }
}

pub struct Harness {
    pub controller: ExplorerController,
    pub cluster: Arc<FakeCluster>,
    pub settings: SharedSettings,
    pub credentials: SharedCredentials,
}

pub fn harness(cluster: &Arc<FakeCluster>) -> Harness {
    let settings = SharedSettings::default();
    let credentials = SharedCredentials::default();
    let config = ExplorerConfig::default()
        .with_page_size(50)
        .with_data_dir(std::env::temp_dir().join("couchbase-explorer-tests"));
    let driver = Arc::new(FakeDriver {
        cluster: cluster.clone(),
    });
    let controller = ExplorerController::new(
        config,
        driver,
        Box::new(settings.clone()),
        Box::new(credentials.clone()),
    )
    .expect("runtime");
    Harness {
        controller,
        cluster: cluster.clone(),
        settings,
        credentials,
    }
}

pub fn draft(name: &str) -> ConnectionDraft {
    ConnectionDraft {
        name: name.to_string(),
        host: "localhost".to_string(),
        username: "Administrator".to_string(),
        password: "password".to_string(),
        use_ssl: false,
    }
}

/// Cluster with one bucket `travel`, scope `inventory`, collection `hotel`
/// holding `documents` documents.
pub fn sample_cluster(documents: usize) -> Arc<FakeCluster> {
    let cluster = FakeCluster::new();
    cluster.add_bucket("travel");
    cluster.add_collection("travel", "inventory", "hotel");
    cluster.add_documents("travel", "inventory", "hotel", documents);
    cluster
}

/// Add a connection, connect it and wait for the bucket list.
pub fn connected(h: &mut Harness, name: &str) -> NodeId {
    let node = h.controller.add_connection(&draft(name)).expect("add");
    h.controller.connect(node).expect("connect");
    assert!(h.controller.wait_for_background());
    node
}

pub fn child(h: &Harness, parent: NodeId, name: &str) -> NodeId {
    h.controller
        .tree()
        .find_child(parent, name)
        .unwrap_or_else(|| panic!("no child {} under {:?}", name, parent))
}

/// Expand connection → bucket → scope and return the `hotel` collection node.
pub fn open_collection(h: &mut Harness, connection: NodeId) -> NodeId {
    let bucket = child(h, connection, "travel");
    h.controller.expand(bucket);
    assert!(h.controller.wait_for_background());
    let scope = child(h, bucket, "inventory");
    h.controller.expand(scope);
    assert!(h.controller.wait_for_background());
    child(h, scope, "hotel")
}
