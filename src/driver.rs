//! Cluster data-access seam.
//!
//! The registry and catalog only talk to a cluster through these traits, so
//! the HTTP implementation in [`crate::driver_couchbase`] can be swapped for an
//! in-process fake in tests.

use std::sync::Arc;

use crate::errors::ExplorerError;
use crate::models::structs::{BucketInfo, Credentials, DocumentContent, IndexInfo, Keyspace, ScopeInfo};
use crate::target::ConnectTarget;

/// Opens live cluster handles.
#[async_trait::async_trait]
pub trait ClusterDriver: Send + Sync {
    /// Establish a connection and verify the credentials.
    ///
    /// Failures must be reported as [`ExplorerError::ConnectFailure`].
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ClusterHandle>, ExplorerError>;
}

/// One live connection to a cluster.
#[async_trait::async_trait]
pub trait ClusterHandle: Send + Sync {
    /// Buckets in server order.
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, ExplorerError>;

    /// Scopes of `bucket`, each with its collections, in server order.
    async fn list_scopes(&self, bucket: &str) -> Result<Vec<ScopeInfo>, ExplorerError>;

    /// Up to `limit` document ids ordered ascending, skipping `offset`.
    async fn query_document_ids(
        &self,
        keyspace: &Keyspace,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, ExplorerError>;

    async fn get_document(
        &self,
        keyspace: &Keyspace,
        document_id: &str,
    ) -> Result<DocumentContent, ExplorerError>;

    /// Lightweight call that succeeds only when the query service answers.
    async fn probe_query_service(&self) -> Result<(), ExplorerError>;

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>, ExplorerError>;

    /// Release the underlying resources.
    async fn close(&self) -> Result<(), ExplorerError>;
}
