//! Stateless reads against a connected session.
//!
//! Every function resolves the session through the registry first; a missing
//! session is `NotConnected`. Anything the driver reports is passed through
//! untouched.

use log::debug;

use crate::connection::ConnectionRegistry;
use crate::errors::ExplorerError;
use crate::models::enums::{BackgroundTask, FetchPayload};
use crate::models::structs::{
    BucketInfo, CollectionInfo, DocumentContent, DocumentQueryPage, IndexInfo, Keyspace, ScopeInfo,
};

/// Buckets sorted by name.
pub async fn list_buckets(
    registry: &ConnectionRegistry,
    connection_id: &str,
) -> Result<Vec<BucketInfo>, ExplorerError> {
    let session = registry.require(connection_id)?;
    let mut buckets = session.handle().list_buckets().await?;
    buckets.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("{} buckets on {}", buckets.len(), connection_id);
    Ok(buckets)
}

/// Scopes sorted by name, collections inside each scope sorted by name.
pub async fn list_scopes(
    registry: &ConnectionRegistry,
    connection_id: &str,
    bucket: &str,
) -> Result<Vec<ScopeInfo>, ExplorerError> {
    let session = registry.require(connection_id)?;
    let mut scopes = session.handle().list_scopes(bucket).await?;
    for scope in &mut scopes {
        scope.collections.sort_by(|a, b| a.name.cmp(&b.name));
    }
    scopes.sort_by(|a, b| a.name.cmp(&b.name));
    debug!("{} scopes in bucket {}", scopes.len(), bucket);
    Ok(scopes)
}

/// Collections of one scope; an unknown bucket or scope yields an empty list.
pub async fn list_collections(
    registry: &ConnectionRegistry,
    connection_id: &str,
    bucket: &str,
    scope: &str,
) -> Result<Vec<CollectionInfo>, ExplorerError> {
    let scopes = list_scopes(registry, connection_id, bucket).await?;
    Ok(scopes
        .into_iter()
        .find(|s| s.name == scope)
        .map(|s| s.collections)
        .unwrap_or_default())
}

/// One page of ids ordered ascending.
///
/// Requests `limit + 1` rows: a surplus row is the only "more data" signal,
/// since there is no cheap total count. The surplus is dropped from the page.
pub async fn list_document_ids(
    registry: &ConnectionRegistry,
    keyspace: &Keyspace,
    limit: usize,
    offset: usize,
) -> Result<DocumentQueryPage, ExplorerError> {
    let session = registry.require(&keyspace.connection_id)?;
    let mut document_ids = session
        .handle()
        .query_document_ids(keyspace, limit + 1, offset)
        .await?;

    let has_more = document_ids.len() > limit;
    document_ids.truncate(limit);
    debug!(
        "{} ids from {} at offset {} (has_more={})",
        document_ids.len(),
        keyspace,
        offset,
        has_more
    );
    Ok(DocumentQueryPage {
        document_ids,
        has_more,
    })
}

/// Full document plus its CAS token.
pub async fn get_document(
    registry: &ConnectionRegistry,
    keyspace: &Keyspace,
    document_id: &str,
) -> Result<DocumentContent, ExplorerError> {
    let session = registry.require(&keyspace.connection_id)?;
    session.handle().get_document(keyspace, document_id).await
}

/// GSI indexes sorted by keyspace, then name.
pub async fn list_indexes(
    registry: &ConnectionRegistry,
    connection_id: &str,
) -> Result<Vec<IndexInfo>, ExplorerError> {
    let session = registry.require(connection_id)?;
    let mut indexes = session.handle().list_indexes().await?;
    indexes.sort_by(|a, b| {
        (&a.bucket, &a.scope, &a.collection, &a.name).cmp(&(&b.bucket, &b.scope, &b.collection, &b.name))
    });
    Ok(indexes)
}

/// Run the fetch a node asked for.
pub async fn execute(
    registry: &ConnectionRegistry,
    task: &BackgroundTask,
) -> Result<FetchPayload, ExplorerError> {
    match task {
        BackgroundTask::LoadBuckets { connection_id, .. } => {
            list_buckets(registry, connection_id).await.map(FetchPayload::Buckets)
        }
        BackgroundTask::LoadScopes {
            connection_id,
            bucket,
        } => list_scopes(registry, connection_id, bucket)
            .await
            .map(FetchPayload::Scopes),
        BackgroundTask::LoadCollections {
            connection_id,
            bucket,
            scope,
        } => list_collections(registry, connection_id, bucket, scope)
            .await
            .map(FetchPayload::Collections),
        BackgroundTask::LoadDocumentIds {
            keyspace,
            limit,
            offset,
        } => list_document_ids(registry, keyspace, *limit, *offset)
            .await
            .map(FetchPayload::DocumentIds),
        BackgroundTask::LoadIndexes { connection_id } => list_indexes(registry, connection_id)
            .await
            .map(FetchPayload::Indexes),
    }
}
