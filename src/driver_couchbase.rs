//! Couchbase Server over its HTTP surfaces: the cluster management API for
//! buckets and scopes, the query service (N1QL) for ids, documents and
//! indexes.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::ExplorerConfig;
use crate::driver::{ClusterDriver, ClusterHandle};
use crate::errors::ExplorerError;
use crate::models::structs::{
    BucketInfo, CollectionInfo, Credentials, DocumentContent, IndexInfo, Keyspace, ScopeInfo,
};
use crate::target::ConnectTarget;

pub struct CouchbaseDriver {
    connect_timeout: Duration,
    management_timeout: Duration,
    query_timeout: Duration,
}

impl CouchbaseDriver {
    pub fn new(config: &ExplorerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            management_timeout: config.management_timeout,
            query_timeout: config.query_timeout,
        }
    }
}

fn url_host(host: &str) -> String {
    if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

#[async_trait::async_trait]
impl ClusterDriver for CouchbaseDriver {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ClusterHandle>, ExplorerError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.management_timeout.max(self.query_timeout))
            .user_agent(format!("couchbase-explorer/{}", env!("CARGO_PKG_VERSION")));
        if target.relaxed_certificates {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if target.force_ipv4 {
            builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        }
        let client = builder
            .build()
            .map_err(|e| ExplorerError::ConnectFailure(e.to_string()))?;

        let host = url_host(target.primary_host());
        let scheme = target.scheme;
        let handle = RestHandle {
            client,
            management_base: format!("{}://{}:{}", scheme.http(), host, scheme.management_port()),
            query_base: format!("{}://{}:{}", scheme.http(), host, scheme.query_port()),
            credentials: credentials.clone(),
            query_timeout: self.query_timeout,
        };

        debug!("Verifying credentials against {}", handle.management_base);
        let response = handle
            .client
            .get(format!("{}/pools/default", handle.management_base))
            .basic_auth(&handle.credentials.username, Some(&handle.credentials.password))
            .timeout(self.connect_timeout)
            .send()
            .await
            .map_err(|e| ExplorerError::ConnectFailure(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExplorerError::ConnectFailure(
                "authentication failed, check username and password".to_string(),
            ));
        }
        if !status.is_success() {
            return Err(ExplorerError::ConnectFailure(format!(
                "cluster answered HTTP {}",
                status
            )));
        }

        info!("Connected to {}", target.connection_string);
        Ok(Arc::new(handle))
    }
}

struct RestHandle {
    client: reqwest::Client,
    management_base: String,
    query_base: String,
    credentials: Credentials,
    query_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketEntry {
    name: String,
    #[serde(default)]
    bucket_type: String,
    #[serde(default)]
    quota: BucketQuota,
    #[serde(default)]
    replica_number: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct BucketQuota {
    #[serde(default)]
    ram: u64,
    #[serde(default)]
    raw_ram: u64,
}

#[derive(Deserialize)]
struct ScopesManifest {
    #[serde(default)]
    scopes: Vec<ScopeEntry>,
}

#[derive(Deserialize)]
struct ScopeEntry {
    name: String,
    #[serde(default)]
    collections: Vec<CollectionEntry>,
}

#[derive(Deserialize)]
struct CollectionEntry {
    name: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<QueryErrorEntry>,
}

#[derive(Deserialize)]
struct QueryErrorEntry {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
struct IndexRow {
    name: String,
    #[serde(default)]
    is_primary: bool,
    #[serde(default)]
    state: String,
    bucket_id: Option<String>,
    scope_id: Option<String>,
    #[serde(default)]
    keyspace_id: String,
}

fn bucket_type_label(raw: &str) -> String {
    match raw {
        "membase" | "couchbase" => "Couchbase".to_string(),
        "memcached" => "Memcached".to_string(),
        "ephemeral" => "Ephemeral".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn document_ids_statement(keyspace: &Keyspace, limit: usize, offset: usize) -> String {
    format!(
        "SELECT RAW META().id FROM {} ORDER BY META().id LIMIT {} OFFSET {}",
        keyspace.n1ql_path(),
        limit,
        offset
    )
}

pub(crate) fn get_document_statement(keyspace: &Keyspace) -> String {
    format!(
        "SELECT META(d).cas AS cas, d AS content FROM {} AS d USE KEYS $id",
        keyspace.n1ql_path()
    )
}

pub(crate) const INDEXES_STATEMENT: &str = "SELECT idx.name, idx.is_primary, idx.state, idx.bucket_id, idx.scope_id, idx.keyspace_id FROM system:indexes AS idx WHERE idx.`using` = \"gsi\"";

/// Management API URL for `base` plus path segments, each percent-encoded.
fn management_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, ExplorerError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ExplorerError::Fetch(format!("invalid management url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| ExplorerError::Fetch(format!("{} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// First row of a document read. A row without a numeric CAS is an error:
/// the editor needs a real version token.
fn document_from_rows(
    keyspace: &Keyspace,
    document_id: &str,
    rows: Vec<Value>,
) -> Result<DocumentContent, ExplorerError> {
    let mut row = match rows.into_iter().next() {
        Some(Value::Object(obj)) => obj,
        _ => {
            return Err(ExplorerError::Fetch(format!(
                "Document '{}' not found in {}",
                document_id, keyspace
            )));
        }
    };
    let cas = row.get("cas").and_then(Value::as_u64).ok_or_else(|| {
        ExplorerError::Fetch(format!(
            "Document '{}' in {} came back without a CAS",
            document_id, keyspace
        ))
    })?;
    let content = row.remove("content").unwrap_or(Value::Null);
    Ok(DocumentContent {
        id: document_id.to_string(),
        content,
        cas,
    })
}

impl IndexRow {
    fn into_info(self) -> IndexInfo {
        // Indexes on the default collection only report the bucket as keyspace.
        let (bucket, scope, collection) = match self.bucket_id {
            Some(bucket) => (
                bucket,
                self.scope_id.unwrap_or_else(|| "_default".to_string()),
                self.keyspace_id,
            ),
            None => (self.keyspace_id, "_default".to_string(), "_default".to_string()),
        };
        IndexInfo {
            name: self.name,
            is_primary: self.is_primary,
            state: self.state,
            bucket,
            scope,
            collection,
        }
    }
}

impl RestHandle {
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        segments: &[&str],
    ) -> Result<T, ExplorerError> {
        self.get_json_opt(segments).await?.ok_or_else(|| {
            ExplorerError::Fetch(format!("/{} not found", segments.join("/")))
        })
    }

    /// `None` when the resource answers 404.
    async fn get_json_opt<T: for<'de> Deserialize<'de>>(
        &self,
        segments: &[&str],
    ) -> Result<Option<T>, ExplorerError> {
        let url = management_url(&self.management_base, segments)?;
        let path = url.path().to_string();
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExplorerError::Fetch(format!(
                "{} failed with HTTP {}: {}",
                path,
                status,
                body.trim()
            )));
        }
        let body = response.text().await?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn run_query(
        &self,
        statement: &str,
        named_args: &[(&str, Value)],
    ) -> Result<Vec<Value>, ExplorerError> {
        let mut body = Map::new();
        body.insert("statement".to_string(), Value::String(statement.to_string()));
        body.insert(
            "timeout".to_string(),
            Value::String(format!("{}ms", self.query_timeout.as_millis())),
        );
        for (name, value) in named_args {
            body.insert(format!("${}", name), value.clone());
        }

        debug!("Query: {}", statement);
        let response = self
            .client
            .post(format!("{}/query/service", self.query_base))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let parsed: QueryResponse = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) if !status.is_success() => {
                return Err(ExplorerError::Fetch(format!(
                    "query service answered HTTP {}: {}",
                    status, e
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = parsed.errors.first() {
            return Err(ExplorerError::Fetch(format!(
                "query error {}: {}",
                err.code, err.msg
            )));
        }
        if !status.is_success() || (!parsed.status.is_empty() && parsed.status != "success") {
            return Err(ExplorerError::Fetch(format!(
                "query finished with status '{}' (HTTP {})",
                parsed.status, status
            )));
        }
        Ok(parsed.results)
    }
}

#[async_trait::async_trait]
impl ClusterHandle for RestHandle {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>, ExplorerError> {
        let entries: Vec<BucketEntry> = self.get_json(&["pools", "default", "buckets"]).await?;
        Ok(entries
            .into_iter()
            .map(|b| {
                let bytes = if b.quota.ram > 0 { b.quota.ram } else { b.quota.raw_ram };
                BucketInfo {
                    name: b.name,
                    bucket_type: bucket_type_label(&b.bucket_type),
                    ram_quota_mb: bytes / (1024 * 1024),
                    replicas: b.replica_number,
                }
            })
            .collect())
    }

    async fn list_scopes(&self, bucket: &str) -> Result<Vec<ScopeInfo>, ExplorerError> {
        // Unknown buckets have no scopes rather than being an error.
        let segments = ["pools", "default", "buckets", bucket, "scopes"];
        let Some(manifest) = self.get_json_opt::<ScopesManifest>(&segments).await? else {
            debug!("Bucket {} not found", bucket);
            return Ok(Vec::new());
        };
        Ok(manifest
            .scopes
            .into_iter()
            .map(|s| {
                let scope_name = s.name;
                ScopeInfo {
                    collections: s
                        .collections
                        .into_iter()
                        .map(|c| CollectionInfo {
                            name: c.name,
                            scope_name: scope_name.clone(),
                        })
                        .collect(),
                    name: scope_name,
                }
            })
            .collect())
    }

    async fn query_document_ids(
        &self,
        keyspace: &Keyspace,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, ExplorerError> {
        let rows = self
            .run_query(&document_ids_statement(keyspace, limit, offset), &[])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::String(id) => Some(id),
                Value::Object(mut obj) => match obj.remove("id") {
                    Some(Value::String(id)) => Some(id),
                    _ => None,
                },
                _ => None,
            })
            .collect())
    }

    async fn get_document(
        &self,
        keyspace: &Keyspace,
        document_id: &str,
    ) -> Result<DocumentContent, ExplorerError> {
        let rows = self
            .run_query(
                &get_document_statement(keyspace),
                &[("id", Value::String(document_id.to_string()))],
            )
            .await?;
        document_from_rows(keyspace, document_id, rows)
    }

    async fn probe_query_service(&self) -> Result<(), ExplorerError> {
        let response = self
            .client
            .get(format!("{}/admin/ping", self.query_base))
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ExplorerError::Fetch(format!(
                "query service ping answered HTTP {}",
                response.status()
            )))
        }
    }

    async fn list_indexes(&self) -> Result<Vec<IndexInfo>, ExplorerError> {
        let rows = self.run_query(INDEXES_STATEMENT, &[]).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<IndexRow>(row) {
                Ok(r) => indexes.push(r.into_info()),
                Err(e) => warn!("Skipping unreadable index row: {}", e),
            }
        }
        Ok(indexes)
    }

    async fn close(&self) -> Result<(), ExplorerError> {
        debug!("Closing session for {}", self.management_base);
        Ok(())
    }
}
