use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted connection metadata. The password never lives here; it is kept
/// in the credential store under the same `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub name: String,
    pub connection_string: String,
    pub username: String,
    #[serde(default)]
    pub use_ssl: bool,
}

impl ConnectionRecord {
    pub fn new(name: String, connection_string: String, username: String, use_ssl: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            connection_string,
            username,
            use_ssl,
        }
    }
}

/// Everything the add/edit connection form collects, password included.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionDraft {
    pub name: String,
    pub host: String,
    pub username: String,
    pub password: String,
    pub use_ssl: bool,
}

impl fmt::Debug for ConnectionDraft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDraft")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub bucket_type: String,
    pub ram_quota_mb: u64,
    pub replicas: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub scope_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScopeInfo {
    pub name: String,
    pub collections: Vec<CollectionInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub is_primary: bool,
    pub state: String,
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

/// Fully qualified location of a collection on one session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Keyspace {
    pub connection_id: String,
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl Keyspace {
    pub fn new(
        connection_id: impl Into<String>,
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// `bucket`.`scope`.`collection` with backticks escaped.
    pub fn n1ql_path(&self) -> String {
        format!(
            "{}.{}.{}",
            quote_identifier(&self.bucket),
            quote_identifier(&self.scope),
            quote_identifier(&self.collection)
        )
    }
}

impl fmt::Display for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.bucket, self.scope, self.collection)
    }
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// One page of document ids plus the over-fetch signal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentQueryPage {
    pub document_ids: Vec<String>,
    pub has_more: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DocumentContent {
    pub id: String,
    pub content: serde_json::Value,
    /// Compare-and-swap token for optimistic concurrency.
    pub cas: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_without_password() {
        let record = ConnectionRecord::new(
            "Local".into(),
            "localhost".into(),
            "Administrator".into(),
            false,
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.to_lowercase().contains("password"));
        assert!(json.contains("\"name\":\"Local\""));
    }

    #[test]
    fn record_ids_are_unique() {
        let a = ConnectionRecord::new("a".into(), "h".into(), "u".into(), false);
        let b = ConnectionRecord::new("b".into(), "h".into(), "u".into(), false);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = Credentials::new("admin", "hunter2");
        assert!(!format!("{:?}", creds).contains("hunter2"));
        let draft = ConnectionDraft {
            password: "hunter2".into(),
            ..Default::default()
        };
        assert!(!format!("{:?}", draft).contains("hunter2"));
    }

    #[test]
    fn keyspace_path_escapes_backticks() {
        let ks = Keyspace::new("c1", "travel`sample", "inventory", "airline");
        assert_eq!(ks.n1ql_path(), "`travel``sample`.`inventory`.`airline`");
        assert_eq!(ks.to_string(), "travel`sample.inventory.airline");
    }
}
