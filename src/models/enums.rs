use serde::{Deserialize, Serialize};

use crate::errors::ExplorerError;
use crate::models::structs::{
    BucketInfo, CollectionInfo, ConnectionDraft, DocumentContent, DocumentQueryPage, IndexInfo,
    Keyspace, ScopeInfo,
};
use crate::tree::NodeId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeType {
    Connection,
    Bucket,
    Scope,
    Collection,
    DocumentBatch,
    Document,
    LoadMore,
    IndexesFolder, // Folder grouping the cluster's GSI indexes
    Index,
    Placeholder,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Connection => "Connection",
            NodeType::Bucket => "Bucket",
            NodeType::Scope => "Scope",
            NodeType::Collection => "Collection",
            NodeType::DocumentBatch => "DocumentBatch",
            NodeType::Document => "Document",
            NodeType::LoadMore => "LoadMore",
            NodeType::IndexesFolder => "IndexesFolder",
            NodeType::Index => "Index",
            NodeType::Placeholder => "Placeholder",
        }
    }
}

/// Lifecycle of a connection node as seen by the tree.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Cluster services a session may expose.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum Service {
    KeyValue,
    Query,
}

impl Service {
    pub fn label(&self) -> &'static str {
        match self {
            Service::KeyValue => "KV",
            Service::Query => "Query",
        }
    }
}

/// Connection string scheme: `couchbase://` or `couchbases://`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Scheme {
    Plain,
    Secure,
}

impl Scheme {
    pub fn prefix(&self) -> &'static str {
        match self {
            Scheme::Plain => "couchbase://",
            Scheme::Secure => "couchbases://",
        }
    }

    pub fn http(&self) -> &'static str {
        match self {
            Scheme::Plain => "http",
            Scheme::Secure => "https",
        }
    }

    pub fn management_port(&self) -> u16 {
        match self {
            Scheme::Plain => 8091,
            Scheme::Secure => 18091,
        }
    }

    pub fn query_port(&self) -> u16 {
        match self {
            Scheme::Plain => 8093,
            Scheme::Secure => 18093,
        }
    }
}

/// User-facing commands whose availability depends on the selected node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Command {
    AddConnection,
    Refresh,
    CollapseAll,
    Connect,
    Disconnect,
    EditConnection,
    DeleteConnection,
    OpenDocument,
    CopyDocumentId,
    LoadMore,
}

/// Fetch work a node asks the controller to run off the foreground.
#[derive(Clone, Debug, PartialEq)]
pub enum BackgroundTask {
    LoadBuckets {
        connection_id: String,
        include_indexes: bool,
    },
    LoadScopes {
        connection_id: String,
        bucket: String,
    },
    LoadCollections {
        connection_id: String,
        bucket: String,
        scope: String,
    },
    LoadDocumentIds {
        keyspace: Keyspace,
        limit: usize,
        offset: usize,
    },
    LoadIndexes {
        connection_id: String,
    },
}

impl BackgroundTask {
    pub fn connection_id(&self) -> &str {
        match self {
            BackgroundTask::LoadBuckets { connection_id, .. }
            | BackgroundTask::LoadScopes { connection_id, .. }
            | BackgroundTask::LoadCollections { connection_id, .. }
            | BackgroundTask::LoadIndexes { connection_id } => connection_id,
            BackgroundTask::LoadDocumentIds { keyspace, .. } => &keyspace.connection_id,
        }
    }
}

/// Payload of a successful [`BackgroundTask`].
#[derive(Clone, Debug)]
pub enum FetchPayload {
    Buckets(Vec<BucketInfo>),
    Scopes(Vec<ScopeInfo>),
    Collections(Vec<CollectionInfo>),
    DocumentIds(DocumentQueryPage),
    Indexes(Vec<IndexInfo>),
}

/// Messages marshalled from the background runtime back to the foreground.
#[derive(Debug)]
pub enum BackgroundResult {
    FetchComplete {
        node: NodeId,
        ticket: u64,
        task: BackgroundTask,
        result: Result<FetchPayload, ExplorerError>,
    },
    Connected {
        node: NodeId,
        connection_id: String,
        result: Result<Vec<Service>, ExplorerError>,
    },
    Disconnected {
        node: NodeId,
        connection_id: String,
        then_delete: bool,
        result: Result<(), ExplorerError>,
    },
    DocumentLoaded {
        keyspace: Keyspace,
        document_id: String,
        refresh: bool,
        result: Result<DocumentContent, ExplorerError>,
    },
    ConnectionTested {
        draft: ConnectionDraft,
        result: Result<(), ExplorerError>,
    },
    OrphanReleased {
        connection_id: String,
    },
}
