//! Explorer node graph.
//!
//! Nodes live in an arena keyed by [`NodeId`]; parents and children refer to
//! each other by id only, so whole subtrees can be dropped and rebuilt on
//! refresh without ownership cycles. Ids are never reused, which lets late
//! background results for a removed node be recognised and discarded.
//!
//! Expansion is a small state machine per node:
//! `Collapsed -> Expanding (is_loading) -> Populated | Errored`, re-entered
//! only through [`ExplorerTree::refresh`]. Nodes never fetch anything
//! themselves: they hand back a [`BackgroundTask`] and the controller runs it.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::errors::ExplorerError;
use crate::models::enums::{BackgroundTask, ConnectionState, FetchPayload, NodeType, Service};
use crate::models::structs::{ConnectionRecord, IndexInfo, Keyspace};

pub const LOADING: &str = "Loading...";
pub const REFRESHING: &str = "Refreshing...";
pub const CONNECTING: &str = "Connecting...";
pub const LOADING_BUCKETS: &str = "Loading buckets...";
pub const CONNECTION_FAILED: &str = "(Connection failed)";
pub const NO_BUCKETS: &str = "(No buckets)";
pub const NO_SCOPES: &str = "(No scopes)";
pub const NO_COLLECTIONS: &str = "(No collections)";
pub const NO_DOCUMENTS: &str = "(No documents)";
pub const NO_INDEXES: &str = "(No indexes)";
pub const LOAD_MORE: &str = "Load More...";
pub const INDEXES_FOLDER: &str = "Indexes";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Connection {
        connection_id: String,
        connection_string: String,
        username: String,
        use_ssl: bool,
        state: ConnectionState,
        capabilities: BTreeSet<Service>,
    },
    Bucket {
        connection_id: String,
        bucket_type: String,
        ram_quota_mb: u64,
        replicas: u32,
    },
    Scope {
        connection_id: String,
        bucket: String,
    },
    Collection {
        keyspace: Keyspace,
        /// Count of ids fetched so far; the offset of the next page.
        next_offset: usize,
    },
    DocumentBatch {
        keyspace: Keyspace,
        start_index: usize,
        end_index: usize,
        document_ids: Vec<String>,
    },
    Document {
        keyspace: Keyspace,
        document_id: String,
    },
    LoadMore {
        next_offset: usize,
    },
    IndexesFolder {
        connection_id: String,
    },
    Index {
        info: IndexInfo,
    },
    Placeholder,
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Connection { .. } => NodeType::Connection,
            NodeKind::Bucket { .. } => NodeType::Bucket,
            NodeKind::Scope { .. } => NodeType::Scope,
            NodeKind::Collection { .. } => NodeType::Collection,
            NodeKind::DocumentBatch { .. } => NodeType::DocumentBatch,
            NodeKind::Document { .. } => NodeType::Document,
            NodeKind::LoadMore { .. } => NodeType::LoadMore,
            NodeKind::IndexesFolder { .. } => NodeType::IndexesFolder,
            NodeKind::Index { .. } => NodeType::Index,
            NodeKind::Placeholder => NodeType::Placeholder,
        }
    }

    /// Kinds whose children are fetched on first expansion.
    pub fn is_lazy(&self) -> bool {
        matches!(
            self,
            NodeKind::Connection { .. }
                | NodeKind::Bucket { .. }
                | NodeKind::Scope { .. }
                | NodeKind::Collection { .. }
                | NodeKind::DocumentBatch { .. }
                | NodeKind::IndexesFolder { .. }
        )
    }

    pub fn connection_id(&self) -> Option<&str> {
        match self {
            NodeKind::Connection { connection_id, .. }
            | NodeKind::Bucket { connection_id, .. }
            | NodeKind::Scope { connection_id, .. }
            | NodeKind::IndexesFolder { connection_id } => Some(connection_id),
            NodeKind::Collection { keyspace, .. }
            | NodeKind::DocumentBatch { keyspace, .. }
            | NodeKind::Document { keyspace, .. } => Some(&keyspace.connection_id),
            _ => None,
        }
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        match self {
            NodeKind::Connection { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn is_connected_connection(&self) -> bool {
        self.connection_state() == Some(ConnectionState::Connected)
    }
}

#[derive(Clone, Debug)]
pub struct TreeNode {
    pub name: String,
    pub kind: NodeKind,
    pub is_expanded: bool,
    pub is_selected: bool,
    pub is_loading: bool,
    /// Memoises the first expansion; only a refresh clears it.
    pub is_loaded: bool,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    load_ticket: u64,
}

impl TreeNode {
    fn new(name: String, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name,
            kind,
            is_expanded: false,
            is_selected: false,
            is_loading: false,
            is_loaded: false,
            children: Vec::new(),
            parent,
            load_ticket: 0,
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }
}

/// What the caller has to do after asking a node to expand or refresh.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpandOutcome {
    /// Nothing to do: leaf, already expanded, unknown node or a load in flight.
    Ignored,
    /// Children were fetched before; collapse/expand does not refetch.
    AlreadyLoaded,
    /// Children were built locally.
    Populated,
    /// Run `task` in the background and report back with `ticket`.
    Fetch { ticket: u64, task: BackgroundTask },
    /// An unconnected connection node was expanded.
    ConnectRequested { connection_id: String },
}

pub struct ExplorerTree {
    nodes: HashMap<NodeId, TreeNode>,
    roots: Vec<NodeId>,
    selected: Option<NodeId>,
    next_id: u64,
    next_ticket: u64,
    page_size: usize,
}

impl ExplorerTree {
    pub fn new(page_size: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            selected: None,
            next_id: 1,
            next_ticket: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn children(&self, id: NodeId) -> Vec<&TreeNode> {
        self.nodes
            .get(&id)
            .map(|n| n.children.iter().filter_map(|c| self.nodes.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn child_ids(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn child_names(&self, id: NodeId) -> Vec<String> {
        self.children(id).iter().map(|n| n.name.clone()).collect()
    }

    pub fn find_child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.child_ids(id)
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn find_connection(&self, connection_id: &str) -> Option<NodeId> {
        self.roots.iter().copied().find(|id| {
            matches!(
                self.nodes.get(id).map(|n| &n.kind),
                Some(NodeKind::Connection { connection_id: cid, .. }) if cid == connection_id
            )
        })
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.roots
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|n| n.node_type() == NodeType::Connection)
            .map(|n| n.name.clone())
            .collect()
    }

    pub fn selected(&self) -> Option<NodeId> {
        self.selected.filter(|id| self.nodes.contains_key(id))
    }

    pub fn select(&mut self, id: Option<NodeId>) {
        if let Some(prev) = self.selected.take()
            && let Some(node) = self.nodes.get_mut(&prev)
        {
            node.is_selected = false;
        }
        if let Some(id) = id
            && let Some(node) = self.nodes.get_mut(&id)
        {
            node.is_selected = true;
            self.selected = Some(id);
        }
    }

    fn alloc(&mut self, name: String, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let lazy = kind.is_lazy();
        self.nodes.insert(id, TreeNode::new(name, kind, parent));
        if lazy {
            let placeholder = self.alloc(LOADING.to_string(), NodeKind::Placeholder, Some(id));
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children.push(placeholder);
            }
        }
        id
    }

    pub fn add_connection(&mut self, record: &ConnectionRecord) -> NodeId {
        let id = self.alloc(
            record.name.clone(),
            NodeKind::Connection {
                connection_id: record.id.clone(),
                connection_string: record.connection_string.clone(),
                username: record.username.clone(),
                use_ssl: record.use_ssl,
                state: ConnectionState::Disconnected,
                capabilities: BTreeSet::new(),
            },
            None,
        );
        self.roots.push(id);
        id
    }

    /// Mirror an edited record into its connection node.
    pub fn update_connection(&mut self, id: NodeId, record: &ConnectionRecord) {
        if let Some(node) = self.nodes.get_mut(&id)
            && let NodeKind::Connection {
                connection_string,
                username,
                use_ssl,
                ..
            } = &mut node.kind
        {
            node.name = record.name.clone();
            *connection_string = record.connection_string.clone();
            *username = record.username.clone();
            *use_ssl = record.use_ssl;
        }
    }

    /// Remove a node and its whole subtree.
    pub fn remove(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match node.parent {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
        self.drop_subtree(id);
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children);
            }
            if self.selected == Some(current) {
                self.selected = None;
            }
        }
    }

    /// Swap the children of `id` for freshly built ones in one step.
    fn replace_children(&mut self, id: NodeId, entries: Vec<(String, NodeKind)>) {
        let old = match self.nodes.get_mut(&id) {
            Some(node) => std::mem::take(&mut node.children),
            None => return,
        };
        for child in old {
            self.drop_subtree(child);
        }
        self.append_children(id, entries);
    }

    fn append_children(&mut self, id: NodeId, entries: Vec<(String, NodeKind)>) {
        if !self.nodes.contains_key(&id) {
            return;
        }
        let new_ids: Vec<NodeId> = entries
            .into_iter()
            .map(|(name, kind)| self.alloc(name, kind, Some(id)))
            .collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.children.extend(new_ids);
        }
    }

    fn set_placeholder(&mut self, id: NodeId, text: &str) {
        self.replace_children(id, vec![(text.to_string(), NodeKind::Placeholder)]);
    }

    fn issue_ticket(&mut self, id: NodeId) -> Option<u64> {
        let ticket = self.next_ticket;
        let node = self.nodes.get_mut(&id)?;
        self.next_ticket += 1;
        node.is_loading = true;
        node.load_ticket = ticket;
        Some(ticket)
    }

    /// Handle a collapsed-to-expanded transition.
    pub fn expand(&mut self, id: NodeId) -> ExpandOutcome {
        let Some(node) = self.nodes.get_mut(&id) else {
            return ExpandOutcome::Ignored;
        };
        if node.is_expanded {
            return ExpandOutcome::Ignored;
        }
        node.is_expanded = true;
        if node.is_loading || !node.kind.is_lazy() {
            return ExpandOutcome::Ignored;
        }
        if node.is_loaded {
            return ExpandOutcome::AlreadyLoaded;
        }
        self.begin_load(id)
    }

    pub fn collapse(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.is_expanded = false;
        }
    }

    pub fn collapse_all(&mut self) {
        for node in self.nodes.values_mut() {
            node.is_expanded = false;
        }
    }

    pub fn is_refreshable(&self, id: NodeId) -> bool {
        match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::Connection { state, .. }) => *state == ConnectionState::Connected,
            Some(
                NodeKind::Bucket { .. }
                | NodeKind::Scope { .. }
                | NodeKind::Collection { .. }
                | NodeKind::DocumentBatch { .. }
                | NodeKind::IndexesFolder { .. },
            ) => true,
            _ => false,
        }
    }

    /// Drop the memoised children and load again.
    pub fn refresh(&mut self, id: NodeId) -> ExpandOutcome {
        if !self.is_refreshable(id) {
            return ExpandOutcome::Ignored;
        }
        match self.nodes.get_mut(&id) {
            Some(node) if !node.is_loading => node.is_loaded = false,
            _ => return ExpandOutcome::Ignored,
        }
        self.set_placeholder(id, REFRESHING);
        self.begin_load(id)
    }

    fn begin_load(&mut self, id: NodeId) -> ExpandOutcome {
        let page_size = self.page_size;
        let Some(node) = self.nodes.get_mut(&id) else {
            return ExpandOutcome::Ignored;
        };
        if matches!(node.kind, NodeKind::DocumentBatch { .. }) {
            self.populate_batch(id);
            return ExpandOutcome::Populated;
        }
        let task = match &mut node.kind {
            NodeKind::Connection {
                connection_id,
                state,
                capabilities,
                ..
            } => {
                match state {
                    ConnectionState::Connected => {}
                    ConnectionState::Disconnected => {
                        return ExpandOutcome::ConnectRequested {
                            connection_id: connection_id.clone(),
                        };
                    }
                    _ => return ExpandOutcome::Ignored,
                }
                BackgroundTask::LoadBuckets {
                    connection_id: connection_id.clone(),
                    include_indexes: capabilities.contains(&Service::Query),
                }
            }
            NodeKind::Bucket { connection_id, .. } => BackgroundTask::LoadScopes {
                connection_id: connection_id.clone(),
                bucket: node.name.clone(),
            },
            NodeKind::Scope {
                connection_id,
                bucket,
            } => BackgroundTask::LoadCollections {
                connection_id: connection_id.clone(),
                bucket: bucket.clone(),
                scope: node.name.clone(),
            },
            NodeKind::Collection {
                keyspace,
                next_offset,
            } => {
                *next_offset = 0;
                BackgroundTask::LoadDocumentIds {
                    keyspace: keyspace.clone(),
                    limit: page_size,
                    offset: 0,
                }
            }
            NodeKind::IndexesFolder { connection_id } => BackgroundTask::LoadIndexes {
                connection_id: connection_id.clone(),
            },
            _ => return ExpandOutcome::Ignored,
        };
        match self.issue_ticket(id) {
            Some(ticket) => {
                debug!("Node {:?} expanding with {:?}", id, task);
                ExpandOutcome::Fetch { ticket, task }
            }
            None => ExpandOutcome::Ignored,
        }
    }

    fn populate_batch(&mut self, id: NodeId) {
        let entries: Vec<(String, NodeKind)> = match self.nodes.get(&id).map(|n| &n.kind) {
            Some(NodeKind::DocumentBatch {
                keyspace,
                document_ids,
                ..
            }) => document_ids
                .iter()
                .map(|doc_id| {
                    (
                        doc_id.clone(),
                        NodeKind::Document {
                            keyspace: keyspace.clone(),
                            document_id: doc_id.clone(),
                        },
                    )
                })
                .collect(),
            _ => return,
        };
        if entries.is_empty() {
            self.set_placeholder(id, NO_DOCUMENTS);
        } else {
            self.replace_children(id, entries);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.is_loaded = true;
            node.is_loading = false;
        }
    }

    /// Apply a background fetch result. Returns false when the result is
    /// stale (node gone, refreshed or disconnected since) and was dropped.
    pub fn complete_fetch(
        &mut self,
        id: NodeId,
        ticket: u64,
        task: &BackgroundTask,
        result: Result<FetchPayload, ExplorerError>,
    ) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.is_loading && node.load_ticket == ticket => {
                node.is_loading = false;
                node.is_loaded = true;
            }
            Some(_) => {
                debug!("Dropping stale result for node {:?} (ticket {})", id, ticket);
                return false;
            }
            None => {
                debug!("Dropping result for removed node {:?}", id);
                return false;
            }
        }

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Node {:?} failed to load: {}", id, e);
                if let BackgroundTask::LoadDocumentIds { offset, .. } = task
                    && *offset > 0
                {
                    // Keep the batches already shown and offer the same page again.
                    self.append_children(
                        id,
                        vec![
                            (e.user_message(), NodeKind::Placeholder),
                            (
                                LOAD_MORE.to_string(),
                                NodeKind::LoadMore {
                                    next_offset: *offset,
                                },
                            ),
                        ],
                    );
                } else {
                    self.set_placeholder(id, &e.user_message());
                }
                return true;
            }
        };

        match (task, payload) {
            (
                BackgroundTask::LoadBuckets {
                    connection_id,
                    include_indexes,
                },
                FetchPayload::Buckets(buckets),
            ) => {
                let mut entries: Vec<(String, NodeKind)> = buckets
                    .into_iter()
                    .map(|b| {
                        (
                            b.name,
                            NodeKind::Bucket {
                                connection_id: connection_id.clone(),
                                bucket_type: b.bucket_type,
                                ram_quota_mb: b.ram_quota_mb,
                                replicas: b.replicas,
                            },
                        )
                    })
                    .collect();
                if *include_indexes {
                    entries.push((
                        INDEXES_FOLDER.to_string(),
                        NodeKind::IndexesFolder {
                            connection_id: connection_id.clone(),
                        },
                    ));
                }
                self.install(id, entries, NO_BUCKETS);
            }
            (
                BackgroundTask::LoadScopes {
                    connection_id,
                    bucket,
                },
                FetchPayload::Scopes(scopes),
            ) => {
                let entries = scopes
                    .into_iter()
                    .map(|s| {
                        (
                            s.name,
                            NodeKind::Scope {
                                connection_id: connection_id.clone(),
                                bucket: bucket.clone(),
                            },
                        )
                    })
                    .collect();
                self.install(id, entries, NO_SCOPES);
            }
            (
                BackgroundTask::LoadCollections {
                    connection_id,
                    bucket,
                    scope,
                },
                FetchPayload::Collections(collections),
            ) => {
                let entries = collections
                    .into_iter()
                    .map(|c| {
                        let keyspace = Keyspace::new(
                            connection_id.clone(),
                            bucket.clone(),
                            scope.clone(),
                            c.name.clone(),
                        );
                        (
                            c.name,
                            NodeKind::Collection {
                                keyspace,
                                next_offset: 0,
                            },
                        )
                    })
                    .collect();
                self.install(id, entries, NO_COLLECTIONS);
            }
            (
                BackgroundTask::LoadDocumentIds {
                    keyspace, offset, ..
                },
                FetchPayload::DocumentIds(page),
            ) => {
                self.install_page(id, keyspace, *offset, page.document_ids, page.has_more);
            }
            (BackgroundTask::LoadIndexes { .. }, FetchPayload::Indexes(indexes)) => {
                let entries = indexes
                    .into_iter()
                    .map(|info| (info.name.clone(), NodeKind::Index { info }))
                    .collect();
                self.install(id, entries, NO_INDEXES);
            }
            (task, payload) => {
                debug!(
                    "Mismatched payload {:?} for task {:?}, ignoring",
                    std::mem::discriminant(&payload),
                    task
                );
            }
        }
        true
    }

    fn install(&mut self, id: NodeId, entries: Vec<(String, NodeKind)>, empty_label: &str) {
        if entries.is_empty() {
            self.set_placeholder(id, empty_label);
        } else {
            self.replace_children(id, entries);
        }
    }

    /// First page replaces the children; later pages are appended as new
    /// batches. The running offset advances by the ids actually returned.
    fn install_page(
        &mut self,
        id: NodeId,
        keyspace: &Keyspace,
        offset: usize,
        document_ids: Vec<String>,
        has_more: bool,
    ) {
        let returned = document_ids.len();
        let next = offset + returned;
        if let Some(NodeKind::Collection { next_offset, .. }) =
            self.nodes.get_mut(&id).map(|n| &mut n.kind)
        {
            *next_offset = next;
        }

        let mut entries = Vec::new();
        if returned > 0 {
            let end_index = offset + returned - 1;
            entries.push((
                format!("[{}-{}]", offset + 1, end_index + 1),
                NodeKind::DocumentBatch {
                    keyspace: keyspace.clone(),
                    start_index: offset,
                    end_index,
                    document_ids,
                },
            ));
        }
        if has_more && returned > 0 {
            entries.push((
                LOAD_MORE.to_string(),
                NodeKind::LoadMore { next_offset: next },
            ));
        }

        if offset == 0 {
            self.install(id, entries, NO_DOCUMENTS);
        } else {
            self.append_children(id, entries);
        }
    }

    /// Fire a LoadMore node: it is removed and its collection fetches the next page.
    pub fn activate_load_more(&mut self, id: NodeId) -> ExpandOutcome {
        let Some(node) = self.nodes.get(&id) else {
            return ExpandOutcome::Ignored;
        };
        if node.node_type() != NodeType::LoadMore {
            return ExpandOutcome::Ignored;
        }
        let Some(parent) = node.parent else {
            return ExpandOutcome::Ignored;
        };
        let (keyspace, offset) = match self.nodes.get(&parent) {
            Some(TreeNode {
                kind: NodeKind::Collection {
                    keyspace,
                    next_offset,
                },
                is_loading: false,
                ..
            }) => (keyspace.clone(), *next_offset),
            _ => return ExpandOutcome::Ignored,
        };

        self.remove(id);
        match self.issue_ticket(parent) {
            Some(ticket) => ExpandOutcome::Fetch {
                ticket,
                task: BackgroundTask::LoadDocumentIds {
                    keyspace,
                    limit: self.page_size,
                    offset,
                },
            },
            None => ExpandOutcome::Ignored,
        }
    }

    fn set_connection_state(&mut self, id: NodeId, next: ConnectionState) {
        if let Some(TreeNode {
            kind: NodeKind::Connection { state, .. },
            ..
        }) = self.nodes.get_mut(&id)
        {
            *state = next;
        }
    }

    /// Put a connection node into its connecting state. Returns false when it
    /// is not a connection, not disconnected or already busy.
    pub fn begin_connect(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node)
                if !node.is_loading
                    && node.kind.connection_state() == Some(ConnectionState::Disconnected) =>
            {
                node.is_loading = true;
                node.is_expanded = true;
            }
            _ => return false,
        }
        self.set_connection_state(id, ConnectionState::Connecting);
        self.set_placeholder(id, CONNECTING);
        true
    }

    /// Apply a connect result. On success the bucket load is started and
    /// returned so the caller can run it; `None` means the node is gone.
    pub fn complete_connect(
        &mut self,
        id: NodeId,
        result: Result<Vec<Service>, &ExplorerError>,
    ) -> Option<ExpandOutcome> {
        let node = self.nodes.get_mut(&id)?;
        node.is_loading = false;
        node.is_loaded = false;
        match result {
            Ok(services) => {
                if let NodeKind::Connection {
                    state,
                    capabilities,
                    ..
                } = &mut node.kind
                {
                    *state = ConnectionState::Connected;
                    *capabilities = services.into_iter().collect();
                }
                self.set_placeholder(id, LOADING_BUCKETS);
                Some(self.begin_load(id))
            }
            Err(_) => {
                self.set_connection_state(id, ConnectionState::Disconnected);
                self.set_placeholder(id, CONNECTION_FAILED);
                Some(ExpandOutcome::Ignored)
            }
        }
    }

    /// Mark a connected node as disconnecting. Any load still in flight for
    /// the node itself is abandoned.
    pub fn begin_disconnect(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id) {
            Some(node) if node.kind.is_connected_connection() => {
                node.is_loading = false;
            }
            _ => return false,
        }
        self.set_connection_state(id, ConnectionState::Disconnecting);
        true
    }

    /// The disconnect failed: the node stays connected.
    pub fn abort_disconnect(&mut self, id: NodeId) {
        if self.nodes.get(&id).and_then(|n| n.kind.connection_state())
            == Some(ConnectionState::Disconnecting)
        {
            self.set_connection_state(id, ConnectionState::Connected);
        }
    }

    /// Back to the unconnected state with a fresh lazy placeholder.
    pub fn mark_disconnected(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        if let NodeKind::Connection {
            state,
            capabilities,
            ..
        } = &mut node.kind
        {
            *state = ConnectionState::Disconnected;
            capabilities.clear();
        }
        node.is_loading = false;
        node.is_loaded = false;
        self.set_placeholder(id, LOADING);
    }

    /// Every node below `id`, depth first in presentation order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.child_ids(id).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.child_ids(current).iter().rev().copied());
        }
        out
    }

    pub fn owning_connection(&self, id: NodeId) -> Option<NodeId> {
        let mut current = id;
        loop {
            let node = self.nodes.get(&current)?;
            match node.parent {
                Some(parent) => current = parent,
                None => {
                    return (node.node_type() == NodeType::Connection).then_some(current);
                }
            }
        }
    }

    /// Indented text rendering of the whole graph.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for root in &self.roots {
            self.render_node(*root, 0, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let marker = if !node.kind.is_lazy() {
            " "
        } else if node.is_expanded {
            "-"
        } else {
            "+"
        };
        out.push_str(&"  ".repeat(depth));
        out.push_str(marker);
        out.push(' ');
        out.push_str(&node.name);
        if node.is_loading {
            out.push_str(" …");
        }
        out.push('\n');
        for child in &node.children {
            self.render_node(*child, depth + 1, out);
        }
    }
}
