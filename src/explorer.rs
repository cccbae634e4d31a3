//! Explorer controller.
//!
//! Owns the node graph and is the only thing that mutates it. Network work is
//! spawned on a tokio runtime and reports back as [`BackgroundResult`]
//! messages; the host drains them on its own thread with
//! [`ExplorerController::process_background_results`] (non-blocking) or
//! [`ExplorerController::wait_for_background`].

use std::future::Future;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};

use log::{debug, error, info, warn};
use tokio::runtime::Runtime;

use crate::catalog;
use crate::config::ExplorerConfig;
use crate::connection::ConnectionRegistry;
use crate::credentials::CredentialStore;
use crate::driver::ClusterDriver;
use crate::editor::{DocumentEditorSurface, EditorDocument};
use crate::errors::ExplorerError;
use crate::models::enums::{BackgroundResult, BackgroundTask, Command, ConnectionState, NodeType, Service};
use crate::models::structs::{ConnectionDraft, ConnectionRecord, Credentials, DocumentContent, Keyspace, Notification};
use crate::settings::SettingsStore;
use crate::target;
use crate::tree::{ExpandOutcome, ExplorerTree, NodeId, NodeKind};

pub fn build_runtime() -> Result<Arc<Runtime>, ExplorerError> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("couchbase-explorer-bg")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| ExplorerError::Runtime(e.to_string()))
}

/// Required-field and target-grammar checks shared by add, edit and test.
pub fn validate_fields(draft: &ConnectionDraft) -> Result<(), ExplorerError> {
    if draft.name.trim().is_empty() {
        return Err(ExplorerError::validation("name", "Connection name is required"));
    }
    if draft.host.trim().is_empty() {
        return Err(ExplorerError::validation("host", "Host is required"));
    }
    if draft.username.trim().is_empty() {
        return Err(ExplorerError::validation("username", "Username is required"));
    }
    if draft.password.is_empty() {
        return Err(ExplorerError::validation("password", "Password is required"));
    }
    target::resolve_target(draft.host.trim(), draft.use_ssl)?;
    Ok(())
}

fn record_from_draft(draft: &ConnectionDraft, id: Option<String>) -> ConnectionRecord {
    let host = draft.host.trim().to_string();
    let use_ssl = draft.use_ssl || target::is_cloud_host(&host);
    let mut record = ConnectionRecord::new(
        draft.name.trim().to_string(),
        host,
        draft.username.trim().to_string(),
        use_ssl,
    );
    if let Some(id) = id {
        record.id = id;
    }
    record
}

pub struct ExplorerController {
    config: ExplorerConfig,
    runtime: Arc<Runtime>,
    registry: Arc<ConnectionRegistry>,
    settings: Box<dyn SettingsStore>,
    credentials: Box<dyn CredentialStore>,
    editor: Option<Box<dyn DocumentEditorSurface>>,
    tree: ExplorerTree,
    result_sender: Sender<BackgroundResult>,
    result_receiver: Receiver<BackgroundResult>,
    in_flight: usize,
    notifications: Vec<Notification>,
}

impl ExplorerController {
    pub fn new(
        config: ExplorerConfig,
        driver: Arc<dyn ClusterDriver>,
        settings: Box<dyn SettingsStore>,
        credentials: Box<dyn CredentialStore>,
    ) -> Result<Self, ExplorerError> {
        let runtime = build_runtime()?;
        let registry = Arc::new(ConnectionRegistry::new(driver));
        Ok(Self::with_runtime(config, runtime, registry, settings, credentials))
    }

    pub fn with_runtime(
        config: ExplorerConfig,
        runtime: Arc<Runtime>,
        registry: Arc<ConnectionRegistry>,
        settings: Box<dyn SettingsStore>,
        credentials: Box<dyn CredentialStore>,
    ) -> Self {
        let (result_sender, result_receiver) = mpsc::channel();
        Self {
            tree: ExplorerTree::new(config.page_size),
            config,
            runtime,
            registry,
            settings,
            credentials,
            editor: None,
            result_sender,
            result_receiver,
            in_flight: 0,
            notifications: Vec::new(),
        }
    }

    pub fn set_editor(&mut self, editor: Box<dyn DocumentEditorSurface>) {
        self.editor = Some(editor);
    }

    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    pub fn tree(&self) -> &ExplorerTree {
        &self.tree
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Populate the tree from the settings store. Records already shown are skipped.
    pub fn load_connections(&mut self) -> usize {
        let records = self.settings.load();
        let mut added = 0;
        for record in &records {
            if self.tree.find_connection(&record.id).is_none() {
                self.tree.add_connection(record);
                added += 1;
            }
        }
        info!("Loaded {} saved connections", added);
        added
    }

    pub fn connection_records(&self) -> Vec<ConnectionRecord> {
        self.settings.load()
    }

    pub fn find_connection_by_name(&self, name: &str) -> Option<NodeId> {
        let wanted = name.trim().to_lowercase();
        self.tree.roots().iter().copied().find(|id| {
            self.tree
                .node(*id)
                .is_some_and(|n| n.name.to_lowercase() == wanted)
        })
    }

    /// Field checks plus case-insensitive name uniqueness. `editing_id` is the
    /// record being edited, which may keep its own name.
    pub fn validate_draft(
        &self,
        draft: &ConnectionDraft,
        editing_id: Option<&str>,
    ) -> Result<(), ExplorerError> {
        validate_fields(draft)?;
        let name = draft.name.trim().to_lowercase();
        let duplicate = self
            .settings
            .load()
            .iter()
            .any(|r| Some(r.id.as_str()) != editing_id && r.name.trim().to_lowercase() == name);
        if duplicate {
            return Err(ExplorerError::validation(
                "name",
                format!("A connection named '{}' already exists", draft.name.trim()),
            ));
        }
        Ok(())
    }

    pub fn add_connection(&mut self, draft: &ConnectionDraft) -> Result<NodeId, ExplorerError> {
        self.validate_draft(draft, None)?;
        let record = record_from_draft(draft, None);
        self.settings.add(&record)?;
        if let Err(e) = self.credentials.set(&record.id, &draft.password) {
            if let Err(rollback) = self.settings.delete(&record.id) {
                warn!("Could not roll back record {}: {}", record.id, rollback);
            }
            return Err(e);
        }
        let node = self.tree.add_connection(&record);
        info!("Added connection '{}' ({})", record.name, record.id);
        Ok(node)
    }

    /// Update the record and secret behind a connection node in place. A live
    /// session keeps its old settings until the next connect.
    pub fn edit_connection(
        &mut self,
        node: NodeId,
        draft: &ConnectionDraft,
    ) -> Result<(), ExplorerError> {
        let connection_id = self
            .connection_id_of(node)
            .ok_or_else(|| ExplorerError::validation("connection", "Select a connection to edit"))?;
        self.validate_draft(draft, Some(&connection_id))?;

        let record = record_from_draft(draft, Some(connection_id.clone()));
        self.settings.update(&record)?;
        self.credentials.set(&connection_id, &draft.password)?;
        self.tree.update_connection(node, &record);
        if self.registry.is_connected(&connection_id) {
            info!("Connection '{}' edited while connected; reconnect to apply", record.name);
        }
        Ok(())
    }

    /// Delete a connection. A connected one is disconnected first and only
    /// removed once that succeeds.
    pub fn delete_connection(&mut self, node: NodeId) -> Result<(), ExplorerError> {
        let (connection_id, state) = match self.tree.node(node).map(|n| &n.kind) {
            Some(NodeKind::Connection {
                connection_id,
                state,
                ..
            }) => (connection_id.clone(), *state),
            _ => {
                return Err(ExplorerError::validation(
                    "connection",
                    "Select a connection to delete",
                ));
            }
        };

        match state {
            ConnectionState::Connected => {
                self.tree.begin_disconnect(node);
                self.spawn_disconnect(node, connection_id, true);
                Ok(())
            }
            ConnectionState::Disconnecting => Err(ExplorerError::validation(
                "connection",
                "Connection is disconnecting, try again when it finishes",
            )),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                self.finish_delete(node, &connection_id)
            }
        }
    }

    fn finish_delete(&mut self, node: NodeId, connection_id: &str) -> Result<(), ExplorerError> {
        self.credentials.delete(connection_id)?;
        self.settings.delete(connection_id)?;
        self.tree.remove(node);
        info!("Deleted connection {}", connection_id);
        Ok(())
    }

    fn connection_id_of(&self, node: NodeId) -> Option<String> {
        match self.tree.node(node).map(|n| &n.kind) {
            Some(NodeKind::Connection { connection_id, .. }) => Some(connection_id.clone()),
            _ => None,
        }
    }

    pub fn connect(&mut self, node: NodeId) -> Result<(), ExplorerError> {
        let Some(current) = self.tree.node(node) else {
            return Err(ExplorerError::validation("connection", "Select a connection to connect"));
        };
        let NodeKind::Connection {
            connection_id,
            connection_string,
            username,
            use_ssl,
            ..
        } = &current.kind
        else {
            return Err(ExplorerError::validation("connection", "Select a connection to connect"));
        };
        let name = current.name.clone();
        let connection_id = connection_id.clone();
        let connection_string = connection_string.clone();
        let username = username.clone();
        let use_ssl = *use_ssl;

        let Some(password) = self.credentials.get(&connection_id) else {
            let err = ExplorerError::validation(
                "password",
                format!("No saved password for connection '{}'", name),
            );
            self.notify("Connection failed", &err);
            return Err(err);
        };

        if !self.tree.begin_connect(node) {
            debug!("Connect for '{}' ignored, node busy or connected", name);
            return Ok(());
        }

        let registry = self.registry.clone();
        self.spawn(async move {
            let result = registry
                .connect(&connection_id, &connection_string, &username, &password, use_ssl)
                .await
                .map(|session| session.capabilities().iter().copied().collect::<Vec<Service>>());
            BackgroundResult::Connected {
                node,
                connection_id,
                result,
            }
        });
        Ok(())
    }

    pub fn disconnect(&mut self, node: NodeId) -> Result<(), ExplorerError> {
        let connection_id = match self.tree.node(node).map(|n| &n.kind) {
            Some(NodeKind::Connection {
                connection_id,
                state: ConnectionState::Connected,
                ..
            }) => connection_id.clone(),
            Some(NodeKind::Connection { .. }) => return Ok(()),
            _ => {
                return Err(ExplorerError::validation(
                    "connection",
                    "Select a connection to disconnect",
                ));
            }
        };
        if self.tree.begin_disconnect(node) {
            self.spawn_disconnect(node, connection_id, false);
        }
        Ok(())
    }

    fn spawn_disconnect(&mut self, node: NodeId, connection_id: String, then_delete: bool) {
        let registry = self.registry.clone();
        self.spawn(async move {
            let result = registry.disconnect(&connection_id).await;
            BackgroundResult::Disconnected {
                node,
                connection_id,
                then_delete,
                result,
            }
        });
    }

    pub fn expand(&mut self, node: NodeId) {
        let outcome = self.tree.expand(node);
        self.dispatch(node, outcome);
    }

    pub fn collapse(&mut self, node: NodeId) {
        self.tree.collapse(node);
    }

    pub fn collapse_all(&mut self) {
        self.tree.collapse_all();
    }

    pub fn select(&mut self, node: Option<NodeId>) {
        self.tree.select(node);
    }

    /// Refresh `target`, or the selected node when none is given. Returns
    /// false when the node cannot be refreshed right now.
    pub fn refresh(&mut self, target: Option<NodeId>) -> bool {
        let Some(node) = target.or_else(|| self.tree.selected()) else {
            return false;
        };
        let outcome = self.tree.refresh(node);
        let started = outcome != ExpandOutcome::Ignored;
        self.dispatch(node, outcome);
        started
    }

    /// Fire a LoadMore node; the next page is fetched for its collection.
    pub fn activate_load_more(&mut self, node: NodeId) -> bool {
        let Some(collection) = self.tree.parent(node) else {
            return false;
        };
        let outcome = self.tree.activate_load_more(node);
        let started = outcome != ExpandOutcome::Ignored;
        self.dispatch(collection, outcome);
        started
    }

    fn dispatch(&mut self, node: NodeId, outcome: ExpandOutcome) {
        match outcome {
            ExpandOutcome::Fetch { ticket, task } => self.spawn_fetch(node, ticket, task),
            ExpandOutcome::ConnectRequested { connection_id } => {
                debug!("Expanding {} requested a connect", connection_id);
                if let Err(e) = self.connect(node) {
                    debug!("Connect on expand failed: {}", e);
                }
            }
            ExpandOutcome::Ignored | ExpandOutcome::AlreadyLoaded | ExpandOutcome::Populated => {}
        }
    }

    fn spawn_fetch(&mut self, node: NodeId, ticket: u64, task: BackgroundTask) {
        let registry = self.registry.clone();
        self.spawn(async move {
            let result = catalog::execute(&registry, &task).await;
            BackgroundResult::FetchComplete {
                node,
                ticket,
                task,
                result,
            }
        });
    }

    pub fn open_document(&mut self, node: NodeId) -> Result<(), ExplorerError> {
        let (keyspace, document_id) = match self.tree.node(node).map(|n| &n.kind) {
            Some(NodeKind::Document {
                keyspace,
                document_id,
            }) => (keyspace.clone(), document_id.clone()),
            _ => return Err(ExplorerError::validation("document", "Select a document to open")),
        };
        self.spawn_document_load(keyspace, document_id, false);
        Ok(())
    }

    /// Re-read a document already shown in the editor; the surface gets
    /// `refreshed` with the new content and version token.
    pub fn refresh_document(&mut self, document: &EditorDocument) {
        self.spawn_document_load(document.keyspace(), document.document_id.clone(), true);
    }

    fn spawn_document_load(&mut self, keyspace: Keyspace, document_id: String, refresh: bool) {
        let registry = self.registry.clone();
        self.spawn(async move {
            let result = catalog::get_document(&registry, &keyspace, &document_id).await;
            BackgroundResult::DocumentLoaded {
                keyspace,
                document_id,
                refresh,
                result,
            }
        });
    }

    pub fn copy_document_id(&self, node: NodeId) -> Option<String> {
        match self.tree.node(node).map(|n| &n.kind) {
            Some(NodeKind::Document { document_id, .. }) => Some(document_id.clone()),
            _ => None,
        }
    }

    /// One-off connect with the draft's settings. The registry is not touched
    /// and the handle is closed straight away.
    pub fn test_connection(&mut self, draft: &ConnectionDraft) -> Result<(), ExplorerError> {
        validate_fields(draft)?;
        let target = target::resolve_target(draft.host.trim(), draft.use_ssl)?;
        let credentials = Credentials::new(draft.username.trim(), draft.password.clone());
        let driver = self.registry.driver().clone();
        let draft = draft.clone();
        self.spawn(async move {
            let result = match driver.connect(&target, &credentials).await {
                Ok(handle) => {
                    if let Err(e) = handle.close().await {
                        warn!("Closing test connection failed: {}", e);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            };
            BackgroundResult::ConnectionTested { draft, result }
        });
        Ok(())
    }

    /// Whether `command` applies to `target`, derived from node state only.
    pub fn can_execute(&self, command: Command, target: Option<NodeId>) -> bool {
        let node = target.and_then(|id| self.tree.node(id).map(|n| (id, n)));
        match command {
            Command::AddConnection => true,
            Command::CollapseAll => !self.tree.roots().is_empty(),
            Command::Refresh => {
                node.is_some_and(|(id, n)| !n.is_loading && self.tree.is_refreshable(id))
            }
            Command::Connect => node.is_some_and(|(_, n)| {
                !n.is_loading && n.kind.connection_state() == Some(ConnectionState::Disconnected)
            }),
            Command::Disconnect => node.is_some_and(|(_, n)| n.kind.is_connected_connection()),
            Command::EditConnection | Command::DeleteConnection => {
                node.is_some_and(|(_, n)| n.node_type() == NodeType::Connection)
            }
            Command::OpenDocument | Command::CopyDocumentId => {
                node.is_some_and(|(_, n)| n.node_type() == NodeType::Document)
            }
            Command::LoadMore => node.is_some_and(|(_, n)| n.node_type() == NodeType::LoadMore),
        }
    }

    fn spawn<F>(&mut self, work: F)
    where
        F: Future<Output = BackgroundResult> + Send + 'static,
    {
        let sender = self.result_sender.clone();
        self.in_flight += 1;
        self.runtime.spawn(async move {
            if sender.send(work.await).is_err() {
                debug!("Controller gone before background result was delivered");
            }
        });
    }

    /// Apply every result that has already arrived. Never blocks.
    pub fn process_background_results(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.result_receiver.try_recv() {
            self.handle_result(result);
            handled += 1;
        }
        handled
    }

    /// Block until no background work is in flight, including follow-up work
    /// started while handling results. Returns false if a result took longer
    /// than the configured timeouts allow.
    pub fn wait_for_background(&mut self) -> bool {
        let limit = self.config.connect_timeout
            + self.config.management_timeout
            + self.config.query_timeout;
        while self.in_flight > 0 {
            match self.result_receiver.recv_timeout(limit) {
                Ok(result) => self.handle_result(result),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Gave up waiting for {} background tasks", self.in_flight);
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn handle_result(&mut self, result: BackgroundResult) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            BackgroundResult::FetchComplete {
                node,
                ticket,
                task,
                result,
            } => {
                if let Err(e) = &result {
                    warn!("Loading {:?} failed: {}", task, e);
                }
                self.tree.complete_fetch(node, ticket, &task, result);
            }
            BackgroundResult::Connected {
                node,
                connection_id,
                result,
            } => self.on_connected(node, connection_id, result),
            BackgroundResult::Disconnected {
                node,
                connection_id,
                then_delete,
                result,
            } => self.on_disconnected(node, connection_id, then_delete, result),
            BackgroundResult::DocumentLoaded {
                keyspace,
                document_id,
                refresh,
                result,
            } => self.on_document_loaded(keyspace, document_id, refresh, result),
            BackgroundResult::ConnectionTested { draft, result } => match result {
                Ok(()) => {
                    info!("Test connection to {} succeeded", draft.host.trim());
                    self.notifications.push(Notification::new(
                        "Test connection",
                        format!("Successfully connected to {}", draft.host.trim()),
                    ));
                }
                Err(e) => self.notify("Test connection failed", &e),
            },
            BackgroundResult::OrphanReleased { connection_id } => {
                info!("Released session of removed connection {}", connection_id);
            }
        }
    }

    fn on_connected(
        &mut self,
        node: NodeId,
        connection_id: String,
        result: Result<Vec<Service>, ExplorerError>,
    ) {
        if !self.tree.contains(node) {
            if result.is_ok() {
                info!(
                    "Connection {} was removed while connecting, closing its session",
                    connection_id
                );
                let registry = self.registry.clone();
                self.spawn(async move {
                    if let Err(e) = registry.disconnect(&connection_id).await {
                        warn!("Closing orphaned session {} failed: {}", connection_id, e);
                    }
                    BackgroundResult::OrphanReleased { connection_id }
                });
            }
            return;
        }

        match &result {
            Ok(services) => info!("Connected {} with {} services", connection_id, services.len()),
            Err(e) => self.notify("Connection failed", e),
        }
        if let Some(outcome) = self.tree.complete_connect(node, result.as_ref().cloned()) {
            self.dispatch(node, outcome);
        }
    }

    fn on_disconnected(
        &mut self,
        node: NodeId,
        connection_id: String,
        then_delete: bool,
        result: Result<(), ExplorerError>,
    ) {
        match result {
            Ok(()) => {
                self.tree.mark_disconnected(node);
                if then_delete && let Err(e) = self.finish_delete(node, &connection_id) {
                    self.notify("Delete failed", &e);
                }
            }
            Err(e) => {
                self.tree.abort_disconnect(node);
                let title = if then_delete {
                    "Delete failed"
                } else {
                    "Disconnect failed"
                };
                self.notify(title, &e);
            }
        }
    }

    fn on_document_loaded(
        &mut self,
        keyspace: Keyspace,
        document_id: String,
        refresh: bool,
        result: Result<DocumentContent, ExplorerError>,
    ) {
        let content = match result {
            Ok(content) => content,
            Err(e) => {
                let title = if refresh {
                    "Refresh failed"
                } else {
                    "Failed to open document"
                };
                self.notify(title, &e);
                return;
            }
        };
        let document = EditorDocument::from_content(&keyspace, content);
        match self.editor.as_mut() {
            Some(editor) if refresh => editor.refreshed(document),
            Some(editor) => editor.open(document),
            None => warn!("No editor surface registered, dropping document {}", document_id),
        }
    }

    fn notify(&mut self, title: &str, err: &ExplorerError) {
        error!("{}: {}", title, err);
        self.notifications.push(Notification::new(title, err.to_string()));
    }

    /// Close every live session.
    pub fn shutdown(&mut self) {
        let registry = self.registry.clone();
        self.runtime.block_on(registry.disconnect_all());
        for root in self.tree.roots().to_vec() {
            if self.tree.node(root).is_some_and(|n| n.kind.is_connected_connection()) {
                self.tree.mark_disconnected(root);
            }
        }
    }
}
