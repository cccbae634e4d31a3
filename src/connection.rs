use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::driver::{ClusterDriver, ClusterHandle};
use crate::errors::ExplorerError;
use crate::models::enums::Service;
use crate::models::structs::Credentials;
use crate::target::{self, ConnectTarget};

/// One live, shareable connection to a cluster.
pub struct Session {
    id: String,
    target: ConnectTarget,
    handle: Arc<dyn ClusterHandle>,
    capabilities: BTreeSet<Service>,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &ConnectTarget {
        &self.target
    }

    pub fn handle(&self) -> &Arc<dyn ClusterHandle> {
        &self.handle
    }

    pub fn capabilities(&self) -> &BTreeSet<Service> {
        &self.capabilities
    }

    pub fn has_service(&self, service: Service) -> bool {
        self.capabilities.contains(&service)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("target", &self.target.connection_string)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Keyed pool of live sessions. At most one session exists per id.
///
/// Lookups take a shared read lock. Connect and disconnect for the same id
/// are serialised by that id's gate, so the check-then-insert in
/// [`ConnectionRegistry::connect`] can never create a second session for it.
/// Work on different ids never waits on each other; the map lock is held only
/// for the insert or remove itself.
pub struct ConnectionRegistry {
    driver: Arc<dyn ClusterDriver>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    gates: Mutex<HashMap<String, Gate>>,
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn ClusterDriver>) -> Self {
        Self {
            driver,
            sessions: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, id: &str) -> Gate {
        self.gates.lock().entry(id.to_string()).or_default().clone()
    }

    /// Forget the gate for `id` once nobody else is holding or waiting on it.
    fn release_gate(&self, id: &str, gate: Gate) {
        let mut gates = self.gates.lock();
        // One reference in the map plus the caller's.
        if Arc::strong_count(&gate) <= 2 && !self.sessions.read().contains_key(id) {
            gates.remove(id);
        }
    }

    pub fn driver(&self) -> &Arc<dyn ClusterDriver> {
        &self.driver
    }

    /// Return the session for `id`, connecting first if none exists.
    ///
    /// An existing session is returned unchanged: no network traffic and no
    /// credential check. Connect errors are returned as-is; there is no retry.
    pub async fn connect(
        &self,
        id: &str,
        target: &str,
        username: &str,
        password: &str,
        use_ssl: bool,
    ) -> Result<Arc<Session>, ExplorerError> {
        if let Some(existing) = self.get(id) {
            info!("Reusing existing session for connection {}", id);
            return Ok(existing);
        }

        let gate = self.gate(id);
        let result = {
            let _guard = gate.lock().await;
            self.connect_gated(id, target, username, password, use_ssl)
                .await
        };
        if result.is_err() {
            self.release_gate(id, gate);
        }
        result
    }

    async fn connect_gated(
        &self,
        id: &str,
        target: &str,
        username: &str,
        password: &str,
        use_ssl: bool,
    ) -> Result<Arc<Session>, ExplorerError> {
        if let Some(existing) = self.get(id) {
            info!("Reusing session for connection {} created while waiting", id);
            return Ok(existing);
        }

        let target = target::resolve_target(target, use_ssl)?;
        info!(
            "Connecting {} to {} (tls={}, relaxed_certs={})",
            id, target.connection_string, target.tls, target.relaxed_certificates
        );

        let credentials = Credentials::new(username, password);
        let handle = self.driver.connect(&target, &credentials).await?;
        let capabilities = probe_capabilities(handle.as_ref()).await;

        let session = Arc::new(Session {
            id: id.to_string(),
            target,
            handle,
            capabilities,
        });
        self.sessions.write().insert(id.to_string(), session.clone());
        info!(
            "Connection {} ready with services {:?}",
            id,
            session.capabilities.iter().map(Service::label).collect::<Vec<_>>()
        );
        Ok(session)
    }

    /// Close and forget the session for `id`. Absent ids are a no-op.
    ///
    /// When closing fails the session stays registered so the caller can retry.
    pub async fn disconnect(&self, id: &str) -> Result<(), ExplorerError> {
        let gate = self.gate(id);
        let result = {
            let _guard = gate.lock().await;
            self.disconnect_gated(id).await
        };
        self.release_gate(id, gate);
        result
    }

    async fn disconnect_gated(&self, id: &str) -> Result<(), ExplorerError> {
        let Some(session) = self.get(id) else {
            debug!("Disconnect for {} ignored, no session", id);
            return Ok(());
        };

        session.handle.close().await?;
        self.sessions.write().remove(id);
        info!("Disconnected connection {}", id);
        Ok(())
    }

    /// Close every session; failures are logged and the session is dropped anyway.
    ///
    /// Connects still in flight are not waited for.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, Arc<Session>)> = self.sessions.write().drain().collect();
        let closes = drained.into_iter().map(|(id, session)| async move {
            if let Err(e) = session.handle.close().await {
                warn!("Failed to close connection {}: {}", id, e);
            }
        });
        futures::future::join_all(closes).await;
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Like [`ConnectionRegistry::get`] but absent ids become `NotConnected`.
    pub fn require(&self, id: &str) -> Result<Arc<Session>, ExplorerError> {
        self.get(id)
            .ok_or_else(|| ExplorerError::NotConnected(id.to_string()))
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// KV is assumed once connected. Query is confirmed by a probe; a failed
/// probe means "no query service" whether the failure was transient or not.
async fn probe_capabilities(handle: &dyn ClusterHandle) -> BTreeSet<Service> {
    let mut capabilities = BTreeSet::from([Service::KeyValue]);
    match handle.probe_query_service().await {
        Ok(()) => {
            capabilities.insert(Service::Query);
        }
        Err(e) => warn!("Query service not available: {}", e),
    }
    capabilities
}
