use std::collections::HashMap;

use parking_lot::RwLock;

use crate::errors::ExplorerError;

/// Secret storage keyed by connection id.
pub trait CredentialStore: Send + Sync {
    fn set(&self, id: &str, secret: &str) -> Result<(), ExplorerError>;
    fn get(&self, id: &str) -> Option<String>;
    /// Deleting an unknown id is not an error.
    fn delete(&self, id: &str) -> Result<(), ExplorerError>;
}

/// Process-local store, used by tests and the CLI.
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn set(&self, id: &str, secret: &str) -> Result<(), ExplorerError> {
        self.secrets.write().insert(id.to_string(), secret.to_string());
        Ok(())
    }

    fn get(&self, id: &str) -> Option<String> {
        self.secrets.read().get(id).cloned()
    }

    fn delete(&self, id: &str) -> Result<(), ExplorerError> {
        self.secrets.write().remove(id);
        Ok(())
    }
}
