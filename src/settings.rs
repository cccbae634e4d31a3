use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::errors::ExplorerError;
use crate::models::structs::ConnectionRecord;

/// Persistence for connection metadata. Secrets never pass through here.
pub trait SettingsStore: Send + Sync {
    /// Saved records in insertion order. A missing or unreadable store is an
    /// empty list, never an error.
    fn load(&self) -> Vec<ConnectionRecord>;

    fn save(&self, records: &[ConnectionRecord]) -> Result<(), ExplorerError>;

    fn add(&self, record: &ConnectionRecord) -> Result<(), ExplorerError> {
        let mut records = self.load();
        records.push(record.clone());
        self.save(&records)
    }

    /// Replace the record with the same id; unknown ids are appended.
    fn update(&self, record: &ConnectionRecord) -> Result<(), ExplorerError> {
        let mut records = self.load();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.save(&records)
    }

    fn delete(&self, id: &str) -> Result<(), ExplorerError> {
        let mut records = self.load();
        records.retain(|r| r.id != id);
        self.save(&records)
    }

    fn get(&self, id: &str) -> Option<ConnectionRecord> {
        self.load().into_iter().find(|r| r.id == id)
    }
}

/// Records kept as pretty-printed JSON in `<data_dir>/connections.json`.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `connections.json` -> `connections.json.bak`.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Move an unreadable settings file aside so the next write cannot
    /// destroy the records it may still hold.
    fn preserve_unreadable(&self) -> Result<(), ExplorerError> {
        if !self.path.exists() {
            return Ok(());
        }
        if let Err(e) = self.load_from_json() {
            let backup = self.backup_path();
            warn!(
                "Settings file {} is unreadable ({}), keeping it as {}",
                self.path.display(),
                e,
                backup.display()
            );
            std::fs::rename(&self.path, &backup)?;
        }
        Ok(())
    }

    fn load_from_json(&self) -> Result<Vec<ConnectionRecord>, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(&self.path)?;
        let records: Vec<ConnectionRecord> = serde_json::from_str(&content)?;
        Ok(records)
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Vec<ConnectionRecord> {
        if !self.path.exists() {
            debug!("No settings file at {}", self.path.display());
            return Vec::new();
        }
        match self.load_from_json() {
            Ok(records) => {
                info!("Loaded {} connections from {}", records.len(), self.path.display());
                records
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable settings file {}: {}",
                    self.path.display(),
                    e
                );
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[ConnectionRecord]) -> Result<(), ExplorerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.preserve_unreadable()?;
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| ExplorerError::Storage(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        debug!("Saved {} connections to {}", records.len(), self.path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettingsStore {
    records: Mutex<Vec<ConnectionRecord>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ConnectionRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Vec<ConnectionRecord> {
        self.records.lock().clone()
    }

    fn save(&self, records: &[ConnectionRecord]) -> Result<(), ExplorerError> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}
