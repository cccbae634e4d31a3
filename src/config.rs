use dirs::home_dir;
use std::path::PathBuf;
use std::time::Duration;

const DATA_DIR_ENV: &str = "COUCHBASE_EXPLORER_DATA_DIR";
const PAGE_SIZE_ENV: &str = "COUCHBASE_EXPLORER_PAGE_SIZE";
const TIMEOUT_ENV: &str = "COUCHBASE_EXPLORER_TIMEOUT_SECS";

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Document ids fetched per batch when a collection is expanded.
    pub page_size: usize,
    pub connect_timeout: Duration,
    pub management_timeout: Duration,
    pub query_timeout: Duration,
    pub data_dir: PathBuf,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            connect_timeout: DEFAULT_TIMEOUT,
            management_timeout: DEFAULT_TIMEOUT,
            query_timeout: DEFAULT_TIMEOUT,
            data_dir: get_data_dir(),
        }
    }
}

impl ExplorerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var(PAGE_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => log::warn!("Ignoring invalid {}={:?}", PAGE_SIZE_ENV, raw),
            }
        }

        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => {
                    let timeout = Duration::from_secs(secs);
                    config.connect_timeout = timeout;
                    config.management_timeout = timeout;
                    config.query_timeout = timeout;
                }
                _ => log::warn!("Ignoring invalid {}={:?}", TIMEOUT_ENV, raw),
            }
        }

        log::debug!(
            "Explorer config: page_size={}, timeout={:?}, data_dir={}",
            config.page_size,
            config.query_timeout,
            config.data_dir.display()
        );
        config
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("connections.json")
    }
}

fn get_default_data_dir() -> PathBuf {
    if let Some(mut hd) = home_dir() {
        hd.push(".couchbase-explorer");
        hd
    } else {
        PathBuf::from(".couchbase-explorer")
    }
}

/// Data directory from the environment (absolute paths only) or `~/.couchbase-explorer`.
pub fn get_data_dir() -> PathBuf {
    if let Ok(custom_dir) = std::env::var(DATA_DIR_ENV) {
        let path = PathBuf::from(custom_dir);
        if path.is_absolute() {
            return path;
        }
        log::warn!(
            "{} must be absolute, ignoring {}",
            DATA_DIR_ENV,
            path.display()
        );
    }
    get_default_data_dir()
}

pub fn ensure_data_dir(config: &ExplorerConfig) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(&config.data_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cluster_options() {
        let config = ExplorerConfig::default();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.query_timeout, Duration::from_secs(10));
        assert!(config.settings_path().ends_with("connections.json"));
    }

    #[test]
    fn page_size_never_zero() {
        let config = ExplorerConfig::default().with_page_size(0);
        assert_eq!(config.page_size, 1);
    }
}
