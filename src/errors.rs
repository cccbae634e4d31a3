#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ExplorerError {
    #[error("Not connected to cluster '{0}'")]
    NotConnected(String),
    #[error("Failed to connect to cluster: {0}")]
    ConnectFailure(String),
    #[error("{0}")]
    Fetch(String),
    #[error("{message}")]
    Validation { field: &'static str, message: String },
    #[error("settings store error: {0}")]
    Storage(String),
    #[error("background runtime error: {0}")]
    Runtime(String),
}

impl ExplorerError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ExplorerError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Errors the user can fix by reconnecting or editing the form.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExplorerError::NotConnected(_) | ExplorerError::Validation { .. }
        )
    }

    /// Text shown inside an error placeholder node.
    pub fn user_message(&self) -> String {
        format!("(Error: {})", self)
    }
}

impl From<reqwest::Error> for ExplorerError {
    fn from(e: reqwest::Error) -> Self {
        ExplorerError::Fetch(e.to_string())
    }
}

impl From<serde_json::Error> for ExplorerError {
    fn from(e: serde_json::Error) -> Self {
        ExplorerError::Fetch(format!("invalid response: {}", e))
    }
}

impl From<std::io::Error> for ExplorerError {
    fn from(e: std::io::Error) -> Self {
        ExplorerError::Storage(e.to_string())
    }
}
