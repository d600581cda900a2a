use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: &'static str, name: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("registry storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// Only ever logged; a probe that runs out of time reads as "not alive".
    #[error("liveness probe for '{environment}' exceeded {timeout_ms}ms")]
    LivenessTimeout { environment: String, timeout_ms: u64 },
    #[error("console request to {url} failed: {message}")]
    Console { url: String, message: String },
    #[error("node '{node}' not found in environment '{environment}'")]
    NodeNotFound { environment: String, node: String },
    #[error("{operation} is not supported by {environment_type} environments")]
    Unsupported {
        operation: &'static str,
        environment_type: String,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect to '{environment}': {message}")]
    Handshake { environment: String, message: String },
    #[error("connection attempt to '{0}' was superseded")]
    Superseded(String),
    #[error("no environment is connected")]
    NotConnected,
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}
