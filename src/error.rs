//! Error types for plugkit

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for plugkit
#[derive(Error, Debug)]
pub enum Error {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Plugin manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read manifest {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Malformed manifest {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Manifest {path} missing required field: {field}")]
    MissingField { path: PathBuf, field: String },
}

/// Plugin loading errors
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Duplicate {kind} '{name}' in {dir}")]
    DuplicateEntry {
        kind: &'static str,
        name: String,
        dir: PathBuf,
    },

    #[error("Plugin name '{name}' already loaded from another directory")]
    DuplicateName { name: String },

    #[error("Malformed MCP config {path}: {reason}")]
    McpConfig { path: PathBuf, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Command dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Plugin '{0}' not found")]
    PluginNotFound(String),

    #[error("{kind} '{name}' not found in plugin '{plugin}'")]
    CommandNotFound {
        kind: &'static str,
        plugin: String,
        name: String,
    },

    #[error("Execution deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Mcp(#[from] McpError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// MCP bridge errors
#[derive(Error, Debug)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{server}': {reason}")]
    Spawn { server: String, reason: String },

    #[error("MCP server '{server}' handshake timed out")]
    HandshakeTimeout { server: String },

    #[error("MCP protocol violation: {0}")]
    Protocol(String),

    #[error("MCP request '{method}' timed out")]
    Timeout { method: String },

    #[error("MCP tool error {code}: {message}")]
    Tool { code: i64, message: String },

    #[error("MCP connection closed")]
    ConnectionClosed,

    #[error("MCP connection is not ready")]
    NotReady,

    #[error("MCP IO error: {0}")]
    Io(String),
}

impl McpError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}

/// Capability provider errors, normalized across vendors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Tool call loop exceeded {limit} rounds")]
    ToolLoopExceeded { limit: u32 },

    #[error(transparent)]
    Tool(#[from] McpError),
}

impl ProviderError {
    /// Whether a caller may reasonably retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimit(_)
        )
    }

    /// Map an HTTP status code and body to a normalized error.
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 | 403 => ProviderError::Authentication(body.to_string()),
            429 => ProviderError::RateLimit(body.to_string()),
            400 | 404 | 422 => ProviderError::InvalidRequest(body.to_string()),
            500..=599 => ProviderError::Network(format!("server error {status}: {body}")),
            _ => ProviderError::Api {
                status,
                message: body.to_string(),
            },
        }
    }
}

/// Result type alias using the plugkit error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key"),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimit(_)
        ));
        assert!(matches!(
            ProviderError::from_status(400, "bad body"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            ProviderError::from_status(503, "oops"),
            ProviderError::Network(_)
        ));
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::RateLimit("429".into()).is_retryable());
        assert!(!ProviderError::Authentication("nope".into()).is_retryable());
        assert!(McpError::Timeout {
            method: "tools/list".into()
        }
        .is_retryable());
        assert!(!McpError::ConnectionClosed.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = DispatchError::CommandNotFound {
            kind: "command",
            plugin: "email-plugin".into(),
            name: "draft".into(),
        };
        assert_eq!(
            err.to_string(),
            "command 'draft' not found in plugin 'email-plugin'"
        );
    }
}
