//! Error types for the host bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin not found: {0}")]
    PluginNotFound(String),

    #[error("plugin already loaded: {0}")]
    PluginAlreadyLoaded(String),

    #[error("plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("plugin crashed: {plugin_id}: {message}")]
    PluginCrashed { plugin_id: String, message: String },

    #[error("permission denied: plugin '{plugin_id}' lacks '{namespace}' capability")]
    PermissionDenied {
        plugin_id: String,
        namespace: String,
    },

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("rate limited: {plugin_id}: {reason}")]
    RateLimited { plugin_id: String, reason: String },

    #[error("timeout: plugin '{plugin_id}' exceeded {timeout_ms}ms deadline")]
    Timeout { plugin_id: String, timeout_ms: u64 },

    #[error("Invalid API namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid API method: {namespace}.{method}")]
    InvalidMethod { namespace: String, method: String },

    #[error("invalid capability arguments: {0}")]
    InvalidArguments(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
