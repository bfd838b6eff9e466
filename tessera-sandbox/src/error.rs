//! Error types for the sandbox side of the protocol.

use thiserror::Error;

/// Failure of a capability call issued by plugin code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No API_RESPONSE arrived within the configured deadline. The pending
    /// entry is removed, so a late response is silently dropped.
    #[error("API call timeout: {namespace}.{method}")]
    Timeout { namespace: String, method: String },

    /// The host answered with `success: false` (or a malformed response);
    /// carries the host-supplied error string.
    #[error("{0}")]
    Host(String),

    /// A capability registration was called with unusable options.
    #[error("invalid capability options: {0}")]
    InvalidOptions(String),

    /// The sandbox channel to the host is gone; no call can complete.
    #[error("sandbox channel closed")]
    Disconnected,
}

/// Returned when sending into a sandbox whose event loop has ended.
#[derive(Debug, Error)]
#[error("sandbox is not running")]
pub struct SandboxStopped;
