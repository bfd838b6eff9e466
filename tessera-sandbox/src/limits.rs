//! Time budgets for a plugin sandbox.

use std::time::Duration;

/// Deadlines governing one sandbox.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// How long a capability call waits for its API_RESPONSE.
    pub api_call_timeout_ms: u64,
    /// Optional ceiling on a single CALL_METHOD invocation. `None` leaves
    /// plugin methods unbounded.
    pub call_deadline_ms: Option<u64>,
    /// How long the host waits for the INIT ack.
    pub init_deadline_ms: u64,
    /// How long the host waits for the DISPOSE ack before giving up.
    pub shutdown_deadline_ms: u64,
}

impl SandboxLimits {
    pub fn first_party() -> Self {
        Self {
            api_call_timeout_ms: 30_000,
            call_deadline_ms: None,
            init_deadline_ms: 10_000,
            shutdown_deadline_ms: 2_000,
        }
    }

    pub fn third_party() -> Self {
        Self {
            api_call_timeout_ms: 30_000,
            call_deadline_ms: Some(10_000),
            init_deadline_ms: 5_000,
            shutdown_deadline_ms: 2_000,
        }
    }

    pub fn api_call_timeout(&self) -> Duration {
        Duration::from_millis(self.api_call_timeout_ms)
    }

    pub fn call_deadline(&self) -> Option<Duration> {
        self.call_deadline_ms.map(Duration::from_millis)
    }

    pub fn init_deadline(&self) -> Duration {
        Duration::from_millis(self.init_deadline_ms)
    }

    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self::first_party()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_party_leaves_methods_unbounded() {
        let limits = SandboxLimits::first_party();
        assert_eq!(limits.api_call_timeout_ms, 30_000);
        assert!(limits.call_deadline().is_none());
    }

    #[test]
    fn third_party_bounds_method_execution() {
        let limits = SandboxLimits::third_party();
        assert_eq!(limits.call_deadline(), Some(Duration::from_secs(10)));
        assert!(limits.init_deadline() < SandboxLimits::first_party().init_deadline());
    }
}
