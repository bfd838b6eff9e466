//! Rate limiting for plugin API calls.
//!
//! Sliding windows over call timestamps plus a concurrent-call ceiling,
//! tracked per plugin. Prevents a misbehaving plugin from exhausting the
//! host with API_CALL traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

/// Rate limit configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum API calls per minute per plugin.
    pub max_calls_per_minute: u32,
    /// Maximum API calls per hour per plugin.
    pub max_calls_per_hour: u32,
    /// Maximum concurrent API calls per plugin.
    pub max_concurrent_calls: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_minute: 60,
            max_calls_per_hour: 3600,
            max_concurrent_calls: 10,
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
        }
    }

    fn denied(reason: String, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after,
        }
    }
}

struct PluginRateState {
    /// Timestamps of recent calls, oldest first, pruned to the last hour.
    timestamps: VecDeque<Instant>,
    concurrent: u32,
}

/// Per-plugin API call rate limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    states: Mutex<HashMap<String, PluginRateState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a plugin may issue another API call; on success the
    /// call is counted and must be paired with [`Self::record_complete`].
    pub fn check_api_call(&self, plugin_id: &str) -> RateLimitDecision {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap();
        let state = states
            .entry(plugin_id.to_string())
            .or_insert_with(|| PluginRateState {
                timestamps: VecDeque::new(),
                concurrent: 0,
            });

        while let Some(oldest) = state.timestamps.front() {
            if now.duration_since(*oldest) > Duration::from_secs(3600) {
                state.timestamps.pop_front();
            } else {
                break;
            }
        }

        if state.concurrent >= self.config.max_concurrent_calls {
            let decision = RateLimitDecision::denied(
                format!(
                    "Too many concurrent API calls (limit {})",
                    self.config.max_concurrent_calls
                ),
                None,
            );
            warn!(plugin_id, concurrent = state.concurrent, "Concurrent API call limit hit");
            return decision;
        }

        let minute_ago = now - Duration::from_secs(60);
        let calls_last_minute = state
            .timestamps
            .iter()
            .rev()
            .take_while(|t| **t > minute_ago)
            .count() as u32;
        if calls_last_minute >= self.config.max_calls_per_minute {
            let retry_after = state
                .timestamps
                .iter()
                .rev()
                .nth(self.config.max_calls_per_minute as usize - 1)
                .map(|t| Duration::from_secs(60).saturating_sub(now.duration_since(*t)));
            return RateLimitDecision::denied(
                format!(
                    "API call rate exceeded ({} calls per minute)",
                    self.config.max_calls_per_minute
                ),
                retry_after,
            );
        }

        if state.timestamps.len() as u32 >= self.config.max_calls_per_hour {
            return RateLimitDecision::denied(
                format!(
                    "API call rate exceeded ({} calls per hour)",
                    self.config.max_calls_per_hour
                ),
                None,
            );
        }

        state.timestamps.push_back(now);
        state.concurrent += 1;
        RateLimitDecision::allowed()
    }

    /// Record completion of an in-flight API call.
    pub fn record_complete(&self, plugin_id: &str) {
        let mut states = self.states.lock().unwrap();
        if let Some(state) = states.get_mut(plugin_id) {
            state.concurrent = state.concurrent.saturating_sub(1);
        }
    }

    /// Drop all tracked state for a plugin (on unload).
    pub fn remove_plugin(&self, plugin_id: &str) {
        self.states.lock().unwrap().remove(plugin_id);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limits() {
        let limiter = RateLimiter::default();
        for _ in 0..10 {
            let decision = limiter.check_api_call("p");
            assert!(decision.allowed);
            limiter.record_complete("p");
        }
    }

    #[test]
    fn concurrent_ceiling_blocks_without_completion() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_concurrent_calls: 2,
            ..Default::default()
        });
        assert!(limiter.check_api_call("p").allowed);
        assert!(limiter.check_api_call("p").allowed);

        let denied = limiter.check_api_call("p");
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("concurrent"));

        limiter.record_complete("p");
        assert!(limiter.check_api_call("p").allowed);
    }

    #[test]
    fn per_minute_window_blocks_with_retry_hint() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_calls_per_minute: 3,
            max_concurrent_calls: 100,
            ..Default::default()
        });
        for _ in 0..3 {
            assert!(limiter.check_api_call("p").allowed);
            limiter.record_complete("p");
        }

        let denied = limiter.check_api_call("p");
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("per minute"));
        assert!(denied.retry_after.is_some());
    }

    #[test]
    fn plugins_are_limited_independently() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_concurrent_calls: 1,
            ..Default::default()
        });
        assert!(limiter.check_api_call("a").allowed);
        assert!(!limiter.check_api_call("a").allowed);
        assert!(limiter.check_api_call("b").allowed);
    }

    #[test]
    fn remove_plugin_resets_state() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_concurrent_calls: 1,
            ..Default::default()
        });
        assert!(limiter.check_api_call("p").allowed);
        assert!(!limiter.check_api_call("p").allowed);

        limiter.remove_plugin("p");
        assert!(limiter.check_api_call("p").allowed);
    }
}
