//! Request governor.
//!
//! Reactive UIs can end up re-requesting the same query in a tight loop. The
//! governor counts bursts of closely spaced requests per cache key and, once
//! a burst grows past the limit, refuses that key for a cooldown period.
//! Callers serve whatever they have cached while a key is blocked.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::CacheKey;
use crate::config::GovernorConfig;
use crate::utils::lock_recover;

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blocked { until: Instant },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct GovernorState {
    last_request: Option<Instant>,
    burst: u32,
    blocked_until: Option<Instant>,
}

pub struct RequestGovernor {
    config: GovernorConfig,
    states: Mutex<HashMap<CacheKey, GovernorState>>,
}

impl RequestGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        RequestGovernor {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` and decide whether it may reach the store.
    pub fn admit(&self, key: &CacheKey) -> Admission {
        let now = Instant::now();
        let mut states = lock_recover(&self.states);
        let state = states.entry(key.clone()).or_default();

        if let Some(until) = state.blocked_until {
            if now < until {
                return Admission::Blocked { until };
            }
            debug!(key = %key, "Governor cooldown elapsed");
            *state = GovernorState::default();
        }

        state.burst = match state.last_request {
            Some(last) if now.duration_since(last) < self.config.rapid_threshold => {
                state.burst + 1
            }
            _ => 1,
        };
        state.last_request = Some(now);

        if state.burst > self.config.rapid_limit {
            let until = now + self.config.cooldown;
            state.blocked_until = Some(until);
            warn!(
                key = %key,
                burst = state.burst,
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Request loop detected, blocking key"
            );
            return Admission::Blocked { until };
        }

        Admission::Allowed
    }

    pub fn is_blocked(&self, key: &CacheKey) -> bool {
        let states = lock_recover(&self.states);
        states
            .get(key)
            .and_then(|s| s.blocked_until)
            .is_some_and(|until| Instant::now() < until)
    }

    /// Forget everything recorded for `key`.
    pub fn reset(&self, key: &CacheKey) {
        lock_recover(&self.states).remove(key);
    }

    /// Drop keys whose last request is older than one rapid window plus a
    /// cooldown. Such a key is no longer blocked and would start a fresh
    /// burst, so forgetting it changes no decision.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let horizon = self.config.rapid_threshold + self.config.cooldown;
        let mut states = lock_recover(&self.states);
        let before = states.len();
        states.retain(|_, state| {
            state
                .last_request
                .is_some_and(|last| now.duration_since(last) < horizon)
        });
        before - states.len()
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        lock_recover(&self.states).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EntityKind;
    use crate::owner::OwnerId;
    use std::time::Duration;

    fn key(descriptor: &str) -> CacheKey {
        CacheKey::new(OwnerId::new("owner").unwrap(), EntityKind::Events, descriptor)
    }

    fn governor() -> RequestGovernor {
        RequestGovernor::new(GovernorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_rapid_request_is_blocked() {
        let governor = governor();
        let key = key("jan");
        for i in 0..10 {
            assert_eq!(governor.admit(&key), Admission::Allowed, "request {i}");
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert!(matches!(governor.admit(&key), Admission::Blocked { .. }));
        assert!(governor.is_blocked(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_requests_are_never_blocked() {
        let governor = governor();
        let key = key("jan");
        for _ in 0..50 {
            assert!(governor.admit(&key).is_allowed());
            tokio::time::advance(Duration::from_millis(150)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_request_restarts_the_burst() {
        let governor = governor();
        let key = key("jan");
        for _ in 0..9 {
            governor.admit(&key);
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        for _ in 0..10 {
            assert!(governor.admit(&key).is_allowed());
            tokio::time::advance(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_until_cooldown_elapses() {
        let governor = governor();
        let key = key("jan");
        for _ in 0..11 {
            governor.admit(&key);
        }
        let Admission::Blocked { until } = governor.admit(&key) else {
            panic!("expected the key to stay blocked");
        };

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!governor.admit(&key).is_allowed());

        tokio::time::advance(until - Instant::now()).await;
        assert!(governor.admit(&key).is_allowed());
        assert!(!governor.is_blocked(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_governed_independently() {
        let governor = governor();
        let jan = key("jan");
        let feb = key("feb");
        for _ in 0..11 {
            governor.admit(&jan);
        }
        assert!(governor.is_blocked(&jan));
        assert!(governor.admit(&feb).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_a_block() {
        let governor = governor();
        let key = key("jan");
        for _ in 0..11 {
            governor.admit(&key);
        }
        governor.reset(&key);
        assert!(governor.admit(&key).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_keys_are_forgotten() {
        let governor = governor();
        for i in 0..50 {
            governor.admit(&key(&format!("window-{i}")));
        }
        let blocked = key("loop");
        for _ in 0..11 {
            governor.admit(&blocked);
        }
        assert_eq!(governor.tracked(), 51);

        // Recent keys stay
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(governor.evict_idle(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        let recent = key("recent");
        governor.admit(&recent);
        assert_eq!(governor.evict_idle(), 51);
        assert_eq!(governor.tracked(), 1);
        assert!(governor.admit(&recent).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn custom_limit() {
        let governor = RequestGovernor::new(GovernorConfig {
            rapid_limit: 2,
            ..GovernorConfig::default()
        });
        let key = key("jan");
        assert!(governor.admit(&key).is_allowed());
        assert!(governor.admit(&key).is_allowed());
        assert!(!governor.admit(&key).is_allowed());
    }
}
