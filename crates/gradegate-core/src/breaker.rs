//! Global circuit breaker against distributed brute force.
//!
//! Every pre-authentication or credential failure, for any identity, bumps a
//! single counter whose TTL is the global window. Each failure refreshes the
//! TTL, so the count only resets after a full window with no failures.
//! Crossing the threshold raises a panic flag that halts all logins for its
//! own TTL.

use std::time::Duration;

use serde::Serialize;

use crate::store::KvStore;

const FAIL_COUNT_KEY: &str = "GLOBAL_FAIL_COUNT";
const PANIC_KEY: &str = "GLOBAL_PANIC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub threshold: u64,
    pub window: Duration,
    pub panic_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 120,
            window: Duration::from_secs(60),
            panic_duration: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerEvent {
    pub failures: u64,
    /// True only for the call that raised the panic flag.
    pub tripped_now: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub panic_active: bool,
    pub failures: u64,
    pub threshold: u64,
}

pub struct CircuitBreaker<S> {
    store: S,
    settings: BreakerSettings,
}

impl<S: KvStore> CircuitBreaker<S> {
    pub fn new(store: S, settings: BreakerSettings) -> Self {
        Self { store, settings }
    }

    pub fn is_tripped(&self) -> bool {
        self.store.get(PANIC_KEY).is_some()
    }

    pub fn record_failure(&self) -> BreakerEvent {
        let failures = self.store.increment(FAIL_COUNT_KEY, self.settings.window);
        let tripped_now = failures >= self.settings.threshold
            && self
                .store
                .put_if_absent(PANIC_KEY, "TRUE".to_string(), self.settings.panic_duration);

        if tripped_now {
            tracing::warn!(
                failures,
                threshold = self.settings.threshold,
                window_secs = self.settings.window.as_secs(),
                panic_secs = self.settings.panic_duration.as_secs(),
                "global failure threshold crossed; halting all logins"
            );
        }

        BreakerEvent {
            failures,
            tripped_now,
        }
    }

    /// Operator reset: lower the flag and restart the window.
    pub fn reset(&self) -> bool {
        let was_tripped = self.store.remove(PANIC_KEY);
        self.store.remove(FAIL_COUNT_KEY);
        was_tripped
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            panic_active: self.is_tripped(),
            failures: self
                .store
                .get(FAIL_COUNT_KEY)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            threshold: self.settings.threshold,
        }
    }

    pub fn settings(&self) -> &BreakerSettings {
        &self.settings
    }
}
