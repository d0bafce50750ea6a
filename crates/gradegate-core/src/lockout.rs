use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{deadline, Clock};
use crate::store::KvStore;

/// Failure count at which the identity is hard-locked.
pub const LOCK_AT: u64 = 6;

/// Where an identity sits in the progressive lockout ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityStage {
    Clear,
    Warned,
    NeedsSecondary,
    Delay10,
    Delay60,
    Delay300,
    Locked,
}

impl IdentityStage {
    fn from_count(count: u64) -> Self {
        match count {
            0 => IdentityStage::Clear,
            1 => IdentityStage::Warned,
            2 => IdentityStage::NeedsSecondary,
            3 => IdentityStage::Delay10,
            4 => IdentityStage::Delay60,
            5 => IdentityStage::Delay300,
            _ => IdentityStage::Locked,
        }
    }

    /// Advisory client-side wait before the next attempt.
    pub fn wait_seconds(self) -> Option<u64> {
        match self {
            IdentityStage::Delay10 => Some(10),
            IdentityStage::Delay60 => Some(60),
            IdentityStage::Delay300 => Some(300),
            _ => None,
        }
    }
}

/// Outcome of recording one failure against an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureVerdict {
    pub failure_count: u64,
    pub stage: IdentityStage,
    pub locked: bool,
    pub require_secondary_proof: bool,
    pub wait_seconds: Option<u64>,
}

/// Operator view of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub identity: String,
    pub failure_count: u64,
    pub stage: IdentityStage,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Per-identity failure counter and lock.
///
/// Counters live under `ATTEMPT_<identity>` and locks under
/// `LOCK_<identity>`, both with the lockout duration as TTL. Neither is
/// deleted on expiry; a lapsed TTL simply reads as absent. Incrementing the
/// counter and setting the lock are separate writes.
pub struct IdentityLockout<S, C> {
    store: S,
    clock: C,
    lockout: Duration,
}

impl<S: KvStore, C: Clock> IdentityLockout<S, C> {
    pub fn new(store: S, clock: C, lockout: Duration) -> Self {
        Self {
            store,
            clock,
            lockout,
        }
    }

    /// `Some(locked_until)` while the identity is locked.
    pub fn locked_until(&self, identity: &str) -> Option<DateTime<Utc>> {
        let raw = self.store.get(&lock_key(identity))?;
        // The key's TTL is authoritative; an unreadable timestamp still locks.
        Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| deadline(self.clock.now(), self.lockout)),
        )
    }

    pub fn failure_count(&self, identity: &str) -> u64 {
        self.store
            .get(&attempt_key(identity))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Count one failure, refresh the counter's TTL and lock at [`LOCK_AT`].
    pub fn record_failure(&self, identity: &str) -> FailureVerdict {
        let count = self.store.increment(&attempt_key(identity), self.lockout);
        let stage = IdentityStage::from_count(count);

        let locked = stage == IdentityStage::Locked;
        if locked {
            let until = self.lock_now(identity);
            tracing::warn!(
                identity,
                failures = count,
                locked_until = %until,
                "progressive lockout exhausted; locking identity"
            );
        } else {
            tracing::debug!(
                identity,
                failures = count,
                stage = ?stage,
                "login failed; incrementing failure counter"
            );
        }

        FailureVerdict {
            failure_count: count,
            stage,
            locked,
            require_secondary_proof: stage == IdentityStage::NeedsSecondary,
            wait_seconds: stage.wait_seconds(),
        }
    }

    /// Lock the identity for the full lockout duration, skipping any stages left.
    pub fn lock_now(&self, identity: &str) -> DateTime<Utc> {
        let until = deadline(self.clock.now(), self.lockout);
        self.store
            .put(&lock_key(identity), until.to_rfc3339(), self.lockout);
        until
    }

    /// Successful login: forget the failures. An active lock is left alone.
    pub fn reset(&self, identity: &str) {
        self.store.remove(&attempt_key(identity));
    }

    /// Operator clear: drop both counter and lock. Returns whether anything was live.
    pub fn clear(&self, identity: &str) -> bool {
        let had_lock = self.store.remove(&lock_key(identity));
        let had_count = self.store.remove(&attempt_key(identity));
        had_lock || had_count
    }

    pub fn snapshot(&self, identity: &str) -> IdentitySnapshot {
        let locked_until = self.locked_until(identity);
        let failure_count = self.failure_count(identity);
        let stage = if locked_until.is_some() {
            IdentityStage::Locked
        } else {
            IdentityStage::from_count(failure_count)
        };
        IdentitySnapshot {
            identity: identity.to_string(),
            failure_count,
            stage,
            locked_until,
        }
    }
}

fn lock_key(identity: &str) -> String {
    format!("LOCK_{identity}")
}

fn attempt_key(identity: &str) -> String {
    format!("ATTEMPT_{identity}")
}
