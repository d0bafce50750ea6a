//! Security event log.
//!
//! Every guard decision worth a second look is written here: blocked and
//! failed logins, locks, suspected malicious lockouts, panics and operator
//! actions. Writing is best effort and never changes a decision.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Entries kept before the oldest are trimmed.
pub const LOG_CAPACITY: usize = 1000;
/// How many of the oldest entries are dropped once over capacity.
pub const LOG_TRIM: usize = 200;

pub const NO_SESSION: &str = "NO-SESSION";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    LoginBlocked,
    LoginFail,
    ProofFail,
    MaliciousLockoutAttempt,
    AccountLocked,
    LoginSuccess,
    GlobalPanic,
    AdminUnlock,
    PanicReset,
    SystemError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoginBlocked => "LOGIN_BLOCKED",
            EventKind::LoginFail => "LOGIN_FAIL",
            EventKind::ProofFail => "PROOF_FAIL",
            EventKind::MaliciousLockoutAttempt => "MALICIOUS_LOCKOUT_ATTEMPT",
            EventKind::AccountLocked => "ACCOUNT_LOCKED",
            EventKind::LoginSuccess => "LOGIN_SUCCESS",
            EventKind::GlobalPanic => "GLOBAL_PANIC",
            EventKind::AdminUnlock => "ADMIN_UNLOCK",
            EventKind::PanicReset => "PANIC_RESET",
            EventKind::SystemError => "SYSTEM_ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "LOGIN_BLOCKED" => EventKind::LoginBlocked,
            "LOGIN_FAIL" => EventKind::LoginFail,
            "PROOF_FAIL" => EventKind::ProofFail,
            "MALICIOUS_LOCKOUT_ATTEMPT" => EventKind::MaliciousLockoutAttempt,
            "ACCOUNT_LOCKED" => EventKind::AccountLocked,
            "LOGIN_SUCCESS" => EventKind::LoginSuccess,
            "GLOBAL_PANIC" => EventKind::GlobalPanic,
            "ADMIN_UNLOCK" => EventKind::AdminUnlock,
            "PANIC_RESET" => EventKind::PanicReset,
            "SYSTEM_ERROR" => EventKind::SystemError,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub at: DateTime<Utc>,
    pub identity: String,
    pub kind: EventKind,
    pub detail: String,
    pub session_id: String,
}

impl SecurityEvent {
    pub fn new(
        at: DateTime<Utc>,
        identity: &str,
        kind: EventKind,
        detail: impl Into<String>,
        session_id: Option<&str>,
    ) -> Self {
        Self {
            at,
            identity: identity.to_string(),
            kind,
            detail: detail.into(),
            session_id: session_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(NO_SESSION)
                .to_string(),
        }
    }
}

#[derive(Error, Debug)]
#[error("security log write failed: {0}")]
pub struct AuditError(pub String);

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: SecurityEvent) -> Result<(), AuditError>;
}

/// Bounded in-memory log.
#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: SecurityEvent) -> Result<(), AuditError> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        if events.len() > LOG_CAPACITY {
            events.drain(..LOG_TRIM);
        }
        Ok(())
    }
}
