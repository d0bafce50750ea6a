//! Login guard for the grade inquiry service.
//!
//! Per-identity progressive lockout with a secondary-proof challenge, a
//! global circuit breaker against distributed brute force, and single-use
//! proof-of-humanity tokens, all kept in TTL stores injected by the host.

pub mod audit;
pub mod breaker;
pub mod challenge;
pub mod clock;
pub mod guard;
pub mod lockout;
pub mod provider;
pub mod store;
pub mod window;

pub use audit::{AuditError, AuditSink, EventKind, MemoryAuditLog, SecurityEvent};
pub use breaker::{BreakerSettings, BreakerSnapshot};
pub use challenge::Challenge;
pub use clock::{Clock, ManualClock, SystemClock};
pub use guard::{
    Attempt, AuthOutcome, Collaborators, GuardConfig, GuardStatus, LoginGuard, MemoryGuard, Reason,
};
pub use lockout::{IdentitySnapshot, IdentityStage};
pub use provider::{DataProvider, MemoryProvider, Notifier, Profile, ProviderError, Record};
pub use store::{KvStore, MemoryStore};
pub use window::{ServiceWindow, WindowStatus};
