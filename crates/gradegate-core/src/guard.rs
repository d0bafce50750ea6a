//! The login guard.
//!
//! [`LoginGuard::authenticate`] runs one attempt to a terminal decision,
//! checking in order: global panic, identity lock, proof of humanity,
//! identity lookup, credential, secondary proof. Rejections are values, not
//! errors; callers branch on [`AuthOutcome::reason`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditSink, EventKind, SecurityEvent};
use crate::breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker};
use crate::challenge::{Challenge, ChallengeStore, DEFAULT_CHALLENGE_TTL};
use crate::clock::{Clock, SystemClock};
use crate::lockout::{FailureVerdict, IdentityLockout, IdentitySnapshot, IdentityStage};
use crate::provider::{DataProvider, Notifier, Profile};
use crate::store::{KvStore, MemoryStore};

/// Tunables. Stage thresholds and wait hints are fixed; see [`IdentityStage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardConfig {
    /// Lifetime of identity counters and locks.
    pub lockout_duration: Duration,
    pub breaker: BreakerSettings,
    pub challenge_ttl: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            lockout_duration: Duration::from_secs(600),
            breaker: BreakerSettings::default(),
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }
}

/// One authentication request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub identity: String,
    pub credential: String,
    pub proof_token: String,
    pub proof_answer: String,
    #[serde(default)]
    pub secondary_proof: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    GlobalThrottle,
    Locked,
    ProofInvalid,
    IdentityNotFound,
    CredentialInvalid,
    SecondaryProofInvalid,
    SystemError,
    MalformedRequest,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::GlobalThrottle => "GLOBAL_THROTTLE",
            Reason::Locked => "LOCKED",
            Reason::ProofInvalid => "PROOF_INVALID",
            Reason::IdentityNotFound => "IDENTITY_NOT_FOUND",
            Reason::CredentialInvalid => "CREDENTIAL_INVALID",
            Reason::SecondaryProofInvalid => "SECONDARY_PROOF_INVALID",
            Reason::SystemError => "SYSTEM_ERROR",
            Reason::MalformedRequest => "MALFORMED_REQUEST",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one attempt, shaped for the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    pub message: String,
    pub locked: bool,
    pub require_secondary_proof: bool,
    /// Advisory only; nothing server-side enforces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
}

impl AuthOutcome {
    fn success(profile: Profile) -> Self {
        Self {
            success: true,
            reason: None,
            message: "Access granted.".to_string(),
            locked: false,
            require_secondary_proof: false,
            wait_seconds: None,
            profile: Some(profile),
        }
    }

    fn rejected(reason: Reason, message: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            message: message.into(),
            locked: false,
            require_secondary_proof: false,
            wait_seconds: None,
            profile: None,
        }
    }

    fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    fn from_verdict(reason: Reason, verdict: &FailureVerdict) -> Self {
        let message = match verdict.stage {
            IdentityStage::NeedsSecondary => {
                "To protect your account, enter your secondary proof (seat number) to continue."
            }
            IdentityStage::Delay10 => "Please wait 10 seconds before trying again. 3 attempts left.",
            IdentityStage::Delay60 => "Please wait 1 minute before trying again. 2 attempts left.",
            IdentityStage::Delay300 => {
                "Please wait 5 minutes before trying again. This is the last attempt."
            }
            IdentityStage::Locked => "Too many failed attempts. The account is now locked.",
            IdentityStage::Clear | IdentityStage::Warned => "Identity or credential is incorrect.",
        };
        Self {
            locked: verdict.locked,
            require_secondary_proof: verdict.require_secondary_proof,
            wait_seconds: verdict.wait_seconds,
            ..Self::rejected(reason, message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardStatus {
    pub breaker: BreakerSnapshot,
    pub lockout_secs: u64,
    pub panic_secs: u64,
}

/// External services the guard depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn DataProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

/// Guard backed by in-process stores on the wall clock.
pub type MemoryGuard = LoginGuard<Arc<MemoryStore<SystemClock>>, SystemClock>;

pub struct LoginGuard<S, C> {
    config: GuardConfig,
    lockout: IdentityLockout<S, C>,
    breaker: CircuitBreaker<S>,
    challenges: ChallengeStore<S>,
    clock: C,
    collaborators: Collaborators,
}

impl MemoryGuard {
    /// Returns the guard together with its state and challenge stores, so the
    /// host can purge expired entries.
    pub fn in_memory(
        config: GuardConfig,
        collaborators: Collaborators,
    ) -> (Self, Arc<MemoryStore>, Arc<MemoryStore>) {
        let state = Arc::new(MemoryStore::new());
        let challenges = Arc::new(MemoryStore::new());
        let guard = Self::new(
            config,
            state.clone(),
            challenges.clone(),
            SystemClock,
            collaborators,
        );
        (guard, state, challenges)
    }
}

impl<S: KvStore + Clone, C: Clock + Clone> LoginGuard<S, C> {
    /// `state` holds identity and global counters; `challenge_state` holds
    /// proof tokens. They are separate namespaces and may be separate stores.
    pub fn new(
        config: GuardConfig,
        state: S,
        challenge_state: S,
        clock: C,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            lockout: IdentityLockout::new(state.clone(), clock.clone(), config.lockout_duration),
            breaker: CircuitBreaker::new(state, config.breaker),
            challenges: ChallengeStore::new(challenge_state, config.challenge_ttl),
            clock,
            config,
            collaborators,
        }
    }
}

impl<S: KvStore, C: Clock> LoginGuard<S, C> {
    pub fn issue_challenge(&self) -> Challenge {
        self.challenges.issue()
    }

    pub async fn authenticate(&self, attempt: &Attempt) -> AuthOutcome {
        let session = attempt.session_id.as_deref();

        if self.breaker.is_tripped() {
            return AuthOutcome::rejected(Reason::GlobalThrottle, self.panic_message());
        }

        let identity = attempt.identity.trim();
        if identity.is_empty() {
            return AuthOutcome::rejected(Reason::MalformedRequest, "An identity is required.");
        }

        if let Some(until) = self.lockout.locked_until(identity) {
            self.log(
                identity,
                EventKind::LoginBlocked,
                format!("locked until {}", until.to_rfc3339()),
                session,
            )
            .await;
            return AuthOutcome::rejected(
                Reason::Locked,
                "Too many failed attempts. The account is locked; please try again later.",
            )
            .locked();
        }

        if !self
            .challenges
            .verify(&attempt.proof_token, &attempt.proof_answer)
        {
            self.count_global_failure().await;
            self.log(identity, EventKind::ProofFail, "challenge answer rejected", session)
                .await;
            return AuthOutcome::rejected(
                Reason::ProofInvalid,
                "The verification answer is wrong or has expired.",
            );
        }

        let record = match self.collaborators.provider.find(identity).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(identity, error = %e, "identity lookup failed");
                self.log(identity, EventKind::SystemError, e.to_string(), session)
                    .await;
                return AuthOutcome::rejected(
                    Reason::SystemError,
                    "The system is busy. Please try again later.",
                );
            }
        };

        let Some(record) = record else {
            self.count_global_failure().await;
            let verdict = self.lockout.record_failure(identity);
            self.after_failure(identity, &verdict, "identity not found", session)
                .await;
            return AuthOutcome::from_verdict(Reason::IdentityNotFound, &verdict);
        };

        if !record.credential_matches(&attempt.credential) {
            self.count_global_failure().await;

            let prior = self.lockout.failure_count(identity);
            let secondary = attempt
                .secondary_proof
                .as_deref()
                .filter(|s| !s.trim().is_empty());
            if prior >= 1 {
                if let Some(secondary) = secondary {
                    if !record.secondary_matches(secondary) {
                        return self.malicious_lockout(identity, prior, session).await;
                    }
                }
            }

            let verdict = self.lockout.record_failure(identity);
            self.after_failure(identity, &verdict, "wrong credential", session)
                .await;
            return AuthOutcome::from_verdict(Reason::CredentialInvalid, &verdict);
        }

        self.lockout.reset(identity);
        self.log(identity, EventKind::LoginSuccess, "access granted", session)
            .await;
        tracing::info!(identity, "login succeeded");
        AuthOutcome::success(record.into_profile())
    }

    // ── Operator actions ──────────────────────────────────────────────────────

    /// Drop an identity's lock and failure counter.
    pub async fn clear_identity(&self, identity: &str) -> bool {
        let identity = identity.trim();
        let cleared = self.lockout.clear(identity);
        tracing::info!(identity, cleared, "identity cleared by operator");
        self.log(
            identity,
            EventKind::AdminUnlock,
            "unlocked by administrator",
            Some("ADMIN_ACTION"),
        )
        .await;
        cleared
    }

    /// Lower the global panic flag before its TTL lapses.
    pub async fn reset_panic(&self) -> bool {
        let was_active = self.breaker.reset();
        tracing::info!(was_active, "global panic reset by operator");
        self.log(
            "SYSTEM",
            EventKind::PanicReset,
            "global panic reset by administrator",
            Some("ADMIN_ACTION"),
        )
        .await;
        was_active
    }

    pub fn identity_snapshot(&self, identity: &str) -> IdentitySnapshot {
        self.lockout.snapshot(identity.trim())
    }

    pub fn status(&self) -> GuardStatus {
        GuardStatus {
            breaker: self.breaker.snapshot(),
            lockout_secs: self.config.lockout_duration.as_secs(),
            panic_secs: self.config.breaker.panic_duration.as_secs(),
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn malicious_lockout(
        &self,
        identity: &str,
        prior: u64,
        session: Option<&str>,
    ) -> AuthOutcome {
        let until = self.lockout.lock_now(identity);
        tracing::warn!(
            identity,
            prior_failures = prior,
            locked_until = %until,
            "secondary proof mismatch; suspected malicious lockout, locking identity"
        );
        self.log(
            identity,
            EventKind::MaliciousLockoutAttempt,
            "wrong secondary proof",
            session,
        )
        .await;
        self.collaborators.notifier.notify(
            "Suspected malicious lockout",
            &format!(
                "Identity {identity} supplied a wrong secondary proof and has been locked \
                 until {}. Session: {}",
                until.to_rfc3339(),
                session.unwrap_or(crate::audit::NO_SESSION)
            ),
        );
        AuthOutcome::rejected(
            Reason::SecondaryProofInvalid,
            "Secondary proof did not match. The account has been locked for its protection.",
        )
        .locked()
    }

    async fn after_failure(
        &self,
        identity: &str,
        verdict: &FailureVerdict,
        detail: &str,
        session: Option<&str>,
    ) {
        self.log(identity, EventKind::LoginFail, detail, session).await;
        if verdict.locked {
            let detail = format!("failed {} times (progressive lockout)", verdict.failure_count);
            self.log(identity, EventKind::AccountLocked, detail.clone(), session)
                .await;
            self.collaborators.notifier.notify(
                "Account locked",
                &format!("Identity {identity} was locked: {detail}."),
            );
        }
    }

    async fn count_global_failure(&self) {
        let event = self.breaker.record_failure();
        if !event.tripped_now {
            return;
        }
        let settings = self.breaker.settings();
        let detail = format!(
            "{} failures within {}s (threshold {}); logins halted for {}s",
            event.failures,
            settings.window.as_secs(),
            settings.threshold,
            settings.panic_duration.as_secs()
        );
        self.log("SYSTEM", EventKind::GlobalPanic, detail.clone(), Some("GLOBAL"))
            .await;
        self.collaborators
            .notifier
            .notify("Global login panic (possible brute force)", &detail);
    }

    fn panic_message(&self) -> String {
        let minutes = self.config.breaker.panic_duration.as_secs().div_ceil(60).max(1);
        format!(
            "Unusual traffic detected. Logins are temporarily suspended; \
             please try again in {minutes} minute(s)."
        )
    }

    async fn log(
        &self,
        identity: &str,
        kind: EventKind,
        detail: impl Into<String>,
        session: Option<&str>,
    ) {
        let event = SecurityEvent::new(self.clock.now(), identity, kind, detail, session);
        if let Err(e) = self.collaborators.audit.record(event).await {
            tracing::warn!(error = %e, kind = kind.as_str(), "security event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::clock::ManualClock;
    use crate::provider::{MemoryProvider, ProviderError, Record};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    type TestStore = Arc<MemoryStore<ManualClock>>;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        fn subjects(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, subject: &str, detail: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), detail.to_string()));
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl DataProvider for BrokenProvider {
        async fn find(&self, _identity: &str) -> Result<Option<Record>, ProviderError> {
            Err(ProviderError::Unavailable("sheet offline".into()))
        }
    }

    struct Harness {
        guard: LoginGuard<TestStore, ManualClock>,
        clock: ManualClock,
        challenges: TestStore,
        notifier: Arc<RecordingNotifier>,
        audit: Arc<MemoryAuditLog>,
    }

    fn student() -> Record {
        Record {
            identity: "S001".into(),
            credential: "4821".into(),
            secondary: "17".into(),
            fields: BTreeMap::from([("midterm".to_string(), serde_json::json!(88))]),
        }
    }

    fn harness_with(config: GuardConfig, provider: Arc<dyn DataProvider>) -> Harness {
        let clock = ManualClock::default();
        let state = Arc::new(MemoryStore::with_clock(clock.clone()));
        let challenges = Arc::new(MemoryStore::with_clock(clock.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let audit = Arc::new(MemoryAuditLog::new());
        let guard = LoginGuard::new(
            config,
            state,
            challenges.clone(),
            clock.clone(),
            Collaborators {
                provider,
                notifier: notifier.clone(),
                audit: audit.clone(),
            },
        );
        Harness {
            guard,
            clock,
            challenges,
            notifier,
            audit,
        }
    }

    fn harness() -> Harness {
        harness_with(
            GuardConfig::default(),
            Arc::new(MemoryProvider::new([student()])),
        )
    }

    impl Harness {
        /// Build an attempt carrying a freshly solved challenge.
        fn attempt(&self, identity: &str, credential: &str, secondary: Option<&str>) -> Attempt {
            let challenge = self.guard.issue_challenge();
            let answer = self
                .challenges
                .get(&format!("CAPTCHA_{}", challenge.token))
                .expect("challenge stored");
            Attempt {
                identity: identity.into(),
                credential: credential.into(),
                proof_token: challenge.token,
                proof_answer: answer,
                secondary_proof: secondary.map(str::to_string),
                session_id: Some("sess-1".into()),
            }
        }

        async fn login(&self, identity: &str, credential: &str, secondary: Option<&str>) -> AuthOutcome {
            let attempt = self.attempt(identity, credential, secondary);
            self.guard.authenticate(&attempt).await
        }
    }

    #[tokio::test]
    async fn test_full_lockout_scenario() {
        let h = harness();

        let r1 = h.login("S001", "0000", None).await;
        assert!(!r1.success);
        assert_eq!(r1.reason, Some(Reason::CredentialInvalid));
        assert!(!r1.locked && !r1.require_secondary_proof);

        let r2 = h.login("S001", "0000", None).await;
        assert!(r2.require_secondary_proof);
        assert!(!r2.locked);

        let r3 = h.login("S001", "0000", Some("17")).await;
        assert_eq!(r3.wait_seconds, Some(10));
        let r4 = h.login("S001", "0000", Some("17")).await;
        assert_eq!(r4.wait_seconds, Some(60));
        let r5 = h.login("S001", "0000", Some("17")).await;
        assert_eq!(r5.wait_seconds, Some(300));
        assert!(!r5.locked);

        let r6 = h.login("S001", "0000", Some("17")).await;
        assert!(r6.locked);
        assert_eq!(r6.reason, Some(Reason::CredentialInvalid));

        let r7 = h.login("S001", "4821", Some("17")).await;
        assert_eq!(r7.reason, Some(Reason::Locked));
        assert!(r7.locked);

        assert_eq!(h.notifier.subjects(), vec!["Account locked".to_string()]);
        assert_eq!(h.audit.count(EventKind::AccountLocked), 1);
        assert_eq!(h.audit.count(EventKind::LoginBlocked), 1);
    }

    #[tokio::test]
    async fn test_five_failures_never_lock() {
        let h = harness();
        for _ in 0..5 {
            let r = h.login("S001", "0000", Some("17")).await;
            assert!(!r.locked);
        }
        assert!(h.login("S001", "4821", None).await.success);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let h = harness();
        h.login("S001", "0000", None).await;
        assert!(h.login("S001", "4821", None).await.success);
        assert_eq!(h.guard.identity_snapshot("S001").failure_count, 0);

        for _ in 0..5 {
            assert!(!h.login("S001", "0000", Some("17")).await.locked);
        }
    }

    #[tokio::test]
    async fn test_wrong_secondary_locks_immediately() {
        let h = harness();
        h.login("S001", "0000", None).await;

        let r = h.login("S001", "0000", Some("99")).await;
        assert_eq!(r.reason, Some(Reason::SecondaryProofInvalid));
        assert!(r.locked);

        let after = h.login("S001", "4821", Some("17")).await;
        assert_eq!(after.reason, Some(Reason::Locked));

        assert_eq!(
            h.notifier.subjects(),
            vec!["Suspected malicious lockout".to_string()]
        );
        assert_eq!(h.audit.count(EventKind::MaliciousLockoutAttempt), 1);
    }

    #[tokio::test]
    async fn test_secondary_ignored_on_first_failure() {
        let h = harness();
        let r = h.login("S001", "0000", Some("99")).await;
        assert_eq!(r.reason, Some(Reason::CredentialInvalid));
        assert!(!r.locked);
    }

    #[tokio::test]
    async fn test_blank_secondary_counts_as_absent() {
        let h = harness();
        h.login("S001", "0000", None).await;
        let r = h.login("S001", "0000", Some("  ")).await;
        assert_eq!(r.reason, Some(Reason::CredentialInvalid));
        assert!(r.require_secondary_proof);
    }

    #[tokio::test]
    async fn test_panic_rejects_correct_credentials() {
        let config = GuardConfig {
            breaker: BreakerSettings {
                threshold: 3,
                ..BreakerSettings::default()
            },
            ..GuardConfig::default()
        };
        let h = harness_with(config, Arc::new(MemoryProvider::new([student()])));

        for _ in 0..3 {
            h.login("OTHER", "x", None).await;
        }
        assert!(h.guard.status().breaker.panic_active);
        let failures_before = h.guard.status().breaker.failures;

        let attempt = h.attempt("S001", "4821", None);
        let r = h.guard.authenticate(&attempt).await;
        assert_eq!(r.reason, Some(Reason::GlobalThrottle));
        assert!(!r.success);

        // Not counted, and the challenge was never consumed.
        assert_eq!(h.guard.status().breaker.failures, failures_before);
        assert!(h
            .challenges
            .get(&format!("CAPTCHA_{}", attempt.proof_token))
            .is_some());
    }

    #[tokio::test]
    async fn test_panic_notifies_once_per_episode() {
        let config = GuardConfig {
            breaker: BreakerSettings {
                threshold: 2,
                ..BreakerSettings::default()
            },
            ..GuardConfig::default()
        };
        let h = harness_with(config, Arc::new(MemoryProvider::new([student()])));

        // Proof failures still count globally while the flag is down.
        for _ in 0..4 {
            let attempt = Attempt {
                identity: "S001".into(),
                proof_token: "bogus".into(),
                ..Attempt::default()
            };
            h.guard.authenticate(&attempt).await;
        }
        let panics = h
            .notifier
            .subjects()
            .into_iter()
            .filter(|s| s.starts_with("Global login panic"))
            .count();
        assert_eq!(panics, 1);
        assert_eq!(h.audit.count(EventKind::GlobalPanic), 1);

        // Next episode after the flag lapses notifies again.
        h.clock.advance(Duration::from_secs(180));
        assert!(!h.guard.status().breaker.panic_active);
        for _ in 0..2 {
            h.login("S001", "0000", None).await;
        }
        assert_eq!(h.audit.count(EventKind::GlobalPanic), 2);
    }

    #[tokio::test]
    async fn test_unknown_identity_counts_like_wrong_credential() {
        let h = harness();
        let r = h.login("ZZZZZ", "1234", None).await;
        assert!(!r.success);
        assert_eq!(r.reason, Some(Reason::IdentityNotFound));
        assert_eq!(h.guard.identity_snapshot("ZZZZZ").failure_count, 1);

        let r = h.login("ZZZZZ", "1234", Some("1")).await;
        assert!(r.require_secondary_proof);
        assert_eq!(r.reason, Some(Reason::IdentityNotFound));

        for _ in 0..4 {
            h.login("ZZZZZ", "1234", Some("1")).await;
        }
        assert_eq!(
            h.guard.identity_snapshot("ZZZZZ").stage,
            IdentityStage::Locked
        );
    }

    #[tokio::test]
    async fn test_proof_failure_skips_identity_counter() {
        let h = harness();
        let attempt = Attempt {
            identity: "S001".into(),
            credential: "0000".into(),
            proof_token: h.guard.issue_challenge().token,
            proof_answer: "not a number".into(),
            ..Attempt::default()
        };
        let r = h.guard.authenticate(&attempt).await;
        assert_eq!(r.reason, Some(Reason::ProofInvalid));
        assert_eq!(h.guard.identity_snapshot("S001").failure_count, 0);
        assert_eq!(h.guard.status().breaker.failures, 1);
    }

    #[tokio::test]
    async fn test_challenge_is_single_use() {
        let h = harness();
        let attempt = h.attempt("S001", "4821", None);
        assert!(h.guard.authenticate(&attempt).await.success);
        let replay = h.guard.authenticate(&attempt).await;
        assert_eq!(replay.reason, Some(Reason::ProofInvalid));
    }

    #[tokio::test]
    async fn test_operator_clear_round_trip() {
        let h = harness();
        for _ in 0..6 {
            h.login("S001", "0000", Some("17")).await;
        }
        assert_eq!(h.login("S001", "4821", None).await.reason, Some(Reason::Locked));

        assert!(h.guard.clear_identity("S001").await);
        let r = h.login("S001", "4821", None).await;
        assert!(r.success);
        assert_eq!(h.audit.count(EventKind::AdminUnlock), 1);
    }

    #[tokio::test]
    async fn test_operator_reset_panic() {
        let config = GuardConfig {
            breaker: BreakerSettings {
                threshold: 1,
                ..BreakerSettings::default()
            },
            ..GuardConfig::default()
        };
        let h = harness_with(config, Arc::new(MemoryProvider::new([student()])));
        h.login("S001", "0000", None).await;
        assert_eq!(
            h.login("S001", "4821", None).await.reason,
            Some(Reason::GlobalThrottle)
        );

        assert!(h.guard.reset_panic().await);
        assert!(h.login("S001", "4821", None).await.success);
    }

    #[tokio::test]
    async fn test_lock_lapses_after_lockout_duration() {
        let h = harness();
        h.login("S001", "0000", None).await;
        h.login("S001", "0000", Some("42")).await;
        assert_eq!(h.login("S001", "4821", None).await.reason, Some(Reason::Locked));

        h.clock.advance(GuardConfig::default().lockout_duration);
        assert!(h.login("S001", "4821", None).await.success);
    }

    #[tokio::test]
    async fn test_provider_failure_is_system_error_without_mutation() {
        let h = harness_with(GuardConfig::default(), Arc::new(BrokenProvider));
        let r = h.login("S001", "0000", None).await;
        assert_eq!(r.reason, Some(Reason::SystemError));
        assert_eq!(h.guard.identity_snapshot("S001").failure_count, 0);
        assert_eq!(h.guard.status().breaker.failures, 0);
        assert_eq!(h.audit.count(EventKind::SystemError), 1);
    }

    #[tokio::test]
    async fn test_identity_is_trimmed_and_required() {
        let h = harness();
        assert!(h.login("  S001 ", "4821", None).await.success);

        let r = h.login("   ", "4821", None).await;
        assert_eq!(r.reason, Some(Reason::MalformedRequest));
        assert_eq!(h.guard.status().breaker.failures, 0);
    }

    #[tokio::test]
    async fn test_success_returns_profile_without_secrets() {
        let h = harness();
        let r = h.login("S001", " 4821 ", None).await;
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["profile"]["identity"], "S001");
        assert_eq!(json["profile"]["fields"]["midterm"], 88);
        assert!(json["profile"].get("credential").is_none());
        assert!(json.get("reason").is_none());
    }

    #[tokio::test]
    async fn test_outcome_wire_shape() {
        let h = harness();
        h.login("S001", "0000", None).await;
        h.login("S001", "0000", None).await;
        let r = h.login("S001", "0000", Some("17")).await;
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["reason"], "CREDENTIAL_INVALID");
        assert_eq!(json["waitSeconds"], 10);
        assert_eq!(json["requireSecondaryProof"], false);
        assert_eq!(json["locked"], false);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_are_all_counted() {
        let h = Arc::new(harness());
        let attempts: Vec<_> = (0..5).map(|_| h.attempt("S001", "0000", None)).collect();
        let tasks: Vec<_> = attempts
            .into_iter()
            .map(|a| {
                let h = h.clone();
                tokio::spawn(async move { h.guard.authenticate(&a).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(h.guard.identity_snapshot("S001").failure_count, 5);
        assert_eq!(h.guard.status().breaker.failures, 5);
    }
}
