use std::sync::Arc;

use chrono::Utc;
use gradegate_core::{Attempt, MemoryGuard, ServiceWindow, WindowStatus};
use zbus::interface;

use crate::config::Config;
use crate::store::{RosterEntry, RosterStore};

/// Shared state accessible by D-Bus method handlers.
///
/// The guard and roster synchronise internally, so handlers share this
/// read-only behind an `Arc` without an outer lock.
pub struct AppState {
    pub config: Config,
    pub guard: MemoryGuard,
    pub roster: RosterStore,
    pub window: ServiceWindow,
}

/// D-Bus interface for the gradegate login guard.
///
/// Bus name: org.gradegate.Guard1
/// Object path: /org/gradegate/Guard1
pub struct GuardService {
    pub state: Arc<AppState>,
}

/// Retrieve the UID of the D-Bus peer identified by `sender_str` (a unique bus name).
async fn get_caller_uid(sender_str: &str, conn: &zbus::Connection) -> zbus::fdo::Result<u32> {
    let dbus_proxy = zbus::fdo::DBusProxy::new(conn)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    let bus_name = zbus::names::BusName::try_from(sender_str)
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    dbus_proxy
        .get_connection_unix_user(bus_name)
        .await
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Empty D-Bus strings stand in for absent optional arguments.
fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn window_error(status: WindowStatus) -> Option<String> {
    match status {
        WindowStatus::Open => None,
        WindowStatus::NotYetOpen(at) => Some(format!(
            "the inquiry service is not open yet; it opens at {}",
            at.format("%Y-%m-%d %H:%M UTC")
        )),
        WindowStatus::Closed(at) => Some(format!(
            "the inquiry service closed at {}",
            at.format("%Y-%m-%d %H:%M UTC")
        )),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

impl GuardService {
    /// Administrative calls need root on the system bus. Skipped on the session bus.
    async fn require_admin(
        &self,
        header: &zbus::message::Header<'_>,
        conn: &zbus::Connection,
        action: &str,
    ) -> zbus::fdo::Result<()> {
        if self.state.config.session_bus {
            return Ok(());
        }
        let sender = header
            .sender()
            .ok_or_else(|| zbus::fdo::Error::Failed("no sender in message".to_string()))?;
        let caller_uid = get_caller_uid(sender.as_str(), conn).await?;
        if caller_uid != 0 {
            tracing::warn!(caller_uid, action, "administrative call refused");
            return Err(zbus::fdo::Error::AccessDenied(format!(
                "caller is not permitted to {action}"
            )));
        }
        Ok(())
    }

    fn require_open(&self) -> zbus::fdo::Result<()> {
        match window_error(self.state.window.status(Utc::now())) {
            None => Ok(()),
            Some(msg) => Err(zbus::fdo::Error::Failed(msg)),
        }
    }
}

#[interface(name = "org.gradegate.Guard1")]
impl GuardService {
    /// Issue a proof-of-humanity challenge. Returns `{token, prompt}` as JSON.
    async fn issue_challenge(&self) -> zbus::fdo::Result<String> {
        self.require_open()?;
        to_json(&self.state.guard.issue_challenge())
    }

    /// Run one login attempt. Empty `secondary_proof` / `session_id` mean absent.
    ///
    /// Returns the outcome as JSON; rejections are normal replies, not D-Bus errors.
    async fn login(
        &self,
        identity: &str,
        credential: &str,
        proof_token: &str,
        proof_answer: &str,
        secondary_proof: &str,
        session_id: &str,
    ) -> zbus::fdo::Result<String> {
        self.require_open()?;
        let attempt = Attempt {
            identity: identity.to_string(),
            credential: credential.to_string(),
            proof_token: proof_token.to_string(),
            proof_answer: proof_answer.to_string(),
            secondary_proof: optional(secondary_proof),
            session_id: optional(session_id),
        };
        let outcome = self.state.guard.authenticate(&attempt).await;
        tracing::info!(
            identity = identity.trim(),
            success = outcome.success,
            reason = ?outcome.reason,
            locked = outcome.locked,
            "login complete"
        );
        to_json(&outcome)
    }

    /// Clear an identity's lock and failure counter.
    async fn unlock(
        &self,
        identity: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<bool> {
        self.require_admin(&header, conn, "unlock identities").await?;
        Ok(self.state.guard.clear_identity(identity).await)
    }

    /// Lower the global panic flag early.
    async fn reset_panic(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<bool> {
        self.require_admin(&header, conn, "reset the global panic").await?;
        Ok(self.state.guard.reset_panic().await)
    }

    /// Lockout state of one identity as JSON.
    async fn identity_state(
        &self,
        identity: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<String> {
        self.require_admin(&header, conn, "inspect identities").await?;
        to_json(&self.state.guard.identity_snapshot(identity))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let roster_size = self.state.roster.count().await.unwrap_or(0);
        let guard = self.state.guard.status();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "rosterSize": roster_size,
            "window": self.state.window.status(Utc::now()),
            "guard": guard,
        })
        .to_string())
    }

    /// Upsert roster entries from a JSON array. Returns the import summary as JSON.
    async fn import_roster(
        &self,
        entries_json: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<String> {
        self.require_admin(&header, conn, "import the roster").await?;
        let entries: Vec<RosterEntry> = serde_json::from_str(entries_json)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let summary = self.state.roster.import(entries).await.map_err(|e| {
            tracing::error!(error = %e, "roster import failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        to_json(&summary)
    }

    /// Most recent security events, newest first, as JSON.
    async fn recent_events(
        &self,
        limit: u32,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::fdo::Result<String> {
        self.require_admin(&header, conn, "read the security log").await?;
        let events = self
            .state
            .roster
            .recent_events(limit as usize)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        to_json(&events)
    }
}
