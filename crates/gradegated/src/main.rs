use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gradegate_core::{Collaborators, MemoryGuard, MemoryStore};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod notifier;
mod store;

use config::Config;
use dbus_interface::{AppState, GuardService};
use notifier::AlertNotifier;
use store::RosterStore;

const BUS_NAME: &str = "org.gradegate.Guard1";
const OBJECT_PATH: &str = "/org/gradegate/Guard1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("gradegated starting");

    let config = Config::from_env();
    let window = config
        .service_window()
        .context("invalid GRADEGATE_OPEN_TIME / GRADEGATE_CLOSE_TIME")?;

    let roster = RosterStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open roster at {}", config.db_path.display()))?;
    let roster_size = roster.count().await.unwrap_or(0);
    tracing::info!(db = %config.db_path.display(), roster_size, "roster opened");

    let roster_arc = Arc::new(roster.clone());
    let collaborators = Collaborators {
        provider: roster_arc.clone(),
        notifier: Arc::new(AlertNotifier::new(&config.admin_contact)),
        audit: roster_arc,
    };
    let (guard, state_store, challenge_store) =
        MemoryGuard::in_memory(config.guard_config(), collaborators);

    tracing::info!(
        lockout_secs = config.lockout_secs,
        global_fail_limit = config.global_fail_limit,
        global_window_secs = config.global_window_secs,
        global_panic_secs = config.global_panic_secs,
        "login guard configured"
    );

    let purge = tokio::spawn(purge_loop(
        Duration::from_secs(config.purge_interval_secs),
        state_store,
        challenge_store,
    ));

    let session_bus = config.session_bus;
    let state = Arc::new(AppState {
        config,
        guard,
        roster,
        window,
    });
    let service = GuardService { state };

    let builder = if session_bus {
        tracing::warn!("running on the session bus; administrative checks are disabled");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "gradegated ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    purge.abort();
    tracing::info!("gradegated shutting down");

    Ok(())
}

/// Periodically drop expired counters, locks and challenge tokens.
async fn purge_loop(every: Duration, state: Arc<MemoryStore>, challenges: Arc<MemoryStore>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let purged = state.purge_expired() + challenges.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, live = state.len() + challenges.len(), "expired entries purged");
        }
    }
}
