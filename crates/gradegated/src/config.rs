use std::path::PathBuf;
use std::time::Duration;

use gradegate_core::window::WindowError;
use gradegate_core::{BreakerSettings, GuardConfig, ServiceWindow};

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite roster database.
    pub db_path: PathBuf,
    /// How long identity counters and locks live (seconds).
    pub lockout_secs: u64,
    /// Length of the global failure window (seconds).
    pub global_window_secs: u64,
    /// Failures within one window that trip the global panic.
    pub global_fail_limit: u64,
    /// How long the global panic halts all logins (seconds).
    pub global_panic_secs: u64,
    /// Lifetime of an issued challenge (seconds).
    pub challenge_ttl_secs: u64,
    /// Where alerts are addressed. Empty disables the contact line.
    pub admin_contact: String,
    /// Service opens at this time (`YYYY-MM-DD HH:MM` or RFC 3339); empty = always.
    pub open_time: String,
    /// Service closes at this time; empty = never.
    pub close_time: String,
    /// Interval between sweeps of expired cache entries (seconds).
    pub purge_interval_secs: u64,
    /// Whether the daemon is running on the session bus (development mode).
    /// Administrative UID checks are skipped on the session bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `GRADEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("gradegate");

        let db_path = std::env::var("GRADEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("roster.db"));

        Self {
            db_path,
            lockout_secs: env_u64("GRADEGATE_LOCKOUT_SECS", 600),
            global_window_secs: env_u64("GRADEGATE_GLOBAL_WINDOW_SECS", 60),
            global_fail_limit: env_u64("GRADEGATE_GLOBAL_FAIL_LIMIT", 120),
            global_panic_secs: env_u64("GRADEGATE_GLOBAL_PANIC_SECS", 180),
            challenge_ttl_secs: env_u64("GRADEGATE_CHALLENGE_TTL_SECS", 600),
            admin_contact: std::env::var("GRADEGATE_ADMIN_CONTACT").unwrap_or_default(),
            open_time: std::env::var("GRADEGATE_OPEN_TIME").unwrap_or_default(),
            close_time: std::env::var("GRADEGATE_CLOSE_TIME").unwrap_or_default(),
            purge_interval_secs: env_u64("GRADEGATE_PURGE_INTERVAL_SECS", 300).max(1),
            session_bus: std::env::var("GRADEGATE_SESSION_BUS").is_ok(),
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            lockout_duration: Duration::from_secs(self.lockout_secs),
            breaker: BreakerSettings {
                threshold: self.global_fail_limit.max(1),
                window: Duration::from_secs(self.global_window_secs),
                panic_duration: Duration::from_secs(self.global_panic_secs),
            },
            challenge_ttl: Duration::from_secs(self.challenge_ttl_secs),
        }
    }

    pub fn service_window(&self) -> Result<ServiceWindow, WindowError> {
        ServiceWindow::parse(&self.open_time, &self.close_time)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
