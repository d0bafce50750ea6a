use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gradegate_core::audit::{AuditError, AuditSink, EventKind, SecurityEvent, LOG_CAPACITY, LOG_TRIM};
use gradegate_core::{DataProvider, ProviderError, Record};
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("invalid fields JSON for {identity}: {source}")]
    Fields {
        identity: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("roster entry {0} has an empty identity")]
    EmptyIdentity(usize),
}

/// One roster row as supplied for import. A missing credential is generated.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub identity: String,
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub secondary: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub imported: usize,
    pub generated_credentials: usize,
}

/// SQLite-backed roster and security log.
///
/// `students` holds one row per identity with its credential, secondary
/// proof and opaque display fields (JSON). `security_log` is bounded: once
/// it exceeds [`LOG_CAPACITY`] rows the oldest [`LOG_TRIM`] are dropped.
#[derive(Clone)]
pub struct RosterStore {
    conn: Connection,
}

impl RosterStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if db_path != Path::new(":memory:") {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS students (
                     id TEXT PRIMARY KEY,
                     credential TEXT NOT NULL,
                     secondary TEXT NOT NULL DEFAULT '',
                     fields TEXT NOT NULL DEFAULT '{}',
                     updated_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS security_log (
                     seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     at TEXT NOT NULL,
                     identity TEXT NOT NULL,
                     kind TEXT NOT NULL,
                     detail TEXT NOT NULL,
                     session_id TEXT NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Upsert roster entries in one transaction.
    pub async fn import(&self, entries: Vec<RosterEntry>) -> Result<ImportSummary, StoreError> {
        let mut rows = Vec::with_capacity(entries.len());
        let mut generated = 0;
        for (i, entry) in entries.into_iter().enumerate() {
            let identity = entry.identity.trim().to_string();
            if identity.is_empty() {
                return Err(StoreError::EmptyIdentity(i));
            }
            let credential = match entry.credential.filter(|c| !c.trim().is_empty()) {
                Some(c) => c.trim().to_string(),
                None => {
                    generated += 1;
                    generate_credential()
                }
            };
            let fields = serde_json::to_string(&entry.fields).map_err(|source| {
                StoreError::Fields {
                    identity: identity.clone(),
                    source,
                }
            })?;
            let secondary = entry.secondary.unwrap_or_default().trim().to_string();
            rows.push((identity, credential, secondary, fields));
        }

        let imported = rows.len();
        let updated_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO students (id, credential, secondary, fields, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(id) DO UPDATE SET
                             credential = excluded.credential,
                             secondary = excluded.secondary,
                             fields = excluded.fields,
                             updated_at = excluded.updated_at",
                    )?;
                    for (id, credential, secondary, fields) in &rows {
                        stmt.execute(rusqlite::params![id, credential, secondary, fields, updated_at])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::info!(imported, generated, "roster imported");
        Ok(ImportSummary {
            imported,
            generated_credentials: generated,
        })
    }

    /// Look up one identity.
    pub async fn get(&self, identity: &str) -> Result<Option<Record>, StoreError> {
        let id = identity.to_string();
        let row: Option<(String, String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, credential, secondary, fields FROM students WHERE id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                let row = rows.next().transpose()?;
                Ok(row)
            })
            .await?;

        let Some((identity, credential, secondary, fields)) = row else {
            return Ok(None);
        };
        let fields = serde_json::from_str(&fields).map_err(|source| StoreError::Fields {
            identity: identity.clone(),
            source,
        })?;
        Ok(Some(Record {
            identity,
            credential,
            secondary,
            fields,
        }))
    }

    /// Count roster entries.
    pub async fn count(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Append a security event, trimming the log when it grows past capacity.
    pub async fn append_event(&self, event: SecurityEvent) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO security_log (at, identity, kind, detail, session_id)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        event.at.to_rfc3339(),
                        event.identity,
                        event.kind.as_str(),
                        event.detail,
                        event.session_id
                    ],
                )?;
                let rows: usize =
                    conn.query_row("SELECT COUNT(*) FROM security_log", [], |row| row.get(0))?;
                if rows > LOG_CAPACITY {
                    conn.execute(
                        "DELETE FROM security_log WHERE seq IN
                             (SELECT seq FROM security_log ORDER BY seq LIMIT ?1)",
                        [LOG_TRIM],
                    )?;
                }
                Ok(())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Most recent events, newest first. Rows with an unknown kind are skipped.
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<SecurityEvent>, StoreError> {
        let rows: Vec<(String, String, String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT at, identity, kind, detail, session_id
                     FROM security_log ORDER BY seq DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(at, identity, kind, detail, session_id)| {
                Some(SecurityEvent {
                    at: DateTime::parse_from_rfc3339(&at).ok()?.with_timezone(&Utc),
                    identity,
                    kind: EventKind::parse(&kind)?,
                    detail,
                    session_id,
                })
            })
            .collect())
    }
}

#[async_trait]
impl DataProvider for RosterStore {
    async fn find(&self, identity: &str) -> Result<Option<Record>, ProviderError> {
        self.get(identity).await.map_err(|e| match e {
            StoreError::Fields { identity, source } => ProviderError::Malformed {
                identity,
                reason: source.to_string(),
            },
            other => ProviderError::Unavailable(other.to_string()),
        })
    }
}

#[async_trait]
impl AuditSink for RosterStore {
    async fn record(&self, event: SecurityEvent) -> Result<(), AuditError> {
        self.append_event(event)
            .await
            .map_err(|e| AuditError(e.to_string()))
    }
}

/// Random 5-digit credential.
fn generate_credential() -> String {
    rand::thread_rng().gen_range(10000..=99999u32).to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
