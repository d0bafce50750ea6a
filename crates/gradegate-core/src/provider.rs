//! Collaborators the guard calls out to: where records come from and who
//! hears about suspicious activity.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed record for {identity}: {reason}")]
    Malformed { identity: String, reason: String },
}

/// Everything the guard knows about one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub identity: String,
    /// The true credential. Never leaves the guard.
    pub credential: String,
    /// Expected secondary proof (e.g. seat number); empty when none is on file.
    #[serde(default)]
    pub secondary: String,
    /// Fields the guard passes through without interpreting.
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// A [`Record`] with the credential and secondary proof stripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profile {
    pub identity: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl Record {
    pub fn into_profile(self) -> Profile {
        Profile {
            identity: self.identity,
            fields: self.fields,
        }
    }

    /// Compare the submitted credential. Both sides are trimmed strings.
    pub fn credential_matches(&self, submitted: &str) -> bool {
        self.credential.trim() == submitted.trim()
    }

    /// A secondary proof is only valid when one is on file.
    pub fn secondary_matches(&self, submitted: &str) -> bool {
        let expected = self.secondary.trim();
        !expected.is_empty() && expected == submitted.trim()
    }
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn find(&self, identity: &str) -> Result<Option<Record>, ProviderError>;
}

/// Operator alerting. Implementations swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, subject: &str, detail: &str);
}

/// Map-backed provider for embedding and tests.
#[derive(Default)]
pub struct MemoryProvider {
    records: Mutex<HashMap<String, Record>>,
}

impl MemoryProvider {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: Mutex::new(
                records
                    .into_iter()
                    .map(|r| (r.identity.clone(), r))
                    .collect(),
            ),
        }
    }

    pub fn insert(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.identity.clone(), record);
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn find(&self, identity: &str) -> Result<Option<Record>, ProviderError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned())
    }
}
