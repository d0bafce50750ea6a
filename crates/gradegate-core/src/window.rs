//! Optional opening hours for the whole service.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("unrecognised time '{0}' (expected 'YYYY-MM-DD HH:MM' or RFC 3339)")]
    BadTime(String),
    #[error("close time {close} is not after open time {open}")]
    Inverted {
        open: DateTime<Utc>,
        close: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "at", rename_all = "camelCase")]
pub enum WindowStatus {
    NotYetOpen(DateTime<Utc>),
    Open,
    Closed(DateTime<Utc>),
}

/// Open/close bounds; either may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceWindow {
    pub open_at: Option<DateTime<Utc>>,
    pub close_at: Option<DateTime<Utc>>,
}

impl ServiceWindow {
    pub fn new(
        open_at: Option<DateTime<Utc>>,
        close_at: Option<DateTime<Utc>>,
    ) -> Result<Self, WindowError> {
        if let (Some(open), Some(close)) = (open_at, close_at) {
            if close <= open {
                return Err(WindowError::Inverted { open, close });
            }
        }
        Ok(Self { open_at, close_at })
    }

    /// Build from the textual form; empty strings mean "unbounded".
    pub fn parse(open: &str, close: &str) -> Result<Self, WindowError> {
        Self::new(parse_time(open)?, parse_time(close)?)
    }

    pub fn status(&self, now: DateTime<Utc>) -> WindowStatus {
        match (self.open_at, self.close_at) {
            (Some(open), _) if now < open => WindowStatus::NotYetOpen(open),
            (_, Some(close)) if now > close => WindowStatus::Closed(close),
            _ => WindowStatus::Open,
        }
    }
}

/// `YYYY-MM-DD HH:MM` (taken as UTC) or RFC 3339. Blank is `None`.
pub fn parse_time(s: &str) -> Result<Option<DateTime<Utc>>, WindowError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .map(|t| Some(t.and_utc()))
        .map_err(|_| WindowError::BadTime(s.to_string()))
}
