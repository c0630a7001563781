//! Append-only log of user-visible events (commands and notifications).

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{domain::UserId, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Start,
    Last,
    Revoke,
    Help,
    Unknown,
    NotifyText,
    NotifyPhoto,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Last => "last",
            Self::Revoke => "revoke",
            Self::Help => "help",
            Self::Unknown => "unknown",
            Self::NotifyText => "notify_text",
            Self::NotifyPhoto => "notify_photo",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
    pub event: AuditKind,
}

impl AuditEvent {
    pub fn new(user_id: UserId, event: AuditKind) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.0,
            event,
        }
    }

    /// `unix<TAB>rfc3339<TAB>user<TAB>event`, the historical plain format.
    fn to_line(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.timestamp.timestamp(),
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%z"),
            self.user_id,
            self.event.as_str()
        )
    }
}

/// Clones share one lock, so lines from the poller and the HTTP handlers
/// never interleave.
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    json: bool,
    lock: Arc<Mutex<()>>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: Some(path.into()),
            json,
            lock: Arc::default(),
        }
    }

    /// Logger that drops every event.
    pub fn disabled() -> Self {
        Self {
            path: None,
            json: false,
            lock: Arc::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write(&self, event: &AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut line = if self.json {
            serde_json::to_string(event)?
        } else {
            event.to_line()
        };
        line.push('\n');

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Best-effort write: failures are logged and otherwise ignored.
    pub fn record(&self, user_id: UserId, kind: AuditKind) {
        if let Err(e) = self.write(&AuditEvent::new(user_id, kind)) {
            tracing::warn!(error = %e, event = kind.as_str(), "audit log write failed");
        }
    }
}
