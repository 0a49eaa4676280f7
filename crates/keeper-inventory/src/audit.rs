//! Append-only audit log
//!
//! Recording is best-effort: an unreachable audit table is logged and
//! otherwise ignored so it never blocks an inventory operation.

use crate::error::Result;
use crate::repository::TIMESTAMP_FORMAT;
use crate::store::TableStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Column names of the audit table
pub const AUDIT_HEADER: [&str; 5] = [
    "timestamp",
    "userId",
    "username",
    "actionDescription",
    "relatedKey",
];

/// Username written when the chat user has none
pub const DEFAULT_USERNAME: &str = "unknown";

/// Kind of action recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Add,
    Delete,
    DeleteAll,
    Move,
    Rename,
    Search,
    History,
    Cancel,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "delete",
            Self::DeleteAll => "delete_all",
            Self::Move => "move",
            Self::Rename => "rename",
            Self::Search => "search",
            Self::History => "history",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "add" => Ok(Self::Add),
            "delete" => Ok(Self::Delete),
            "delete_all" => Ok(Self::DeleteAll),
            "move" => Ok(Self::Move),
            "rename" => Ok(Self::Rename),
            "search" => Ok(Self::Search),
            "history" => Ok(Self::History),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// Who performed an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub username: Option<String>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, username: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username,
        }
    }

    /// Username or the placeholder
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(DEFAULT_USERNAME)
    }
}

/// One audit log row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub username: Option<String>,
    /// `None` when the stored description does not start with a known kind
    pub action: Option<AuditAction>,
    pub details: String,
    pub related_key: Option<String>,
}

impl AuditLogEntry {
    fn to_cells(&self) -> Vec<String> {
        vec![
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            self.user_id.clone(),
            self.username.clone().unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
            self.description(),
            self.related_key.clone().unwrap_or_default(),
        ]
    }

    fn from_cells(cells: &[String]) -> Option<Self> {
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or_default();

        let timestamp = NaiveDateTime::parse_from_str(cell(0), TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();
        let username = Some(cell(2))
            .filter(|u| !u.is_empty() && *u != DEFAULT_USERNAME)
            .map(str::to_string);

        let description = cell(3);
        let (action, details) = match description.split_once(": ") {
            Some((kind, details)) => match kind.parse::<AuditAction>() {
                Ok(action) => (Some(action), details.to_string()),
                Err(_) => (None, description.to_string()),
            },
            None => match description.parse::<AuditAction>() {
                Ok(action) => (Some(action), String::new()),
                Err(_) => (None, description.to_string()),
            },
        };

        Some(Self {
            timestamp,
            user_id: cell(1).to_string(),
            username,
            action,
            details,
            related_key: Some(cell(4)).filter(|k| !k.is_empty()).map(str::to_string),
        })
    }

    /// `"<kind>: <details>"` as stored in the actionDescription column
    pub fn description(&self) -> String {
        let kind = self.action.map_or("note", |a| a.as_str());
        if self.details.is_empty() {
            kind.to_string()
        } else {
            format!("{kind}: {}", self.details)
        }
    }
}

/// Best-effort recorder over the audit table
#[derive(Clone)]
pub struct AuditLogger {
    table: Arc<dyn TableStore>,
}

impl AuditLogger {
    /// Create a logger over the given table
    pub fn new(table: Arc<dyn TableStore>) -> Self {
        Self { table }
    }

    /// Append one entry; failures are logged and swallowed
    pub async fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        details: impl Into<String>,
        related_key: Option<&str>,
    ) {
        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            user_id: actor.user_id.clone(),
            username: actor.username.clone(),
            action: Some(action),
            details: details.into(),
            related_key: related_key.map(str::to_string),
        };

        if let Err(e) = self.table.append_row(entry.to_cells()).await {
            warn!(
                error = %e,
                action = %action,
                user_id = %actor.user_id,
                "Failed to write audit entry"
            );
        }
    }

    /// Entries related to `key`, newest first
    pub async fn find_by_key(&self, key: &str) -> Result<Vec<AuditLogEntry>> {
        let key = key.trim();
        let mut entries: Vec<_> = self
            .table
            .read_rows()
            .await?
            .iter()
            .rev()
            .filter_map(|cells| AuditLogEntry::from_cells(cells))
            .filter(|entry| entry.related_key.as_deref() == Some(key))
            .collect();

        // Stable sort over reversed rows: same-second entries stay newest first.
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }
}
