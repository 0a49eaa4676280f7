//! Per-user conversation state
//!
//! Sessions live in memory only. They are created on first contact and
//! cleared on cancel, on flow completion or on return to the menu; nothing
//! expires them on a timer.

use crate::error::{InventoryError, Result};
use crate::repository::InventoryRecord;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Sub-steps of the add flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddStep {
    AwaitingKey,
    AwaitingLocation { key: String },
    AwaitingConfirmation { key: String, location: String },
}

/// What the user wants to do with the duplicate they are about to pick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingChoice {
    DeleteOne,
    /// `target` is known when the move came from `=key,location`
    MoveOne { target: Option<String> },
    RenameOne,
}

/// Conversation mode of one sender
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Adding(AddStep),
    /// Awaiting a new shelf for `record`
    Editing { record: InventoryRecord },
    /// Awaiting a new key for `record`
    AwaitingNewKey { record: InventoryRecord },
    /// Several records share `key`
    Disambiguating {
        key: String,
        choice: Option<PendingChoice>,
    },
    /// Awaiting a key to show its history
    Logs,
}

impl SessionState {
    /// Short name for logs and audit details
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Adding(_) => "adding",
            Self::Editing { .. } => "editing",
            Self::AwaitingNewKey { .. } => "renaming",
            Self::Disambiguating { .. } => "disambiguating",
            Self::Logs => "logs",
        }
    }

    /// Flows that get first claim on free text
    pub fn owns_free_text(&self) -> bool {
        matches!(
            self,
            Self::Adding(_) | Self::Editing { .. } | Self::AwaitingNewKey { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct UserSession {
    pub user_id: String,
    pub state: SessionState,
    /// Matches of the last ambiguous search, by key
    pub search_results: HashMap<String, Vec<InventoryRecord>>,
}

impl UserSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: SessionState::Idle,
            search_results: HashMap::new(),
        }
    }

    /// Nothing pending and nothing cached
    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle && self.search_results.is_empty()
    }

    /// Drop every pending field and return to idle
    pub fn clear(&mut self) {
        self.state = SessionState::Idle;
        self.search_results.clear();
    }

    pub fn cache_matches(&mut self, key: impl Into<String>, matches: Vec<InventoryRecord>) {
        self.search_results.insert(key.into(), matches);
    }

    pub fn cached_matches(&self, key: &str) -> Option<&[InventoryRecord]> {
        self.search_results.get(key).map(Vec::as_slice)
    }
}

pub trait SessionStorage: Send + Sync {
    fn get(&self, user_id: &str) -> Option<UserSession>;
    fn set(&self, user_id: &str, session: UserSession) -> Result<()>;
}

pub struct InMemoryStorage {
    sessions: Arc<RwLock<HashMap<String, UserSession>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStorage for InMemoryStorage {
    fn get(&self, user_id: &str) -> Option<UserSession> {
        self.sessions.read().ok()?.get(user_id).cloned()
    }

    fn set(&self, user_id: &str, session: UserSession) -> Result<()> {
        self.sessions
            .write()
            .map_err(|e| InventoryError::Other(format!("Lock error: {e}")))?
            .insert(user_id.to_string(), session);
        Ok(())
    }
}

/// Hands out copies of sessions and stores them back.
///
/// The storage lock is held only inside each call, never across an await.
pub struct SessionManager {
    storage: Box<dyn SessionStorage>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            storage: Box::new(InMemoryStorage::new()),
        }
    }

    pub fn get_or_create(&self, user_id: &str) -> Result<UserSession> {
        if let Some(session) = self.storage.get(user_id) {
            return Ok(session);
        }

        let session = UserSession::new(user_id);
        self.storage.set(user_id, session.clone())?;
        Ok(session)
    }

    pub fn get(&self, user_id: &str) -> Option<UserSession> {
        self.storage.get(user_id)
    }

    pub fn update(&self, user_id: &str, session: UserSession) -> Result<()> {
        self.storage.set(user_id, session)
    }
}
