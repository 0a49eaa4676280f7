//! Conversational inventory bot
//!
//! This module turns chat messages and button presses into inventory
//! operations.
//!
//! # Features
//!
//! - **Quick commands**: `+key,shelf`, `-key`, `=key,shelf`, or a bare key
//! - **Step-by-step flows**: bulk add with a shelf picker, move, rename
//! - **Duplicates**: several springs may share a key; the bot asks which one
//! - **History**: every change is written to the audit log
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_inventory::bot::{BotConfig, ConversationController, InboundEvent};
//!
//! let controller = ConversationController::in_memory(BotConfig::default());
//! let reply = controller.handle(InboundEvent::text(actor, "+42, A1")).await;
//! println!("{}", reply.text);
//! ```

pub mod callback;
pub mod commands;
pub mod controller;
pub mod reply;
pub mod session;

use crate::error::{InventoryError, Result};

pub use callback::{CallbackAction, KeyRef, MenuItem, PickOp, RecordOp};
pub use commands::Command;
pub use controller::{ConversationController, InboundEvent};
pub use reply::{Button, Keyboard, Reply};
pub use session::{AddStep, PendingChoice, SessionManager, SessionState, UserSession};

/// Configuration for the inventory bot
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Welcome message
    pub welcome_message: String,
    /// Shelf codes offered by the shelf picker
    pub shelves: Vec<String>,
    /// Buttons per shelf picker row
    pub shelf_columns: usize,
    /// Maximum history entries shown for a key
    pub history_limit: usize,
}

impl Default for BotConfig {
    fn default() -> Self {
        let shelves = ["A", "B", "C"]
            .iter()
            .flat_map(|row| (1..=3).map(move |n| format!("{row}{n}")))
            .collect();

        Self {
            welcome_message: "Hi! Send a spring key and I will find it. /help for more."
                .to_string(),
            shelves,
            shelf_columns: 3,
            history_limit: 10,
        }
    }
}

impl BotConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::builder().with_env_shelves().build()
    }

    /// Create a builder
    pub fn builder() -> BotConfigBuilder {
        BotConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.shelves.is_empty() {
            return Err(InventoryError::Config("at least one shelf is required".to_string()));
        }
        let too_long = |shelf: &&String| {
            CallbackAction::Shelf((*shelf).clone()).encode().len() > callback::MAX_TOKEN_BYTES
        };
        if let Some(shelf) = self.shelves.iter().find(too_long) {
            return Err(InventoryError::Config(format!("shelf code too long: {shelf}")));
        }
        if self.shelf_columns == 0 {
            return Err(InventoryError::Config("shelf_columns must be greater than 0".to_string()));
        }
        if self.history_limit == 0 {
            return Err(InventoryError::Config("history_limit must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for BotConfig
#[derive(Debug, Default)]
pub struct BotConfigBuilder {
    welcome_message: Option<String>,
    shelves: Option<Vec<String>>,
    shelf_columns: Option<usize>,
    history_limit: Option<usize>,
}

impl BotConfigBuilder {
    /// Set welcome message
    pub fn welcome_message(mut self, msg: impl Into<String>) -> Self {
        self.welcome_message = Some(msg.into());
        self
    }

    /// Set the shelf codes offered by the picker
    pub fn shelves<I, S>(mut self, shelves: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.shelves = Some(
            shelves
                .into_iter()
                .map(|s| crate::repository::normalize_location(s.as_ref()))
                .filter(|s| !s.is_empty())
                .collect(),
        );
        self
    }

    /// Load shelves from the comma-separated `KEEPER_SHELVES` variable
    pub fn with_env_shelves(self) -> Self {
        match std::env::var("KEEPER_SHELVES") {
            Ok(list) if !list.trim().is_empty() => {
                let shelves: Vec<String> = list.split(',').map(str::to_string).collect();
                self.shelves(shelves)
            }
            _ => self,
        }
    }

    /// Set buttons per shelf picker row
    pub fn shelf_columns(mut self, columns: usize) -> Self {
        self.shelf_columns = Some(columns);
        self
    }

    /// Set max history entries
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<BotConfig> {
        let defaults = BotConfig::default();
        let config = BotConfig {
            welcome_message: self.welcome_message.unwrap_or(defaults.welcome_message),
            shelves: self.shelves.unwrap_or(defaults.shelves),
            shelf_columns: self.shelf_columns.unwrap_or(defaults.shelf_columns),
            history_limit: self.history_limit.unwrap_or(defaults.history_limit),
        };
        config.validate()?;
        Ok(config)
    }
}
