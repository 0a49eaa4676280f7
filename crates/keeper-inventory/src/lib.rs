//! Spring inventory keeper
//!
//! A chat-driven tracker for springs stored on shelves. The inventory and
//! an append-only audit log live in two spreadsheet tabs; users talk to the
//! bot with quick commands (`+key,shelf`, `-key`, `=key,shelf`, a bare key)
//! or walk through button-driven flows.
//!
//! # Layout
//!
//! - [`store`]: row-oriented tables, in memory or on Google Sheets
//! - [`repository`]: inventory records on top of a table
//! - [`audit`]: best-effort action log
//! - [`bot`]: command parsing, sessions and the conversation state machine
//! - [`platforms`]: chat transports
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_inventory::audit::Actor;
//! use keeper_inventory::bot::{BotConfig, ConversationController, InboundEvent};
//!
//! let controller = ConversationController::in_memory(BotConfig::default());
//! let actor = Actor::new("42", Some("ivan".to_string()));
//! let reply = controller.handle(InboundEvent::text(actor, "+A-17, b2")).await;
//! assert!(reply.text.contains("B2"));
//! ```

pub mod audit;
pub mod bot;
pub mod config;
pub mod error;
pub mod platforms;
pub mod repository;
pub mod store;

pub use audit::{Actor, AuditAction, AuditLogEntry, AuditLogger};
pub use bot::{BotConfig, ConversationController, InboundEvent, Reply};
pub use config::SheetsConfig;
pub use error::{InventoryError, Result};
pub use repository::{InventoryRecord, InventoryRepository};
pub use store::{MemoryTable, RowRef, SheetsClient, SheetsTable, TableStore};
