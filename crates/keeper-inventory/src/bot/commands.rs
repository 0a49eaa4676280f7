//! Command parsing for free-text chat input
//!
//! Classification only: nothing here touches the store or the session.

use crate::error::{InventoryError, Result};

/// Prefixes of the one-line direct commands
pub const DIRECT_PREFIXES: [char; 3] = ['+', '-', '='];

/// Parsed command from user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `+<key>,<location>`
    Add { key: String, location: String },
    /// `-<key>`
    DeleteAll { key: String },
    /// `=<key>,<location>`
    Move { key: String, location: String },
    /// Any other text is a key to look up
    Search { key: String },
    /// Greeting and main menu
    Start,
    /// Back to the main menu
    Menu,
    /// Abort whatever is pending
    Cancel,
    /// Enter the step-by-step add flow
    AddFlow,
    /// Enter history lookup mode
    Logs,
    /// Show help
    Help,
}

/// True when `text` starts like a direct `+`, `-` or `=` command
pub fn has_direct_prefix(text: &str) -> bool {
    text.trim_start().starts_with(DIRECT_PREFIXES)
}

fn split_pair(rest: &str, usage: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = rest.split(',').map(str::trim).collect();
    match parts.as_slice() {
        [key, location] if !key.is_empty() && !location.is_empty() => {
            Ok(((*key).to_string(), (*location).to_string()))
        }
        _ => Err(InventoryError::Parse(format!("Expected {usage}"))),
    }
}

impl Command {
    /// Parse a command from user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.is_empty() {
            return Err(InventoryError::Parse("Empty input".to_string()));
        }

        if let Some(rest) = input.strip_prefix('+') {
            let (key, location) = split_pair(rest, "+<key>,<location>")?;
            return Ok(Command::Add { key, location });
        }

        if let Some(rest) = input.strip_prefix('-') {
            let key = rest.trim();
            if key.is_empty() {
                return Err(InventoryError::Parse("Expected -<key>".to_string()));
            }
            return Ok(Command::DeleteAll {
                key: key.to_string(),
            });
        }

        if let Some(rest) = input.strip_prefix('=') {
            let (key, location) = split_pair(rest, "=<key>,<new location>")?;
            return Ok(Command::Move { key, location });
        }

        let Some(rest) = input.strip_prefix('/') else {
            return Ok(Command::Search {
                key: input.to_string(),
            });
        };

        // Telegram appends @botname to commands in group chats
        let cmd = rest
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default()
            .to_lowercase();

        match cmd.as_str() {
            "start" => Ok(Command::Start),
            "menu" => Ok(Command::Menu),
            "cancel" | "stop" => Ok(Command::Cancel),
            "add" => Ok(Command::AddFlow),
            "logs" | "history" => Ok(Command::Logs),
            "help" | "h" | "?" => Ok(Command::Help),
            "" => Err(InventoryError::Parse("Empty command".to_string())),
            _ => Err(InventoryError::Parse(format!("Unknown command: /{cmd}"))),
        }
    }

    /// Get help text for all commands
    pub fn help_text() -> &'static str {
        r"Spring inventory

Quick commands:
  <key>               find where a spring is stored
  +<key>,<shelf>      add a spring to a shelf
  -<key>              remove every spring with this key
  =<key>,<shelf>      move a spring to another shelf

Menus:
  /add      add springs one after another
  /logs     show the history of a key
  /menu     main menu
  /cancel   abort the current step
  /help     this message

Several springs may share a key; you will be asked which one you mean."
    }

    /// Get a short description of the command
    pub fn description(&self) -> &'static str {
        match self {
            Command::Add { .. } => "Add a spring",
            Command::DeleteAll { .. } => "Remove all springs with a key",
            Command::Move { .. } => "Move a spring",
            Command::Search { .. } => "Find a spring",
            Command::Start => "Start",
            Command::Menu => "Main menu",
            Command::Cancel => "Cancel",
            Command::AddFlow => "Add springs step by step",
            Command::Logs => "Show history",
            Command::Help => "Show help",
        }
    }
}
