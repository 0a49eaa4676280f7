//! Button callback tokens
//!
//! Tokens are colon-delimited, `action:param...`. A key is always the last
//! parameter and is split off with `splitn`, so keys may contain colons.
//! Telegram caps callback data at 64 bytes, so a key that does not fit is
//! carried as `#<digest>` and resolved again when the button is pressed.

use crate::error::{InventoryError, Result};

/// Longest token a chat transport accepts
pub const MAX_TOKEN_BYTES: usize = 64;

const DIGEST_MARK: char = '#';

/// FNV-1a over the key bytes. Stable across builds, so buttons sent before a
/// restart still resolve.
pub fn key_digest(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// A key as carried by a button token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    Literal(String),
    Digest(u64),
}

impl KeyRef {
    /// Whether this reference names `key`
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == key,
            Self::Digest(digest) => *digest == key_digest(key),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        if s.is_empty() {
            return None;
        }
        match s.strip_prefix(DIGEST_MARK) {
            Some(hex) => u64::from_str_radix(hex, 16).ok().map(Self::Digest),
            None => Some(Self::Literal(s.to_string())),
        }
    }

    fn append_to(&self, prefix: String) -> String {
        match self {
            Self::Literal(key)
                if !key.starts_with(DIGEST_MARK) && prefix.len() + key.len() <= MAX_TOKEN_BYTES =>
            {
                prefix + key
            }
            Self::Literal(key) => format!("{prefix}{DIGEST_MARK}{:016x}", key_digest(key)),
            Self::Digest(digest) => format!("{prefix}{DIGEST_MARK}{digest:016x}"),
        }
    }
}

impl From<&str> for KeyRef {
    fn from(key: &str) -> Self {
        Self::Literal(key.to_string())
    }
}

impl From<String> for KeyRef {
    fn from(key: String) -> Self {
        Self::Literal(key)
    }
}

/// Main menu entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Main,
    Add,
    Logs,
    Help,
    Cancel,
}

/// Actions offered on a single found record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOp {
    Delete,
    Move,
    Rename,
    History,
}

/// Actions that need one of several duplicates picked first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickOp {
    Delete,
    Move,
    Rename,
}

impl PickOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rename => "rename",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "delete" => Some(Self::Delete),
            "move" => Some(Self::Move),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }
}

impl RecordOp {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Move => "move",
            Self::Rename => "rename",
            Self::History => "history",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "history" => Some(Self::History),
            other => PickOp::parse(other).map(Self::from),
        }
    }
}

impl From<PickOp> for RecordOp {
    fn from(op: PickOp) -> Self {
        match op {
            PickOp::Delete => Self::Delete,
            PickOp::Move => Self::Move,
            PickOp::Rename => Self::Rename,
        }
    }
}

/// Decoded button press
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// `menu:<item>`
    Menu(MenuItem),
    /// `shelf:<location>`
    Shelf(String),
    /// `add:yes`
    AddConfirm,
    /// `add:no`
    AddReject,
    /// `add:done`
    AddDone,
    /// `rec:<op>:<key>`
    Record { op: RecordOp, key: KeyRef },
    /// `dis:all:<key>`
    DeleteAll { key: KeyRef },
    /// `dis:<op>:<key>`
    Choose { op: PickOp, key: KeyRef },
    /// `pick:<op>:<index>:<key>`
    Pick {
        op: PickOp,
        index: usize,
        key: KeyRef,
    },
}

fn unknown(token: &str) -> InventoryError {
    InventoryError::State(format!("unknown button: {token}"))
}

impl CallbackAction {
    /// Decode a token. Unknown tokens are stale buttons, not parse errors.
    pub fn parse(token: &str) -> Result<Self> {
        let (action, rest) = token.split_once(':').ok_or_else(|| unknown(token))?;

        let action = match action {
            "menu" => Self::Menu(match rest {
                "main" => MenuItem::Main,
                "add" => MenuItem::Add,
                "logs" => MenuItem::Logs,
                "help" => MenuItem::Help,
                "cancel" => MenuItem::Cancel,
                _ => return Err(unknown(token)),
            }),
            "shelf" if !rest.is_empty() => Self::Shelf(rest.to_string()),
            "add" => match rest {
                "yes" => Self::AddConfirm,
                "no" => Self::AddReject,
                "done" => Self::AddDone,
                _ => return Err(unknown(token)),
            },
            "rec" => {
                let (op, key) = rest.split_once(':').ok_or_else(|| unknown(token))?;
                let op = RecordOp::parse(op).ok_or_else(|| unknown(token))?;
                let key = KeyRef::parse(key).ok_or_else(|| unknown(token))?;
                Self::Record { op, key }
            }
            "dis" => {
                let (op, key) = rest.split_once(':').ok_or_else(|| unknown(token))?;
                let key = KeyRef::parse(key).ok_or_else(|| unknown(token))?;
                if op == "all" {
                    Self::DeleteAll { key }
                } else {
                    let op = PickOp::parse(op).ok_or_else(|| unknown(token))?;
                    Self::Choose { op, key }
                }
            }
            "pick" => {
                let mut parts = rest.splitn(3, ':');
                let op = parts.next().and_then(PickOp::parse);
                let index = parts.next().and_then(|i| i.parse().ok());
                let key = parts.next().and_then(KeyRef::parse);
                match (op, index, key) {
                    (Some(op), Some(index), Some(key)) => Self::Pick { op, index, key },
                    _ => return Err(unknown(token)),
                }
            }
            _ => return Err(unknown(token)),
        };

        Ok(action)
    }

    /// Encode back into a token
    pub fn encode(&self) -> String {
        match self {
            Self::Menu(item) => {
                let item = match item {
                    MenuItem::Main => "main",
                    MenuItem::Add => "add",
                    MenuItem::Logs => "logs",
                    MenuItem::Help => "help",
                    MenuItem::Cancel => "cancel",
                };
                format!("menu:{item}")
            }
            Self::Shelf(location) => format!("shelf:{location}"),
            Self::AddConfirm => "add:yes".to_string(),
            Self::AddReject => "add:no".to_string(),
            Self::AddDone => "add:done".to_string(),
            Self::Record { op, key } => key.append_to(format!("rec:{}:", op.as_str())),
            Self::DeleteAll { key } => key.append_to("dis:all:".to_string()),
            Self::Choose { op, key } => key.append_to(format!("dis:{}:", op.as_str())),
            Self::Pick { op, index, key } => {
                key.append_to(format!("pick:{}:{index}:", op.as_str()))
            }
        }
    }
}
