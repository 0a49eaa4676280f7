//! Outbound replies and their button layouts

use super::callback::{CallbackAction, MenuItem, PickOp, RecordOp};
use crate::repository::InventoryRecord;
use serde::{Deserialize, Serialize};

/// One button: visible label plus the token sent back when pressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, action: &CallbackAction) -> Self {
        Self {
            label: label.into(),
            token: action.encode(),
        }
    }
}

/// Named button layouts, built from state rather than by hand at call sites
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    MainMenu,
    ShelfPicker { shelves: Vec<String>, columns: usize },
    /// Shown while the add flow waits for the next key
    AddLoop,
    ConfirmAdd,
    RecordActions { key: String },
    Disambiguation { key: String },
    MatchPicker {
        op: PickOp,
        key: String,
        matches: Vec<InventoryRecord>,
    },
    CancelOnly,
}

fn cancel_row() -> Vec<Button> {
    vec![Button::new("✖ Cancel", &CallbackAction::Menu(MenuItem::Cancel))]
}

fn menu_button() -> Button {
    Button::new("☰ Menu", &CallbackAction::Menu(MenuItem::Main))
}

impl Keyboard {
    /// Rows of buttons, top to bottom
    pub fn rows(&self) -> Vec<Vec<Button>> {
        match self {
            Keyboard::MainMenu => vec![
                vec![
                    Button::new("➕ Add", &CallbackAction::Menu(MenuItem::Add)),
                    Button::new("📜 History", &CallbackAction::Menu(MenuItem::Logs)),
                ],
                vec![Button::new("❓ Help", &CallbackAction::Menu(MenuItem::Help))],
            ],
            Keyboard::ShelfPicker { shelves, columns } => {
                let mut rows: Vec<Vec<Button>> = shelves
                    .chunks((*columns).max(1))
                    .map(|chunk| {
                        chunk
                            .iter()
                            .map(|shelf| Button::new(shelf, &CallbackAction::Shelf(shelf.clone())))
                            .collect()
                    })
                    .collect();
                rows.push(cancel_row());
                rows
            }
            Keyboard::AddLoop => vec![vec![
                Button::new("✔ Done", &CallbackAction::AddDone),
                Button::new("✖ Cancel", &CallbackAction::Menu(MenuItem::Cancel)),
            ]],
            Keyboard::ConfirmAdd => vec![
                vec![
                    Button::new("✔ Add", &CallbackAction::AddConfirm),
                    Button::new("↩ Other shelf", &CallbackAction::AddReject),
                ],
                cancel_row(),
            ],
            Keyboard::RecordActions { key } => {
                let op = |op: RecordOp| CallbackAction::Record {
                    op,
                    key: key.as_str().into(),
                };
                vec![
                    vec![
                        Button::new("🗑 Delete", &op(RecordOp::Delete)),
                        Button::new("📦 Move", &op(RecordOp::Move)),
                    ],
                    vec![
                        Button::new("✏ Rename", &op(RecordOp::Rename)),
                        Button::new("📜 History", &op(RecordOp::History)),
                    ],
                    vec![menu_button()],
                ]
            }
            Keyboard::Disambiguation { key } => {
                let choose = |op: PickOp| CallbackAction::Choose {
                    op,
                    key: key.as_str().into(),
                };
                vec![
                    vec![Button::new(
                        "🗑 Delete all",
                        &CallbackAction::DeleteAll { key: key.as_str().into() },
                    )],
                    vec![
                        Button::new("🗑 Delete one", &choose(PickOp::Delete)),
                        Button::new("📦 Move one", &choose(PickOp::Move)),
                    ],
                    vec![Button::new("✏ Rename one", &choose(PickOp::Rename))],
                    vec![menu_button()],
                ]
            }
            Keyboard::MatchPicker { op, key, matches } => {
                let mut rows: Vec<Vec<Button>> = matches
                    .iter()
                    .enumerate()
                    .map(|(index, record)| {
                        let action = CallbackAction::Pick {
                            op: *op,
                            index,
                            key: key.as_str().into(),
                        };
                        vec![Button::new(format!("#{} · {}", index + 1, record.location), &action)]
                    })
                    .collect();
                rows.push(cancel_row());
                rows
            }
            Keyboard::CancelOnly => vec![cancel_row()],
        }
    }
}

/// What the transport should send back to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    /// Create a plain text reply
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    /// Attach a button layout
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    /// Flattened button rows, empty without a keyboard
    pub fn buttons(&self) -> Vec<Vec<Button>> {
        self.keyboard.as_ref().map(Keyboard::rows).unwrap_or_default()
    }

    /// Find a button token by its label, for scripted interaction
    pub fn token_for(&self, label: &str) -> Option<String> {
        self.buttons()
            .into_iter()
            .flatten()
            .find(|b| b.label.contains(label))
            .map(|b| b.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RowRef;

    fn record(row: usize, location: &str) -> InventoryRecord {
        InventoryRecord {
            row: RowRef::new(row),
            key: "42".to_string(),
            location: location.to_string(),
            added_at: None,
            last_action: None,
        }
    }

    #[test]
    fn test_shelf_picker_chunks_and_cancels() {
        let keyboard = Keyboard::ShelfPicker {
            shelves: ["A1", "A2", "A3", "B1"].iter().map(ToString::to_string).collect(),
            columns: 3,
        };
        let rows = keyboard.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 3);
        assert_eq!(rows[1][0].token, "shelf:B1");
        assert_eq!(rows[2][0].token, "menu:cancel");
    }

    #[test]
    fn test_match_picker_one_button_per_match() {
        let keyboard = Keyboard::MatchPicker {
            op: PickOp::Delete,
            key: "42".to_string(),
            matches: vec![record(2, "A1"), record(5, "C3")],
        };
        let rows = keyboard.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0].token, "pick:delete:1:42");
        assert!(rows[1][0].label.contains("C3"));
    }

    #[test]
    fn test_token_for_label() {
        let reply = Reply::text("found").with_keyboard(Keyboard::Disambiguation {
            key: "42".to_string(),
        });
        assert_eq!(reply.token_for("Delete all").as_deref(), Some("dis:all:42"));
        assert_eq!(reply.token_for("Move one").as_deref(), Some("dis:move:42"));
        assert!(Reply::text("plain").buttons().is_empty());
    }
}
