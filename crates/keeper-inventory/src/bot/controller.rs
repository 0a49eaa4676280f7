//! Conversation state machine
//!
//! Every inbound event is handled against a copy of the sender's session.
//! The copy is stored back only when the step succeeds, so a failed step
//! leaves the session exactly as it was and the user can retry.

use super::BotConfig;
use super::callback::{CallbackAction, KeyRef, MenuItem, PickOp, RecordOp};
use super::commands::{Command, has_direct_prefix};
use super::reply::{Keyboard, Reply};
use super::session::{AddStep, PendingChoice, SessionManager, SessionState, UserSession};
use crate::audit::{AUDIT_HEADER, Actor, AuditAction, AuditLogger};
use crate::error::{InventoryError, Result};
use crate::repository::{
    INVENTORY_HEADER, InventoryRecord, InventoryRepository, normalize_location, timestamp_now,
};
use crate::store::{MemoryTable, RowRef, TableStore};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const GENERIC_FAILURE: &str =
    "⚠️ Something went wrong talking to the inventory table. Please try again.";

/// One message or button press from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text { sender: Actor, text: String },
    Button { sender: Actor, token: String },
}

impl InboundEvent {
    pub fn text(sender: Actor, text: impl Into<String>) -> Self {
        Self::Text {
            sender,
            text: text.into(),
        }
    }

    pub fn button(sender: Actor, token: impl Into<String>) -> Self {
        Self::Button {
            sender,
            token: token.into(),
        }
    }

    pub fn sender(&self) -> &Actor {
        match self {
            Self::Text { sender, .. } | Self::Button { sender, .. } => sender,
        }
    }
}

fn stale(what: &str) -> InventoryError {
    InventoryError::State(format!("{what} has no pending step"))
}

/// Text typed while a flow is waiting for a key or a shelf
fn flow_input(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(InventoryError::Parse("Empty input".to_string()));
    }
    if has_direct_prefix(text) {
        return Err(InventoryError::Parse(
            "Finish the current step or /cancel it before using +, - or =".to_string(),
        ));
    }
    Ok(text.to_string())
}

/// The disambiguation a keyed button belongs to, with its full key
fn pending_choice(session: &UserSession, key: &KeyRef) -> Result<(String, Option<PendingChoice>)> {
    match &session.state {
        SessionState::Disambiguating { key: pending, choice } if key.matches(pending) => {
            Ok((pending.clone(), choice.clone()))
        }
        _ => Err(InventoryError::State(format!("no pending choice for {key:?}"))),
    }
}

fn choice_for(op: PickOp, target: Option<String>) -> PendingChoice {
    match op {
        PickOp::Delete => PendingChoice::DeleteOne,
        PickOp::Move => PendingChoice::MoveOne { target },
        PickOp::Rename => PendingChoice::RenameOne,
    }
}

fn format_record(record: &InventoryRecord) -> String {
    let mut text = format!("🔩 {}\n📍 Shelf: {}", record.key, record.location);
    if let Some(added) = &record.added_at {
        text.push_str(&format!("\n🕒 Added: {added}"));
    }
    if let Some(last) = &record.last_action {
        text.push_str(&format!("\n📝 Last: {last}"));
    }
    text
}

fn format_matches(matches: &[InventoryRecord]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(i, record)| match &record.added_at {
            Some(added) => format!("#{} · {} · added {added}", i + 1, record.location),
            None => format!("#{} · {}", i + 1, record.location),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn gone(record: &InventoryRecord) -> Reply {
    Reply::text(format!(
        "🔍 {} is no longer on {}. Nothing was changed.",
        record.key, record.location
    ))
    .with_keyboard(Keyboard::MainMenu)
}

/// Routes events through the session state machine
pub struct ConversationController {
    repository: InventoryRepository,
    audit: AuditLogger,
    sessions: SessionManager,
    config: BotConfig,
}

impl ConversationController {
    pub fn new(repository: InventoryRepository, audit: AuditLogger, config: BotConfig) -> Self {
        Self {
            repository,
            audit,
            sessions: SessionManager::new(),
            config,
        }
    }

    /// Build a controller over an inventory table and an audit table
    pub fn from_tables(
        inventory: Arc<dyn TableStore>,
        audit: Arc<dyn TableStore>,
        config: BotConfig,
    ) -> Self {
        Self::new(
            InventoryRepository::new(inventory),
            AuditLogger::new(audit),
            config,
        )
    }

    /// Controller over fresh in-memory tables
    pub fn in_memory(config: BotConfig) -> Self {
        Self::from_tables(
            Arc::new(MemoryTable::new(&INVENTORY_HEADER)),
            Arc::new(MemoryTable::new(&AUDIT_HEADER)),
            config,
        )
    }

    /// Current session of a user, if one was ever created
    pub fn session(&self, user_id: &str) -> Option<UserSession> {
        self.sessions.get(user_id)
    }

    /// Handle one inbound event. Never fails: errors become replies.
    pub async fn handle(&self, event: InboundEvent) -> Reply {
        let actor = event.sender().clone();
        let mut session = match self.sessions.get_or_create(&actor.user_id) {
            Ok(session) => session,
            Err(e) => return self.failure_reply(&actor, &e),
        };
        let before = session.state.name();

        let result = match &event {
            InboundEvent::Text { text, .. } => {
                self.on_text(&actor, &mut session, text.trim()).await
            }
            InboundEvent::Button { token, .. } => {
                self.on_button(&actor, &mut session, token).await
            }
        };

        match result {
            Ok(reply) => {
                debug!(
                    user_id = %actor.user_id,
                    from = before,
                    to = session.state.name(),
                    "Handled event"
                );
                if let Err(e) = self.sessions.update(&actor.user_id, session) {
                    error!(user_id = %actor.user_id, error = %e, "Failed to store session");
                }
                reply
            }
            Err(e) => self.failure_reply(&actor, &e),
        }
    }

    fn failure_reply(&self, actor: &Actor, err: &InventoryError) -> Reply {
        match err {
            InventoryError::Parse(msg) => {
                Reply::text(format!("⚠️ {msg}. Send /help for the command list."))
            }
            InventoryError::NotFound(what) => Reply::text(format!("🔍 Nothing found for {what}.")),
            InventoryError::State(reason) => {
                debug!(user_id = %actor.user_id, reason, "Ignoring stale action");
                Reply::text("Nothing to do here anymore.").with_keyboard(Keyboard::MainMenu)
            }
            other => {
                error!(user_id = %actor.user_id, error = %other, "Inventory step failed");
                Reply::text(GENERIC_FAILURE)
            }
        }
    }

    async fn on_text(&self, actor: &Actor, session: &mut UserSession, text: &str) -> Result<Reply> {
        // Slash commands work in every state
        if text.starts_with('/') {
            let command = Command::parse(text)?;
            return self.run_command(actor, session, command).await;
        }

        if session.state.owns_free_text() {
            let input = flow_input(text)?;
            return match session.state.clone() {
                SessionState::Adding(step) => self.continue_add(session, step, input),
                SessionState::Editing { record } => {
                    self.finish_move(actor, session, &record, &input).await
                }
                SessionState::AwaitingNewKey { record } => {
                    self.finish_rename(actor, session, &record, &input).await
                }
                _ => Err(stale("free text")),
            };
        }

        if session.state == SessionState::Logs && !has_direct_prefix(text) {
            return self.show_history(actor, text, Keyboard::CancelOnly).await;
        }
        let command = Command::parse(text)?;
        self.run_command(actor, session, command).await
    }

    async fn run_command(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        command: Command,
    ) -> Result<Reply> {
        debug!(user_id = %actor.user_id, command = command.description(), "Running command");
        match command {
            Command::Start => {
                session.clear();
                Ok(Reply::text(&self.config.welcome_message).with_keyboard(Keyboard::MainMenu))
            }
            Command::Menu => Ok(self.main_menu(session)),
            Command::Cancel => Ok(self.cancel(actor, session).await),
            Command::Help => {
                Ok(Reply::text(Command::help_text()).with_keyboard(Keyboard::MainMenu))
            }
            Command::AddFlow => {
                session.clear();
                session.state = SessionState::Adding(AddStep::AwaitingKey);
                Ok(Reply::text("Send the key of the spring to add.")
                    .with_keyboard(Keyboard::AddLoop))
            }
            Command::Logs => {
                session.clear();
                session.state = SessionState::Logs;
                Ok(Reply::text("Send a key to see its history.")
                    .with_keyboard(Keyboard::CancelOnly))
            }
            Command::Add { key, location } => {
                let text = self.add_record(actor, &key, &location).await?;
                Ok(Reply::text(text))
            }
            Command::DeleteAll { key } => self.delete_all(actor, &key).await,
            Command::Move { key, location } => {
                self.direct_move(actor, session, &key, &location).await
            }
            Command::Search { key } => self.search(actor, session, &key).await,
        }
    }

    async fn on_button(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        token: &str,
    ) -> Result<Reply> {
        match CallbackAction::parse(token)? {
            CallbackAction::Menu(MenuItem::Main) => Ok(self.main_menu(session)),
            CallbackAction::Menu(MenuItem::Add) => {
                self.run_command(actor, session, Command::AddFlow).await
            }
            CallbackAction::Menu(MenuItem::Logs) => {
                self.run_command(actor, session, Command::Logs).await
            }
            CallbackAction::Menu(MenuItem::Help) => {
                self.run_command(actor, session, Command::Help).await
            }
            CallbackAction::Menu(MenuItem::Cancel) => Ok(self.cancel(actor, session).await),
            CallbackAction::Shelf(location) => match session.state.clone() {
                SessionState::Adding(AddStep::AwaitingLocation { key }) => {
                    self.insert_in_loop(actor, session, &key, &location).await
                }
                SessionState::Editing { record } => {
                    self.finish_move(actor, session, &record, &location).await
                }
                _ => Err(stale("shelf button")),
            },
            CallbackAction::AddConfirm => match session.state.clone() {
                SessionState::Adding(AddStep::AwaitingConfirmation { key, location }) => {
                    self.insert_in_loop(actor, session, &key, &location).await
                }
                _ => Err(stale("confirm button")),
            },
            CallbackAction::AddReject => match session.state.clone() {
                SessionState::Adding(AddStep::AwaitingConfirmation { key, .. }) => {
                    let reply = self.shelf_prompt(&key);
                    session.state = SessionState::Adding(AddStep::AwaitingLocation { key });
                    Ok(reply)
                }
                _ => Err(stale("reject button")),
            },
            CallbackAction::AddDone => match session.state {
                SessionState::Adding(_) => {
                    session.clear();
                    Ok(Reply::text("Done adding.").with_keyboard(Keyboard::MainMenu))
                }
                _ => Err(stale("done button")),
            },
            CallbackAction::Record { op, key } => {
                let key = self.resolve_key(&key).await?;
                self.record_action(actor, session, op, &key).await
            }
            CallbackAction::DeleteAll { key } => {
                let (key, _) = pending_choice(session, &key)?;
                let reply = self.delete_all(actor, &key).await?;
                session.clear();
                Ok(reply.with_keyboard(Keyboard::MainMenu))
            }
            CallbackAction::Choose { op, key } => {
                let (key, _) = pending_choice(session, &key)?;
                let matches = session
                    .cached_matches(&key)
                    .ok_or_else(|| stale("choice button"))?
                    .to_vec();
                session.state = SessionState::Disambiguating {
                    key: key.clone(),
                    choice: Some(choice_for(op, None)),
                };
                Ok(Reply::text(format!("Which {key}?\n{}", format_matches(&matches)))
                    .with_keyboard(Keyboard::MatchPicker { op, key, matches }))
            }
            CallbackAction::Pick { op, index, key } => {
                self.pick(actor, session, op, index, &key).await
            }
        }
    }

    fn main_menu(&self, session: &mut UserSession) -> Reply {
        session.clear();
        Reply::text("Main menu. Send a key to search or pick an action.")
            .with_keyboard(Keyboard::MainMenu)
    }

    async fn cancel(&self, actor: &Actor, session: &mut UserSession) -> Reply {
        if session.is_idle() {
            return Reply::text("Nothing to cancel.").with_keyboard(Keyboard::MainMenu);
        }

        let pending = session.state.name();
        session.clear();
        self.audit
            .record(actor, AuditAction::Cancel, pending, None)
            .await;
        info!(user_id = %actor.user_id, pending, "Cancelled flow");
        Reply::text("Cancelled.").with_keyboard(Keyboard::MainMenu)
    }

    fn shelf_prompt(&self, key: &str) -> Reply {
        Reply::text(format!("Where does {key} go? Pick a shelf or type one."))
            .with_keyboard(self.shelf_picker())
    }

    fn shelf_picker(&self) -> Keyboard {
        Keyboard::ShelfPicker {
            shelves: self.config.shelves.clone(),
            columns: self.config.shelf_columns,
        }
    }

    fn continue_add(
        &self,
        session: &mut UserSession,
        step: AddStep,
        input: String,
    ) -> Result<Reply> {
        match step {
            AddStep::AwaitingKey => {
                let key = input;
                let reply = self.shelf_prompt(&key);
                session.state = SessionState::Adding(AddStep::AwaitingLocation { key });
                Ok(reply)
            }
            AddStep::AwaitingLocation { key } => {
                let location = normalize_location(&input);
                let reply = Reply::text(format!("Add {key} to {location}?"))
                    .with_keyboard(Keyboard::ConfirmAdd);
                session.state =
                    SessionState::Adding(AddStep::AwaitingConfirmation { key, location });
                Ok(reply)
            }
            AddStep::AwaitingConfirmation { .. } => Err(InventoryError::Parse(
                "Confirm with the buttons or /cancel".to_string(),
            )),
        }
    }

    async fn insert_in_loop(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        key: &str,
        location: &str,
    ) -> Result<Reply> {
        let text = self.add_record(actor, key, location).await?;
        session.state = SessionState::Adding(AddStep::AwaitingKey);
        Ok(Reply::text(format!("{text}\nSend the next key, or press Done."))
            .with_keyboard(Keyboard::AddLoop))
    }

    async fn search(&self, actor: &Actor, session: &mut UserSession, key: &str) -> Result<Reply> {
        let matches = self.repository.find_all_by_key(key).await?;
        self.audit
            .record(
                actor,
                AuditAction::Search,
                format!("{} match(es)", matches.len()),
                Some(key),
            )
            .await;

        match matches.len() {
            0 => Err(InventoryError::NotFound(key.to_string())),
            1 => {
                session.clear();
                let record = &matches[0];
                Ok(Reply::text(format_record(record)).with_keyboard(Keyboard::RecordActions {
                    key: record.key.clone(),
                }))
            }
            n => {
                session.clear();
                let text = format!(
                    "Found {n} springs with key {key}:\n{}",
                    format_matches(&matches)
                );
                session.cache_matches(key, matches);
                session.state = SessionState::Disambiguating {
                    key: key.to_string(),
                    choice: None,
                };
                Ok(Reply::text(text).with_keyboard(Keyboard::Disambiguation {
                    key: key.to_string(),
                }))
            }
        }
    }

    async fn add_record(&self, actor: &Actor, key: &str, location: &str) -> Result<String> {
        let location = normalize_location(location);
        self.repository.insert(key, &location).await?;

        let note = format!(
            "added to {location} by {} at {}",
            actor.display_name(),
            timestamp_now()
        );
        self.stamp_newest(key, &note).await;
        self.audit
            .record(actor, AuditAction::Add, format!("{key} → {location}"), Some(key))
            .await;

        Ok(format!("✅ Added {key} to {location}."))
    }

    /// Best-effort lastAction on the newest row holding `key`, i.e. the row
    /// just appended
    async fn stamp_newest(&self, key: &str, note: &str) {
        let result: Result<()> = async {
            let newest = self
                .repository
                .find_all_by_key(key)
                .await?
                .pop()
                .ok_or_else(|| InventoryError::NotFound(key.to_string()))?;
            self.repository.set_last_action_at(newest.row, note).await
        }
        .await;

        if let Err(e) = result {
            warn!(key, error = %e, "Could not write lastAction");
        }
    }

    async fn stamp_at(&self, row: RowRef, note: &str) {
        if let Err(e) = self.repository.set_last_action_at(row, note).await {
            warn!(%row, error = %e, "Could not write lastAction");
        }
    }

    async fn delete_all(&self, actor: &Actor, key: &str) -> Result<Reply> {
        let removed = self.repository.delete_all_by_key(key).await?;
        if removed == 0 {
            return Err(InventoryError::NotFound(key.to_string()));
        }

        self.audit
            .record(
                actor,
                AuditAction::DeleteAll,
                format!("removed {removed}"),
                Some(key),
            )
            .await;
        Ok(Reply::text(format!("🗑 Removed {removed} spring(s) with key {key}.")))
    }

    async fn remove_one(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        record: &InventoryRecord,
        row: RowRef,
    ) -> Result<Reply> {
        self.repository.delete_at(row).await?;
        self.audit
            .record(
                actor,
                AuditAction::Delete,
                format!("{} from {}", record.key, record.location),
                Some(&record.key),
            )
            .await;
        session.clear();
        Ok(
            Reply::text(format!("🗑 Removed {} from {}.", record.key, record.location))
                .with_keyboard(Keyboard::MainMenu),
        )
    }

    async fn direct_move(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        key: &str,
        location: &str,
    ) -> Result<Reply> {
        let mut matches = self.repository.find_all_by_key(key).await?;
        match matches.len() {
            0 => Err(InventoryError::NotFound(key.to_string())),
            1 => {
                let record = matches.remove(0);
                let text = self.relocate(actor, &record, record.row, location).await?;
                Ok(Reply::text(text))
            }
            n => {
                let target = normalize_location(location);
                session.clear();
                let keyboard = Keyboard::MatchPicker {
                    op: PickOp::Move,
                    key: key.to_string(),
                    matches: matches.clone(),
                };
                let text = format!(
                    "{n} springs share key {key}. Which one goes to {target}?\n{}",
                    format_matches(&matches)
                );
                session.cache_matches(key, matches);
                session.state = SessionState::Disambiguating {
                    key: key.to_string(),
                    choice: Some(choice_for(PickOp::Move, Some(target))),
                };
                Ok(Reply::text(text).with_keyboard(keyboard))
            }
        }
    }

    async fn relocate(
        &self,
        actor: &Actor,
        record: &InventoryRecord,
        row: RowRef,
        location: &str,
    ) -> Result<String> {
        let location = normalize_location(location);
        self.repository.update_location_at(row, &location).await?;

        let note = format!(
            "moved {} → {location} by {} at {}",
            record.location,
            actor.display_name(),
            timestamp_now()
        );
        self.stamp_at(row, &note).await;
        self.audit
            .record(
                actor,
                AuditAction::Move,
                format!("{}: {} → {location}", record.key, record.location),
                Some(&record.key),
            )
            .await;

        Ok(format!(
            "📦 Moved {} from {} to {location}.",
            record.key, record.location
        ))
    }

    async fn finish_move(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        record: &InventoryRecord,
        location: &str,
    ) -> Result<Reply> {
        let Some(row) = self.repository.revalidate(record).await? else {
            session.clear();
            return Ok(gone(record));
        };

        let text = self.relocate(actor, record, row, location).await?;
        session.clear();
        Ok(Reply::text(text).with_keyboard(Keyboard::MainMenu))
    }

    async fn finish_rename(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        record: &InventoryRecord,
        new_key: &str,
    ) -> Result<Reply> {
        let Some(row) = self.repository.revalidate(record).await? else {
            session.clear();
            return Ok(gone(record));
        };

        self.repository.update_key_at(row, new_key).await?;
        let note = format!(
            "renamed from {} by {} at {}",
            record.key,
            actor.display_name(),
            timestamp_now()
        );
        self.stamp_at(row, &note).await;
        // Logged under both keys so either history shows the rename
        let details = format!("{} → {new_key}", record.key);
        self.audit
            .record(actor, AuditAction::Rename, details.clone(), Some(&record.key))
            .await;
        if new_key != record.key {
            self.audit
                .record(actor, AuditAction::Rename, details, Some(new_key))
                .await;
        }

        session.clear();
        Ok(Reply::text(format!(
            "✏ Renamed {} to {new_key} on {}.",
            record.key, record.location
        ))
        .with_keyboard(Keyboard::MainMenu))
    }

    fn begin_move(&self, session: &mut UserSession, record: InventoryRecord) -> Reply {
        let reply = Reply::text(format!(
            "New shelf for {} (now on {})? Pick one or type it.",
            record.key, record.location
        ))
        .with_keyboard(self.shelf_picker());
        session.clear();
        session.state = SessionState::Editing { record };
        reply
    }

    fn begin_rename(&self, session: &mut UserSession, record: InventoryRecord) -> Reply {
        let reply = Reply::text(format!(
            "Send the new key for {} on {}.",
            record.key, record.location
        ))
        .with_keyboard(Keyboard::CancelOnly);
        session.clear();
        session.state = SessionState::AwaitingNewKey { record };
        reply
    }

    /// Full key behind a button. Digests are matched against the keys
    /// currently in the table.
    async fn resolve_key(&self, key: &KeyRef) -> Result<String> {
        match key {
            KeyRef::Literal(key) => Ok(key.clone()),
            KeyRef::Digest(_) => self
                .repository
                .all_records()
                .await?
                .into_iter()
                .map(|record| record.key)
                .find(|candidate| key.matches(candidate))
                .ok_or_else(|| InventoryError::NotFound("that key".to_string())),
        }
    }

    /// Buttons under a single search result. Nothing is cached for these,
    /// so the key is looked up again.
    async fn record_action(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        op: RecordOp,
        key: &str,
    ) -> Result<Reply> {
        let op = match op {
            RecordOp::History => {
                return self.show_history(actor, key, Keyboard::MainMenu).await;
            }
            RecordOp::Delete => PickOp::Delete,
            RecordOp::Move => PickOp::Move,
            RecordOp::Rename => PickOp::Rename,
        };

        let mut matches = self.repository.find_all_by_key(key).await?;
        match matches.len() {
            0 => Err(InventoryError::NotFound(key.to_string())),
            1 => {
                let record = matches.remove(0);
                match op {
                    PickOp::Delete => {
                        let row = record.row;
                        self.remove_one(actor, session, &record, row).await
                    }
                    PickOp::Move => Ok(self.begin_move(session, record)),
                    PickOp::Rename => Ok(self.begin_rename(session, record)),
                }
            }
            n => {
                // A duplicate appeared since the search
                session.clear();
                let keyboard = Keyboard::MatchPicker {
                    op,
                    key: key.to_string(),
                    matches: matches.clone(),
                };
                let text = format!(
                    "{n} springs now share key {key}. Which one?\n{}",
                    format_matches(&matches)
                );
                session.cache_matches(key, matches);
                session.state = SessionState::Disambiguating {
                    key: key.to_string(),
                    choice: Some(choice_for(op, None)),
                };
                Ok(Reply::text(text).with_keyboard(keyboard))
            }
        }
    }

    /// A duplicate picked from the cached search results
    async fn pick(
        &self,
        actor: &Actor,
        session: &mut UserSession,
        op: PickOp,
        index: usize,
        key: &KeyRef,
    ) -> Result<Reply> {
        let (key, choice) = pending_choice(session, key)?;
        let record = session
            .cached_matches(&key)
            .and_then(|matches| matches.get(index))
            .cloned()
            .ok_or_else(|| stale("pick button"))?;

        let Some(row) = self.repository.revalidate(&record).await? else {
            session.clear();
            return Ok(gone(&record));
        };

        match op {
            PickOp::Delete => self.remove_one(actor, session, &record, row).await,
            PickOp::Move => {
                if let Some(PendingChoice::MoveOne {
                    target: Some(target),
                }) = choice
                {
                    let text = self.relocate(actor, &record, row, &target).await?;
                    session.clear();
                    return Ok(Reply::text(text).with_keyboard(Keyboard::MainMenu));
                }
                Ok(self.begin_move(session, InventoryRecord { row, ..record }))
            }
            PickOp::Rename => Ok(self.begin_rename(session, InventoryRecord { row, ..record })),
        }
    }

    async fn show_history(&self, actor: &Actor, key: &str, keyboard: Keyboard) -> Result<Reply> {
        let key = key.trim();
        let entries: Vec<_> = self
            .audit
            .find_by_key(key)
            .await?
            .into_iter()
            .filter(|e| !matches!(e.action, Some(AuditAction::Search | AuditAction::History)))
            .collect();
        self.audit
            .record(
                actor,
                AuditAction::History,
                format!("{} entries", entries.len()),
                Some(key),
            )
            .await;

        if entries.is_empty() {
            return Ok(Reply::text(format!("No history for {key}.")).with_keyboard(keyboard));
        }

        let lines: Vec<String> = entries
            .iter()
            .take(self.config.history_limit)
            .map(|e| {
                format!(
                    "{} · {} · {}",
                    e.timestamp.format("%Y-%m-%d %H:%M"),
                    e.username.as_deref().unwrap_or(crate::audit::DEFAULT_USERNAME),
                    e.description()
                )
            })
            .collect();
        Ok(Reply::text(format!("History of {key}:\n{}", lines.join("\n"))).with_keyboard(keyboard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::callback::MAX_TOKEN_BYTES;
    use crate::store::MockTableStore;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(ToString::to_string).collect()
    }

    struct Harness {
        controller: ConversationController,
        inventory: MemoryTable,
        audit: MemoryTable,
        actor: Actor,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_rows(Vec::new())
        }

        fn with_rows(rows: Vec<Vec<String>>) -> Self {
            let inventory = MemoryTable::with_rows(&INVENTORY_HEADER, rows);
            let audit = MemoryTable::new(&AUDIT_HEADER);
            let controller = ConversationController::from_tables(
                Arc::new(inventory.clone()),
                Arc::new(audit.clone()),
                BotConfig::default(),
            );
            Self {
                controller,
                inventory,
                audit,
                actor: Actor::new("1001", Some("ivan".to_string())),
            }
        }

        async fn send(&self, text: &str) -> Reply {
            self.controller
                .handle(InboundEvent::text(self.actor.clone(), text))
                .await
        }

        async fn press(&self, token: &str) -> Reply {
            self.controller
                .handle(InboundEvent::button(self.actor.clone(), token))
                .await
        }

        fn session(&self) -> UserSession {
            self.controller.session(&self.actor.user_id).unwrap()
        }

        async fn keys_and_shelves(&self) -> Vec<(String, String)> {
            self.inventory
                .snapshot()
                .await
                .into_iter()
                .map(|r| (r[0].clone(), r[1].clone()))
                .collect()
        }

        async fn audit_count(&self, action: &str) -> usize {
            self.audit
                .snapshot()
                .await
                .iter()
                .filter(|r| r[3].split(':').next() == Some(action))
                .count()
        }
    }

    fn pair(key: &str, shelf: &str) -> (String, String) {
        (key.to_string(), shelf.to_string())
    }

    #[tokio::test]
    async fn test_add_search_delete_scenario() {
        let h = Harness::new();

        let reply = h.send("+42, a1").await;
        assert!(reply.text.contains("Added 42 to A1"));
        let rows = h.inventory.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0][0].as_str(), rows[0][1].as_str()), ("42", "A1"));
        assert!(!rows[0][2].is_empty());
        assert!(rows[0][3].starts_with("added to A1 by ivan"));

        let audit = h.audit.snapshot().await;
        assert_eq!(h.audit_count("add").await, 1);
        assert_eq!(audit[0][4], "42");

        let reply = h.send("42").await;
        assert!(reply.text.contains("Shelf: A1"));
        assert!(matches!(reply.keyboard, Some(Keyboard::RecordActions { .. })));
        assert!(h.session().is_idle());

        let reply = h.send("-42").await;
        assert!(reply.text.contains("Removed 1"));
        assert!(h.inventory.is_empty().await);

        let reply = h.send("42").await;
        assert!(reply.text.contains("Nothing found for 42"));
    }

    #[tokio::test]
    async fn test_parse_error_keeps_state() {
        let h = Harness::new();

        let reply = h.send("+42").await;
        assert!(reply.text.contains("Expected +<key>,<location>"));
        assert_eq!(h.session().state, SessionState::Idle);
        assert!(h.inventory.is_empty().await);
    }

    #[tokio::test]
    async fn test_search_with_duplicates_disambiguates() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"]), row(&["7", "C1"])]);

        let reply = h.send("42").await;

        assert!(reply.text.contains("Found 2 springs"));
        let session = h.session();
        assert_eq!(
            session.state,
            SessionState::Disambiguating {
                key: "42".to_string(),
                choice: None
            }
        );
        let cached = session.cached_matches("42").unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[1].location, "B2");
    }

    #[tokio::test]
    async fn test_delete_one_removes_only_that_match() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"]), row(&["7", "C1"])]);

        h.send("42").await;
        let reply = h.press("dis:delete:42").await;
        assert_eq!(reply.buttons().len(), 3);

        let reply = h.press("pick:delete:1:42").await;
        assert!(reply.text.contains("Removed 42 from B2"));
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "A1"), pair("7", "C1")]);
        assert!(h.session().is_idle());
        assert_eq!(h.audit_count("delete").await, 1);
    }

    #[tokio::test]
    async fn test_delete_all_from_disambiguation() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["7", "C1"]), row(&["42", "B2"])]);

        h.send("42").await;
        let reply = h.press("dis:all:42").await;

        assert!(reply.text.contains("Removed 2"));
        assert_eq!(h.keys_and_shelves().await, vec![pair("7", "C1")]);
        assert!(h.session().is_idle());
        assert_eq!(h.audit_count("delete_all").await, 1);
    }

    #[tokio::test]
    async fn test_pick_follows_shifted_rows() {
        let h = Harness::with_rows(vec![row(&["1", "X1"]), row(&["42", "A1"]), row(&["42", "B2"])]);

        h.send("42").await;
        h.press("dis:delete:42").await;
        // Someone else removes the row above both matches
        h.inventory.delete_row(RowRef::new(2)).await.unwrap();

        h.press("pick:delete:1:42").await;
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "A1")]);
    }

    #[tokio::test]
    async fn test_pick_of_vanished_row_clears_session() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"])]);

        h.send("42").await;
        h.press("dis:delete:42").await;
        h.inventory.delete_row(RowRef::new(2)).await.unwrap();

        let reply = h.press("pick:delete:0:42").await;
        assert!(reply.text.contains("no longer on A1"));
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "B2")]);
        assert!(h.session().is_idle());
    }

    #[tokio::test]
    async fn test_stale_button_is_a_gentle_noop() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);

        let reply = h.press("pick:delete:0:42").await;
        assert!(reply.text.contains("Nothing to do"));
        assert_eq!(h.inventory.len().await, 1);

        let reply = h.press("shelf:A1").await;
        assert!(reply.text.contains("Nothing to do"));

        let reply = h.press("garbage").await;
        assert!(reply.text.contains("Nothing to do"));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let h = Harness::new();

        h.send("/add").await;
        h.send("42").await;
        assert!(matches!(
            h.session().state,
            SessionState::Adding(AddStep::AwaitingLocation { .. })
        ));

        let reply = h.send("/cancel").await;
        assert_eq!(reply.text, "Cancelled.");
        assert!(h.session().is_idle());
        assert_eq!(h.audit_count("cancel").await, 1);

        let reply = h.press("menu:cancel").await;
        assert_eq!(reply.text, "Nothing to cancel.");
        assert!(h.session().is_idle());
        assert_eq!(h.audit_count("cancel").await, 1);
    }

    #[tokio::test]
    async fn test_cancel_clears_disambiguation_cache() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"])]);

        h.send("42").await;
        h.send("/cancel").await;

        let session = h.session();
        assert!(session.is_idle());
        assert!(session.cached_matches("42").is_none());
    }

    #[tokio::test]
    async fn test_bulk_add_loop() {
        let h = Harness::new();

        let reply = h.press("menu:add").await;
        assert_eq!(reply.keyboard, Some(Keyboard::AddLoop));

        let reply = h.send("42").await;
        assert!(matches!(reply.keyboard, Some(Keyboard::ShelfPicker { .. })));

        let reply = h.press("shelf:A2").await;
        assert!(reply.text.contains("Added 42 to A2"));
        assert_eq!(h.session().state, SessionState::Adding(AddStep::AwaitingKey));

        h.send("43").await;
        let reply = h.send("b9").await;
        assert_eq!(reply.keyboard, Some(Keyboard::ConfirmAdd));
        assert_eq!(
            h.session().state,
            SessionState::Adding(AddStep::AwaitingConfirmation {
                key: "43".to_string(),
                location: "B9".to_string()
            })
        );

        h.press("add:yes").await;
        assert_eq!(h.session().state, SessionState::Adding(AddStep::AwaitingKey));

        let reply = h.press("add:done").await;
        assert_eq!(reply.text, "Done adding.");
        assert!(h.session().is_idle());
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "A2"), pair("43", "B9")]);
        assert_eq!(h.audit_count("add").await, 2);
    }

    #[tokio::test]
    async fn test_add_reject_returns_to_picker() {
        let h = Harness::new();

        h.send("/add").await;
        h.send("42").await;
        h.send("zz").await;
        let reply = h.press("add:no").await;

        assert!(matches!(reply.keyboard, Some(Keyboard::ShelfPicker { .. })));
        assert_eq!(
            h.session().state,
            SessionState::Adding(AddStep::AwaitingLocation {
                key: "42".to_string()
            })
        );
        assert!(h.inventory.is_empty().await);
    }

    #[tokio::test]
    async fn test_pending_flow_rejects_direct_commands() {
        let h = Harness::new();

        h.send("/add").await;
        let reply = h.send("+1,A1").await;

        assert!(reply.text.contains("/cancel"));
        assert_eq!(h.session().state, SessionState::Adding(AddStep::AwaitingKey));
        assert!(h.inventory.is_empty().await);
    }

    #[tokio::test]
    async fn test_direct_commands_run_in_logs_mode() {
        let h = Harness::new();

        h.send("/logs").await;
        let reply = h.send("+5,a1").await;
        assert!(reply.text.contains("Added 5 to A1"));
        assert_eq!(h.session().state, SessionState::Logs);

        let reply = h.send("5").await;
        assert!(reply.text.contains("History of 5"));
        assert!(reply.text.contains("add: 5 → A1"));
        assert!(!reply.text.contains("search"));
        assert_eq!(h.session().state, SessionState::Logs);
    }

    #[tokio::test]
    async fn test_move_from_single_result() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);

        h.send("42").await;
        let reply = h.press("rec:move:42").await;
        assert!(matches!(reply.keyboard, Some(Keyboard::ShelfPicker { .. })));
        assert!(matches!(h.session().state, SessionState::Editing { .. }));

        let reply = h.press("shelf:C3").await;
        assert!(reply.text.contains("Moved 42 from A1 to C3"));
        assert!(h.session().is_idle());

        let rows = h.inventory.snapshot().await;
        assert_eq!(rows[0][1], "C3");
        assert!(!rows[0][2].is_empty());
        assert!(rows[0][3].starts_with("moved A1 → C3"));
        assert_eq!(h.audit_count("move").await, 1);
    }

    #[tokio::test]
    async fn test_direct_move_with_duplicates_asks_which() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"])]);

        let reply = h.send("=42,c1").await;
        assert!(matches!(
            reply.keyboard,
            Some(Keyboard::MatchPicker { op: PickOp::Move, .. })
        ));

        h.press("pick:move:1:42").await;
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "A1"), pair("42", "C1")]);
        assert!(h.session().is_idle());
    }

    #[tokio::test]
    async fn test_rename_one_of_duplicates() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["42", "B2"])]);

        h.send("42").await;
        h.press("dis:rename:42").await;
        h.press("pick:rename:0:42").await;
        assert!(matches!(h.session().state, SessionState::AwaitingNewKey { .. }));

        let reply = h.send("420").await;
        assert!(reply.text.contains("Renamed 42 to 420"));
        assert_eq!(h.keys_and_shelves().await, vec![pair("420", "A1"), pair("42", "B2")]);
        assert!(h.session().is_idle());
    }

    #[tokio::test]
    async fn test_editing_accepts_typed_shelf() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);

        h.send("42").await;
        h.press("rec:move:42").await;
        let reply = h.send("c2").await;

        assert!(reply.text.contains("Moved 42 from A1 to C2"));
        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "C2")]);
        assert!(h.session().is_idle());
    }

    #[tokio::test]
    async fn test_editing_and_renaming_reject_direct_commands() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);

        h.send("42").await;
        h.press("rec:move:42").await;
        let reply = h.send("+1,B1").await;
        assert!(reply.text.contains("/cancel"));
        assert!(matches!(h.session().state, SessionState::Editing { .. }));

        h.send("/cancel").await;
        h.send("42").await;
        h.press("rec:rename:42").await;
        for text in ["=42,B1", "-42"] {
            let reply = h.send(text).await;
            assert!(reply.text.contains("/cancel"));
            assert!(matches!(h.session().state, SessionState::AwaitingNewKey { .. }));
        }

        assert_eq!(h.keys_and_shelves().await, vec![pair("42", "A1")]);
    }

    #[tokio::test]
    async fn test_move_of_vanished_row_changes_nothing() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["7", "B1"])]);

        h.send("42").await;
        h.press("rec:move:42").await;
        h.inventory.delete_row(RowRef::new(2)).await.unwrap();

        let reply = h.press("shelf:C3").await;
        assert!(reply.text.contains("no longer on A1"));
        assert!(h.session().is_idle());
        assert_eq!(h.keys_and_shelves().await, vec![pair("7", "B1")]);
        assert_eq!(h.audit_count("move").await, 0);
    }

    #[tokio::test]
    async fn test_rename_of_vanished_row_changes_nothing() {
        let h = Harness::with_rows(vec![row(&["42", "A1"]), row(&["7", "B1"])]);

        h.send("42").await;
        h.press("rec:rename:42").await;
        h.inventory.delete_row(RowRef::new(2)).await.unwrap();

        let reply = h.send("420").await;
        assert!(reply.text.contains("no longer on A1"));
        assert!(h.session().is_idle());
        assert_eq!(h.keys_and_shelves().await, vec![pair("7", "B1")]);
        assert_eq!(h.audit_count("rename").await, 0);
    }

    #[tokio::test]
    async fn test_rename_shows_in_both_histories() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);

        h.send("42").await;
        h.press("rec:rename:42").await;
        h.send("420").await;

        h.send("/logs").await;
        let old = h.send("42").await;
        let new = h.send("420").await;
        assert!(old.text.contains("rename: 42 → 420"));
        assert!(new.text.contains("rename: 42 → 420"));
        assert_eq!(h.audit_count("rename").await, 2);
    }

    #[tokio::test]
    async fn test_long_key_buttons_fit_and_resolve() {
        let key = "Пружина сжатия 12х40 нержавейка";
        let h = Harness::new();
        h.send(&format!("+{key},A1")).await;
        h.send(&format!("+{key},B1")).await;

        let fits = |reply: &Reply| {
            reply
                .buttons()
                .iter()
                .flatten()
                .all(|b| b.token.len() <= MAX_TOKEN_BYTES)
        };

        let reply = h.send(key).await;
        assert!(reply.text.contains("Found 2 springs"));
        assert!(fits(&reply));

        let reply = h.press(&reply.token_for("Delete one").unwrap()).await;
        assert!(fits(&reply));

        let reply = h.press(&reply.token_for("#2").unwrap()).await;
        assert!(reply.text.contains("from B1"));
        assert_eq!(h.keys_and_shelves().await, vec![pair(key, "A1")]);
    }

    #[tokio::test]
    async fn test_long_key_record_buttons_resolve() {
        let key = "Пружина сжатия 12х40 нержавейка";
        let h = Harness::with_rows(vec![row(&[key, "A1"])]);

        let reply = h.send(key).await;
        assert!(reply.buttons().iter().flatten().all(|b| b.token.len() <= MAX_TOKEN_BYTES));
        let rename = reply.token_for("Rename").unwrap();
        assert!(!rename.ends_with(key));

        h.press(&rename).await;
        assert!(matches!(
            h.session().state,
            SessionState::AwaitingNewKey { ref record } if record.key == key
        ));

        // The spring left the table before its button was pressed again
        h.send("/cancel").await;
        h.inventory.delete_row(RowRef::new(2)).await.unwrap();
        let reply = h.press(&rename).await;
        assert!(reply.text.contains("Nothing found"));
        assert!(h.session().is_idle());
    }

    #[tokio::test]
    async fn test_history_button_on_record() {
        let h = Harness::new();

        h.send("+42,A1").await;
        h.send("=42,B1").await;
        let reply = h.press("rec:history:42").await;

        let move_at = reply.text.find("move: 42: A1 → B1").unwrap();
        let add_at = reply.text.find("add: 42 → A1").unwrap();
        assert!(move_at < add_at);
    }

    #[tokio::test]
    async fn test_remote_failure_preserves_session() {
        let mut store = MockTableStore::new();
        store
            .expect_append_row()
            .returning(|_| Err(InventoryError::RemoteStore("quota exceeded".to_string())));
        let controller = ConversationController::from_tables(
            Arc::new(store),
            Arc::new(MemoryTable::new(&AUDIT_HEADER)),
            BotConfig::default(),
        );
        let actor = Actor::new("9", None);

        controller.handle(InboundEvent::text(actor.clone(), "/add")).await;
        controller.handle(InboundEvent::text(actor.clone(), "42")).await;
        let reply = controller
            .handle(InboundEvent::button(actor.clone(), "shelf:A1"))
            .await;

        assert_eq!(reply.text, GENERIC_FAILURE);
        assert_eq!(
            controller.session("9").unwrap().state,
            SessionState::Adding(AddStep::AwaitingLocation {
                key: "42".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_audit_outage_does_not_block() {
        let mut audit = MockTableStore::new();
        audit
            .expect_append_row()
            .returning(|_| Err(InventoryError::RemoteStore("offline".to_string())));
        let inventory = MemoryTable::new(&INVENTORY_HEADER);
        let controller = ConversationController::from_tables(
            Arc::new(inventory.clone()),
            Arc::new(audit),
            BotConfig::default(),
        );

        let reply = controller
            .handle(InboundEvent::text(Actor::new("9", None), "+42,A1"))
            .await;

        assert!(reply.text.contains("Added 42"));
        assert_eq!(inventory.len().await, 1);
    }

    #[tokio::test]
    async fn test_sessions_do_not_leak_between_users() {
        let h = Harness::with_rows(vec![row(&["42", "A1"])]);
        let other = Actor::new("2002", None);

        h.send("/add").await;
        let reply = h
            .controller
            .handle(InboundEvent::text(other.clone(), "42"))
            .await;

        assert!(reply.text.contains("Shelf: A1"));
        assert_eq!(h.session().state, SessionState::Adding(AddStep::AwaitingKey));
        assert!(h.controller.session("2002").unwrap().is_idle());
    }
}
