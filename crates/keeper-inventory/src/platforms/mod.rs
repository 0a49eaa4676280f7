//! Chat transports

pub mod telegram;

pub use telegram::{TelegramBot, TelegramConfig};
