//! Telegram front end for the relay: Bot API client, update routing,
//! commands, and the webhook and long-polling receivers.

pub mod commands;
pub mod format;
pub mod handlers;
pub mod polling;
pub mod telegram;
pub mod webhook;

pub use handlers::Bot;
pub use telegram::TelegramClient;
