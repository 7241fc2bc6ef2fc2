//! Database layer for Courier

mod chat_repository;
mod classify;
mod connection;
mod migrations;
mod settings_repository;

pub use chat_repository::SqliteChatRepository;
pub use classify::{classify, StorageFault};
pub use connection::Database;
pub use settings_repository::SqliteSettingsRepository;
