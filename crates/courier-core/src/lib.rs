//! courier-core - Core library for Courier
//!
//! An offline-first replica of a user's chats and settings. The server is the
//! authority; this crate keeps a local SQLite copy in step with it:
//!
//! - chats and messages arrive as ordered delta batches and are applied
//!   atomically together with the sync cursor ([`sync::ChatSyncPipeline`]);
//! - settings are versioned locally and reconciled server-wins
//!   ([`sync::SettingsSyncEngine`]);
//! - outgoing messages go through the delivery status validator
//!   ([`messaging::MessageFlow`]).

pub mod clock;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod messaging;
pub mod models;
pub mod remote;
pub mod services;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
pub use models::{Chat, ChatId, Message, MessageId, SettingKey};
pub use services::LocalStore;
