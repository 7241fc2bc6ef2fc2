pub mod chats;
pub mod common;
pub mod completions;
pub mod messages;
pub mod send;
pub mod settings;
pub mod sync;
pub mod watch;
