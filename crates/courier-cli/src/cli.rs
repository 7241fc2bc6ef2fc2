use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Offline-first chat and settings sync from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// User whose settings are read and synced
    #[arg(long, global = true, value_name = "USER_ID")]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull chat changes until the replica is caught up, then push pending settings
    Sync,
    /// Keep the chat replica in sync until interrupted
    Watch,
    /// List chats in the local replica
    Chats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List messages of a chat
    Messages {
        /// Chat ID
        chat_id: String,
        /// Number of most recent messages to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a message to a chat
    Send {
        /// Chat ID
        chat_id: String,
        /// Sender participant ID (defaults to the configured user)
        #[arg(long, value_name = "PARTICIPANT_ID")]
        sender: Option<String>,
        /// Message ID to reply to
        #[arg(long, value_name = "MESSAGE_ID")]
        reply_to: Option<String>,
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Read, change and sync user settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show one setting, or all of them
    Get {
        /// Setting key, e.g. ui_language
        key: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a setting locally; it is pushed on the next sync
    Set {
        /// Setting key, e.g. ui_language
        key: String,
        /// New value, e.g. de
        value: String,
    },
    /// Push pending settings to the server
    Sync,
    /// List settings with local changes not yet acknowledged
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace local settings with the server's copy
    Recover,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
