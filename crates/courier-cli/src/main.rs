//! Courier CLI - keep a local chat and settings replica in sync from the terminal

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;

use crate::cli::{Cli, Commands, SettingsCommands};
use crate::commands::common::CliContext;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "courier=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return commands::completions::run_completions(*shell, output.as_deref());
    }

    let context = CliContext::load(cli.config, cli.db_path, cli.user)?;

    match cli.command {
        Commands::Sync => commands::sync::run_sync(&context).await,
        Commands::Watch => commands::watch::run_watch(&context).await,
        Commands::Chats { json } => commands::chats::run_chats(&context, json).await,
        Commands::Messages {
            chat_id,
            limit,
            json,
        } => commands::messages::run_messages(&context, &chat_id, limit, json).await,
        Commands::Send {
            chat_id,
            sender,
            reply_to,
            text,
        } => {
            commands::send::run_send(
                &context,
                &chat_id,
                sender.as_deref(),
                reply_to.as_deref(),
                &text,
            )
            .await
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Get { key, json } => {
                commands::settings::run_get(&context, key.as_deref(), json).await
            }
            SettingsCommands::Set { key, value } => {
                commands::settings::run_set(&context, &key, &value).await
            }
            SettingsCommands::Sync => commands::settings::run_sync(&context).await,
            SettingsCommands::Pending { json } => {
                commands::settings::run_pending(&context, json).await
            }
            SettingsCommands::Recover => commands::settings::run_recover(&context).await,
        },
        Commands::Completions { .. } => Ok(()),
    }
}
