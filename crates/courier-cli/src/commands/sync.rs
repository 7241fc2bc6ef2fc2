use std::sync::Arc;

use crate::commands::common::{format_outcome, CliContext};
use crate::error::CliError;

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let remote = context.remote()?;

    let pipeline = context.chat_pipeline(store.clone(), Arc::clone(&remote));
    let report = pipeline.catch_up().await?;
    println!(
        "Chats synced: {} change(s) in {} batch(es)",
        report.changes, report.batches
    );

    let Some(user_id) = context.settings.user_id.as_deref() else {
        tracing::debug!("No user configured, skipping settings sync");
        return Ok(());
    };

    let engine = context.settings_engine(store, remote);
    let outcomes = engine.sync_pending(user_id).await?;
    let mut outcomes: Vec<_> = outcomes.into_iter().collect();
    outcomes.sort_by_key(|(key, _)| key.as_str());
    for (key, outcome) in &outcomes {
        println!("{}", format_outcome(*key, outcome));
    }
    Ok(())
}
