use courier_core::models::{SettingKey, SettingRow};

use crate::commands::common::{
    format_outcome, format_setting_lines, parse_setting_key, setting_to_item, CliContext,
    SettingItem,
};
use crate::error::CliError;

pub async fn run_get(
    context: &CliContext,
    key: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let user_id = context.user_id()?;
    let engine = context.local_settings_engine().await?;
    let rows = match key {
        Some(key) => vec![engine.get_row(user_id, parse_setting_key(key)?).await?],
        None => engine.list(user_id).await?,
    };
    print_rows(&rows, as_json)
}

pub async fn run_set(context: &CliContext, key: &str, value: &str) -> Result<(), CliError> {
    let user_id = context.user_id()?;
    let key = parse_setting_key(key)?;
    let engine = context.local_settings_engine().await?;

    let row = engine.set_raw(user_id, key, value).await?;
    println!(
        "{} = {} (version {}, {})",
        row.key,
        row.value,
        row.local_version,
        row.sync_status.as_str()
    );
    Ok(())
}

pub async fn run_sync(context: &CliContext) -> Result<(), CliError> {
    let user_id = context.user_id()?;
    let engine = context.settings_engine(context.open_store().await?, context.remote()?);
    let mut conflicts = engine.subscribe_conflicts();

    let outcomes = engine.sync_pending(user_id).await?;
    if outcomes.is_empty() {
        println!("All settings are synced.");
        return Ok(());
    }

    let mut keys: Vec<SettingKey> = outcomes.keys().copied().collect();
    keys.sort_by_key(|key| key.as_str());
    for key in keys {
        println!("{}", format_outcome(key, &outcomes[&key]));
    }

    while let Ok(event) = conflicts.try_recv() {
        println!(
            "conflict on {}: local '{}' replaced by server '{}'",
            event.key, event.local_value, event.accepted_value
        );
    }
    Ok(())
}

pub async fn run_recover(context: &CliContext) -> Result<(), CliError> {
    let user_id = context.user_id()?;
    let engine = context.settings_engine(context.open_store().await?, context.remote()?);

    let rows = engine.recover(user_id).await?;
    print_rows(&rows, false)
}

pub async fn run_pending(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let user_id = context.user_id()?;
    let engine = context.local_settings_engine().await?;
    let rows = engine.get_unsynced_settings(user_id).await?;

    if rows.is_empty() && !as_json {
        println!("No pending settings.");
        return Ok(());
    }
    print_rows(&rows, as_json)
}

fn print_rows(rows: &[SettingRow], as_json: bool) -> Result<(), CliError> {
    if as_json {
        let json_items = rows.iter().map(setting_to_item).collect::<Vec<SettingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_setting_lines(rows) {
            println!("{line}");
        }
    }
    Ok(())
}
