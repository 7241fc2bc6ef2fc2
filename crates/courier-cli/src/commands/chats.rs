use chrono::Utc;

use crate::commands::common::{chat_to_list_item, format_chat_lines, ChatListItem, CliContext};
use crate::error::CliError;

pub async fn run_chats(context: &CliContext, as_json: bool) -> Result<(), CliError> {
    let store = context.open_store().await?;
    let chats = store.list_chats().await?;
    let now = Utc::now();

    if as_json {
        let json_items = chats
            .iter()
            .map(|chat| chat_to_list_item(chat, now))
            .collect::<Vec<ChatListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if chats.is_empty() {
        println!("No chats yet. Run `courier sync` to fetch them.");
        return Ok(());
    }

    for line in format_chat_lines(&chats, now) {
        println!("{line}");
    }
    Ok(())
}
