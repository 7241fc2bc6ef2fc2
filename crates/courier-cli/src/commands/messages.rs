use crate::commands::common::{
    chat_id_arg, format_message_lines, message_to_list_item, CliContext, MessageListItem,
};
use crate::error::CliError;

pub async fn run_messages(
    context: &CliContext,
    chat_id: &str,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let chat_id = chat_id_arg(chat_id)?;
    let store = context.open_store().await?;
    if store.get_chat(chat_id).await?.is_none() {
        return Err(CliError::ChatNotFound(chat_id.to_string()));
    }

    let messages = store.list_messages(chat_id).await?;
    let recent = &messages[messages.len().saturating_sub(limit)..];

    if as_json {
        let json_items = recent
            .iter()
            .map(message_to_list_item)
            .collect::<Vec<MessageListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_message_lines(recent) {
            println!("{line}");
        }
    }

    Ok(())
}
