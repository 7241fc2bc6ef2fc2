use chrono::Utc;
use courier_core::messaging::MessageFlow;
use courier_core::models::{Message, MessageId, ParticipantId};

use crate::commands::common::{
    chat_id_arg, format_delivery_status, normalize_text, parse_id, CliContext,
};
use crate::error::CliError;

pub async fn run_send(
    context: &CliContext,
    chat_id: &str,
    sender: Option<&str>,
    reply_to: Option<&str>,
    text: &[String],
) -> Result<(), CliError> {
    let chat_id = chat_id_arg(chat_id)?;
    let sender: ParticipantId = match sender {
        Some(sender) => parse_id("participant", sender)?,
        None => parse_id("participant", context.user_id()?)?,
    };
    let text = normalize_text(text)?;

    let mut message = Message::new(chat_id, sender, text, Utc::now());
    if let Some(parent) = reply_to {
        message = message.in_reply_to(parse_id::<MessageId>("message", parent)?);
    }

    let store = context.open_store().await?;
    let flow = MessageFlow::new(store, context.remote()?);
    let sent = flow
        .send(message, |snapshot| {
            if let Some(status) = &snapshot.delivery_status {
                eprintln!("{}", format_delivery_status(status));
            }
        })
        .await?;

    println!("{}", sent.id);
    Ok(())
}
