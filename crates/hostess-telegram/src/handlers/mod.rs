//! Telegram update handlers.
//!
//! Updates are first mapped to messenger-neutral [`IncomingUpdate`]s, then
//! handled one at a time per chat. Everything outbound goes through the
//! `MessagingPort`.

use teloxide::{prelude::*, types::Message};
use tracing::warn;

use std::sync::Arc;

use hostess_core::{
    domain::{ChatId, UserId},
    formatting::split_text,
    messaging::types::{Command, IncomingUpdate, Sender, TextMessage},
};

use crate::router::AppState;

mod commands;
mod text;

const UNSUPPORTED: &str =
    "Я понимаю только текстовые сообщения. Напишите, пожалуйста, ваш вопрос текстом.";

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Some(update) = incoming_from_message(&msg) {
        dispatch(&state, update).await;
    }
    Ok(())
}

/// `None` for updates without a human sender (channel posts, service messages).
fn incoming_from_message(msg: &Message) -> Option<IncomingUpdate> {
    let user = msg.from()?;
    if user.is_bot {
        return None;
    }
    let from = Sender {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
    };

    Some(match msg.text() {
        Some(t) if t.starts_with('/') => {
            let (name, args) = commands::parse_command(t);
            IncomingUpdate::Command(Command { from, name, args })
        }
        Some(t) => IncomingUpdate::Text(TextMessage {
            from,
            text: t.to_string(),
        }),
        None => IncomingUpdate::Unsupported(from),
    })
}

pub async fn dispatch(state: &AppState, update: IncomingUpdate) {
    let _guard = state.chat_locks.lock_chat(update.sender().chat_id.0).await;
    match update {
        IncomingUpdate::Command(cmd) => commands::handle_command(state, cmd).await,
        IncomingUpdate::Text(msg) => text::handle_text(state, msg).await,
        IncomingUpdate::Unsupported(from) => send_reply(state, from.chat_id, UNSUPPORTED).await,
    }
}

/// Plain-text reply, split to the messenger's limit. Failures are logged.
pub(crate) async fn send_reply(state: &AppState, chat_id: ChatId, text: &str) {
    let limit = state.messenger.capabilities().max_message_len;
    for chunk in split_text(text, limit) {
        if let Err(e) = state.messenger.send_text(chat_id, &chunk).await {
            warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
        }
    }
}
