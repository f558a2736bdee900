use tracing::{info, warn};

use hostess_core::{
    assistant::{AssistantReply, Intent},
    audit::AuditEvent,
    formatting::{format_bookings, split_text, TELEGRAM_MESSAGE_LIMIT},
    messaging::types::Command,
    reply::render,
    security::is_admin,
};

use crate::router::AppState;

use super::{send_reply, text::write_audit};

const HELP: &str = "Я могу:\n\
• проверить, свободен ли столик на нужные дату и время;\n\
• забронировать столик (нужны дата, время, имя и телефон);\n\
• отменить или перенести бронь по номеру телефона;\n\
• рассказать о ресторане: часы работы, зал и веранда, парковка.\n\n\
Просто напишите, например: «Забронируйте столик на завтра в 19:00 на четверых, Анна, +7 912 345-67-89».\n\n\
Команды:\n\
/help - эта подсказка\n\
/reset - начать разговор заново";

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(crate) async fn handle_command(state: &AppState, cmd: Command) {
    let from = &cmd.from;
    let username = from.display_name();
    info!(chat_id = from.chat_id.0, user = %username, command = %cmd.name, "command");
    write_audit(
        state,
        AuditEvent::command(from.user_id.0, &username, from.chat_id.0, &format!("/{}", cmd.name)),
    );

    match cmd.name.as_str() {
        "start" => {
            let greeting = AssistantReply {
                intent: Intent::Greeting,
                ..Default::default()
            };
            let text = format!(
                "{}\n\n{HELP}",
                render(&greeting, state.hostess.restaurant_name())
            );
            send_reply(state, from.chat_id, &text).await;
        }

        "help" => send_reply(state, from.chat_id, HELP).await,

        "reset" => {
            state.hostess.dialogue().reset(from.chat_id).await;
            send_reply(
                state,
                from.chat_id,
                "Хорошо, начнём сначала. Чем могу помочь?",
            )
            .await;
        }

        "bookings" => {
            if !is_admin(Some(from.user_id), &state.admin_users) {
                send_reply(state, from.chat_id, "Эта команда доступна только персоналу.").await;
                return;
            }
            let book = state.hostess.book();
            let upcoming = book.upcoming(state.hostess.now()).await;
            let html = format_bookings(book, &upcoming);
            for chunk in split_text(&html, TELEGRAM_MESSAGE_LIMIT) {
                if let Err(e) = state.messenger.send_html(from.chat_id, &chunk).await {
                    warn!(error = %e, "failed to send bookings list");
                }
            }
        }

        _ => {
            send_reply(
                state,
                from.chat_id,
                "Неизвестная команда. Список команд: /help",
            )
            .await;
        }
    }
}
