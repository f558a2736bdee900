use std::{sync::Arc, time::Duration};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, sleep, Instant},
};
use tracing::{debug, error, info, warn};

use hostess_core::{
    audit::AuditEvent,
    domain::ChatId,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, TextMessage},
    },
    reply::render,
    security::clip_message,
};

use crate::router::AppState;

use super::send_reply;

const TYPING_EVERY: Duration = Duration::from_secs(4);

const UNAVAILABLE: &str =
    "Извините, сейчас я не могу обработать ваш запрос. Пожалуйста, напишите чуть позже.";

/// Re-sends "typing…" until stopped (Telegram clears it after ~5s).
struct TypingIndicator {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TypingIndicator {
    fn start(messenger: Arc<dyn MessagingPort>, chat_id: ChatId) -> Self {
        let (stop, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut tick = interval(TYPING_EVERY);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = messenger.send_chat_action(chat_id, ChatAction::Typing).await {
                            debug!(error = %e, "typing indicator failed");
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });
        Self { stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

pub(crate) async fn handle_text(state: &AppState, msg: TextMessage) {
    let from = &msg.from;
    let text = clip_message(msg.text.trim());
    if text.is_empty() {
        return;
    }
    let username = from.display_name();

    // Rate limit before calling the model.
    let (ok, retry_after) = state.rate_limiter.lock().await.check(from.user_id);
    if !ok {
        let retry = retry_after.unwrap_or_default().as_secs_f64();
        warn!(user_id = from.user_id.0, retry, "rate limited");
        write_audit(
            state,
            AuditEvent::rate_limit(from.user_id.0, &username, from.chat_id.0, retry),
        );
        send_reply(
            state,
            from.chat_id,
            &format!(
                "Пожалуйста, не так быстро. Напишите снова через {} сек.",
                retry.ceil().max(1.0)
            ),
        )
        .await;
        return;
    }

    info!(chat_id = from.chat_id.0, user = %username, "guest message");
    let started = Instant::now();
    let typing = TypingIndicator::start(state.messenger.clone(), from.chat_id);

    let (reply, intent) = match state.hostess.handle_message(from.chat_id, text).await {
        Ok(turn) => {
            for t in &turn.tools {
                write_audit(
                    state,
                    AuditEvent::tool_call(
                        from.user_id.0,
                        &username,
                        from.chat_id.0,
                        &t.name,
                        &t.arguments,
                        &t.result,
                    ),
                );
            }
            (
                render(&turn.reply, state.hostess.restaurant_name()),
                turn.reply.intent.as_str(),
            )
        }
        Err(e) => {
            error!(chat_id = from.chat_id.0, error = %e, "hostess failed");
            write_audit(
                state,
                AuditEvent::error(from.user_id.0, &username, from.chat_id.0, &e.to_string()),
            );
            (UNAVAILABLE.to_string(), "error")
        }
    };

    // The pause counts from the guest's message, not from the model's answer.
    if !state.reply_delay.is_disabled() {
        let delay = state.reply_delay.compute(&reply, &mut rand::thread_rng());
        let remaining = delay.saturating_sub(started.elapsed());
        debug!(?delay, ?remaining, "humanized reply delay");
        sleep(remaining).await;
    }
    typing.stop().await;

    send_reply(state, from.chat_id, &reply).await;
    write_audit(
        state,
        AuditEvent::message(from.user_id.0, &username, from.chat_id.0, text, &reply, intent),
    );
}

pub(crate) fn write_audit(state: &AppState, event: AuditEvent) {
    if let Err(e) = state.audit.write(event) {
        warn!(error = %e, "failed to write audit event");
    }
}
