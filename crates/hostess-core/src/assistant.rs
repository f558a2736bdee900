//! The hostess pipeline: understand a guest message, run reservation tools,
//! and produce a structured reply.
//!
//! One turn is at most two model calls. The first offers the tools; if the
//! model calls any, their results are appended and a second call asks for the
//! final JSON answer.

use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    dialogue::DialogueStore,
    domain::ChatId,
    model::{
        client::ChatModel,
        types::{ChatMessage, ChatRequest, TokenUsage},
    },
    reservations::ReservationBook,
    tools::{self, lenient_u32, ToolExecutor},
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    BookingIntent,
    CancelIntent,
    ChangeIntent,
    Booked,
    Available,
    Unavailable,
    Cancelled,
    Changed,
    Error,
    #[default]
    #[serde(other)]
    Other,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::BookingIntent => "booking_intent",
            Intent::CancelIntent => "cancel_intent",
            Intent::ChangeIntent => "change_intent",
            Intent::Booked => "booked",
            Intent::Available => "available",
            Intent::Unavailable => "unavailable",
            Intent::Cancelled => "cancelled",
            Intent::Changed => "changed",
            Intent::Error => "error",
            Intent::Other => "other",
        }
    }
}

/// Final JSON answer of the model. Everything but `intent` is optional.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantReply {
    #[serde(deserialize_with = "lenient_intent")]
    pub intent: Intent,
    pub message: Option<String>,
    pub datetime: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub client_name: Option<String>,
    pub phone_number: Option<String>,
    pub table_name: Option<String>,
    pub zone: Option<String>,
    #[serde(deserialize_with = "lenient_u32")]
    pub guests_count: Option<u32>,
    #[serde(deserialize_with = "null_as_empty")]
    pub alternatives: Vec<String>,
}

/// `null` or a non-string intent reads as `other`.
fn lenient_intent<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Intent, D::Error> {
    let v = Option::<Value>::deserialize(de)?;
    Ok(v.and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default())
}

/// Models echo unused fields as `null`; stray non-strings are dropped.
fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<String>, D::Error> {
    let v = Option::<Value>::deserialize(de)?;
    Ok(match v {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s],
        _ => Vec::new(),
    })
}

impl AssistantReply {
    /// Lenient parse: tolerates code fences and prose around the JSON object.
    /// Anything unparseable becomes `other` with the raw text as the message.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => &trimmed[start..=end],
            _ => trimmed,
        };

        match serde_json::from_str::<AssistantReply>(candidate) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, raw = %trimmed, "model reply is not valid JSON");
                AssistantReply {
                    intent: Intent::Other,
                    message: (!trimmed.is_empty()).then(|| trimmed.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

/// A tool call made during a turn (for the audit log).
#[derive(Clone, Debug)]
pub struct ToolTrace {
    pub name: String,
    pub arguments: String,
    pub result: String,
}

#[derive(Clone, Debug)]
pub struct Turn {
    pub reply: AssistantReply,
    pub tools: Vec<ToolTrace>,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug)]
pub struct HostessOptions {
    pub restaurant_name: String,
    pub default_guests: u32,
    pub alternatives: usize,
    pub history_turns: usize,
}

pub struct Hostess {
    model: Arc<dyn ChatModel>,
    book: Arc<ReservationBook>,
    tools: ToolExecutor,
    dialogue: DialogueStore,
    clock: Clock,
    restaurant_name: String,
}

impl Hostess {
    pub fn new(
        model: Arc<dyn ChatModel>,
        book: Arc<ReservationBook>,
        clock: Clock,
        opts: HostessOptions,
    ) -> Self {
        let tools = ToolExecutor::new(
            book.clone(),
            clock,
            opts.default_guests,
            opts.alternatives,
        );
        Self {
            model,
            book,
            tools,
            dialogue: DialogueStore::new(opts.history_turns),
            clock,
            restaurant_name: opts.restaurant_name,
        }
    }

    pub fn restaurant_name(&self) -> &str {
        &self.restaurant_name
    }

    pub fn book(&self) -> &Arc<ReservationBook> {
        &self.book
    }

    pub fn dialogue(&self) -> &DialogueStore {
        &self.dialogue
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    pub async fn handle_message(&self, chat_id: ChatId, text: &str) -> Result<Turn> {
        let now = self.clock.now();
        let mut usage = TokenUsage::default();

        let mut messages = vec![ChatMessage::system(self.system_prompt(now))];
        messages.extend(self.dialogue.history(chat_id).await);
        messages.push(ChatMessage::user(text));

        let first = self
            .model
            .complete(ChatRequest {
                messages: messages.clone(),
                tools: tools::definitions(),
                json_response: false,
            })
            .await?;
        add_usage(&mut usage, first.usage.as_ref());

        let mut traces = Vec::new();
        let content = if first.message.tool_calls.is_empty() {
            first.message.text().to_string()
        } else {
            let calls = first.message.tool_calls.clone();
            messages.push(first.message);

            // Every call id must be answered before the next completion.
            for call in &calls {
                let result = self
                    .tools
                    .execute(&call.function.name, &call.function.arguments)
                    .await;
                messages.push(ChatMessage::tool_result(call, result.clone()));
                traces.push(ToolTrace {
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                    result,
                });
            }

            let second = self
                .model
                .complete(ChatRequest {
                    messages,
                    tools: Vec::new(),
                    json_response: true,
                })
                .await?;
            add_usage(&mut usage, second.usage.as_ref());
            second.message.text().to_string()
        };

        let reply = AssistantReply::parse(&content);
        info!(
            chat_id = chat_id.0,
            intent = ?reply.intent,
            tool_calls = traces.len(),
            "guest message handled"
        );
        debug!(content = %content, "model answer");

        self.dialogue.record(chat_id, text, &content).await;

        Ok(Turn {
            reply,
            tools: traces,
            usage,
        })
    }

    fn system_prompt(&self, now: DateTime<FixedOffset>) -> String {
        let settings = self.book.settings();
        let hours = settings.hours;
        let min_capacity = settings.tables.iter().map(|t| t.capacity).min().unwrap_or(0);
        let max_capacity = settings.max_capacity();
        let zones = {
            let mut z: Vec<&str> = settings.tables.iter().map(|t| t.zone.label()).collect();
            z.sort_unstable();
            z.dedup();
            z.join(" и ")
        };

        format!(
            r#"Ты - хостесс ресторана "{name}". Твоя задача - определить намерение клиента, при необходимости вызвать функции бронирования и ответить строго JSON-объектом.

Сейчас {today}, {weekday}, {clock} (время ресторана, UTC{offset}).

Возможные намерения (поле "intent"):
- `greeting`: клиент просто здоровается, благодарит или прощается.
- `booking_intent`: клиент хочет забронировать столик, но не хватает даты, времени, имени или телефона. Спроси недостающее в "message".
- `cancel_intent`: клиент хочет отменить бронь, но не назвал номер телефона. Попроси его в "message".
- `change_intent`: клиент хочет перенести бронь, но не хватает телефона, новой даты или нового времени. Спроси в "message".
- `other`: всё остальное (вопросы о ресторане и т.п.). Ответь в "message".

Правила:
1. Доступность, бронирование, отмену и перенос выполняй только через функции. Не придумывай результат.
2. Количество гостей (guests_count) по умолчанию 2.
3. После вызова функции верни JSON, где "intent" равен полю "status" результата (available, unavailable, booked, cancelled, changed, error), и перенеси остальные поля результата (datetime, alternatives, table_name, zone, client_name, phone_number, guests_count, message).
4. Формат ответа: {{"intent": "...", "message": "..."}} плюс нужные поля. Никакого текста вне JSON. "message" пиши по-русски, вежливо и кратко.

Информация о ресторане:
1. График работы: ежедневно, с {open} до {close}.
2. Столики: {zones}. Всего {tables} столов разной вместимости (от {min_capacity} до {max_capacity} человек).
3. Парковка: есть возле ресторана.
4. Бронь держит столик {slot} минут."#,
            name = self.restaurant_name,
            today = now.format("%d.%m.%Y"),
            weekday = weekday_ru(now.weekday()),
            clock = now.format("%H:%M"),
            offset = now.format("%:z"),
            open = hours.open_label(),
            close = hours.close_label(),
            zones = zones,
            tables = settings.tables.len(),
            min_capacity = min_capacity,
            max_capacity = max_capacity,
            slot = settings.slot_minutes,
        )
    }
}

fn add_usage(total: &mut TokenUsage, u: Option<&TokenUsage>) {
    if let Some(u) = u {
        total.prompt_tokens += u.prompt_tokens;
        total.completion_tokens += u.completion_tokens;
    }
}

fn weekday_ru(d: Weekday) -> &'static str {
    match d {
        Weekday::Mon => "понедельник",
        Weekday::Tue => "вторник",
        Weekday::Wed => "среда",
        Weekday::Thu => "четверг",
        Weekday::Fri => "пятница",
        Weekday::Sat => "суббота",
        Weekday::Sun => "воскресенье",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::default_tables,
        errors::Error,
        model::types::{ChatResponse, ProviderKind, Role, ToolCall},
        reservations::{BookSettings, OpeningHours},
    };
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses and records every request.
    #[derive(Default)]
    struct ScriptedModel {
        responses: Mutex<VecDeque<ChatMessage>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<ChatMessage>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn provider(&self) -> ProviderKind {
            ProviderKind::Mock
        }

        async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
            self.requests.lock().unwrap().push(req);
            let message = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::External("script exhausted".to_string()))?;
            Ok(ChatResponse {
                message,
                usage: Some(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                }),
            })
        }
    }

    fn tool_calls(calls: Vec<ToolCall>) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_calls: calls,
            tool_call_id: None,
            name: None,
        }
    }

    fn hostess(model: Arc<ScriptedModel>) -> Hostess {
        let msk = FixedOffset::east_opt(3 * 3600).unwrap();
        let book = Arc::new(ReservationBook::in_memory(BookSettings {
            offset: msk,
            slot_minutes: 30,
            hours: OpeningHours {
                open_minute: 8 * 60,
                close_minute: 24 * 60,
            },
            tables: default_tables(),
        }));
        let now = msk.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        Hostess::new(
            model,
            book,
            Clock::Fixed(now),
            HostessOptions {
                restaurant_name: "Ромашка".to_string(),
                default_guests: 2,
                alternatives: 5,
                history_turns: 10,
            },
        )
    }

    #[tokio::test]
    async fn plain_answer_uses_one_call_with_tools_offered() {
        let model = ScriptedModel::new(vec![ChatMessage::assistant(r#"{"intent":"greeting"}"#)]);
        let h = hostess(model.clone());

        let turn = h.handle_message(ChatId(1), "Привет!").await.unwrap();
        assert_eq!(turn.reply.intent, Intent::Greeting);
        assert!(turn.tools.is_empty());

        let reqs = model.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].tools.len(), 4);
        assert!(!reqs[0].json_response);
        let system = reqs[0].messages[0].text();
        assert!(system.contains("Ромашка"));
        assert!(system.contains("20.10.2025"));
        assert!(system.contains("понедельник"));
        assert!(system.contains("с 08:00 до 24:00"));
        assert!(system.contains("от 2 до 8 человек"));
    }

    #[tokio::test]
    async fn tool_call_is_executed_and_answered_before_final_json() {
        let args = json!({"date": "завтра", "time": "19:00", "client_name": "Иван", "phone_number": "+79123456789", "guests_count": 4});
        let model = ScriptedModel::new(vec![
            tool_calls(vec![ToolCall::function("call_1", "book_slot", args.to_string())]),
            ChatMessage::assistant(
                r#"{"intent":"booked","datetime":"2025-10-21 19:00","client_name":"Иван","table_name":"Стол 2","zone":"зал","guests_count":"4"}"#,
            ),
        ]);
        let h = hostess(model.clone());

        let turn = h
            .handle_message(ChatId(1), "Забронируйте на завтра 19:00, Иван, +79123456789, нас 4")
            .await
            .unwrap();
        assert_eq!(turn.reply.intent, Intent::Booked);
        assert_eq!(turn.reply.guests_count, Some(4));
        assert_eq!(turn.usage.prompt_tokens, 20);

        assert_eq!(turn.tools.len(), 1);
        let result: Value = serde_json::from_str(&turn.tools[0].result).unwrap();
        assert_eq!(result["status"], "booked");
        assert_eq!(result["table_name"], "Стол 2");

        let reqs = model.requests();
        assert_eq!(reqs.len(), 2);
        assert!(reqs[1].json_response);
        assert!(reqs[1].tools.is_empty());
        let tool_msg = reqs[1].messages.last().unwrap();
        assert_eq!(tool_msg.role, Role::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.name.as_deref(), Some("book_slot"));

        assert_eq!(h.book().upcoming(h.now()).await.len(), 1);
    }

    #[tokio::test]
    async fn every_tool_call_gets_a_result() {
        let model = ScriptedModel::new(vec![
            tool_calls(vec![
                ToolCall::function("a", "check_slot_availability", r#"{"date":"завтра","time":"19:00"}"#),
                ToolCall::function("b", "check_slot_availability", r#"{"date":"завтра","time":"20:00"}"#),
            ]),
            ChatMessage::assistant(r#"{"intent":"available","datetime":"2025-10-21 19:00"}"#),
        ]);
        let h = hostess(model.clone());

        let turn = h.handle_message(ChatId(1), "Свободно завтра в 19 или 20?").await.unwrap();
        assert_eq!(turn.reply.intent, Intent::Available);
        assert_eq!(turn.tools.len(), 2);

        let last = model.requests().pop().unwrap();
        let ids: Vec<_> = last
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn history_is_sent_on_the_next_turn() {
        let model = ScriptedModel::new(vec![
            ChatMessage::assistant(r#"{"intent":"booking_intent","message":"На какое время?"}"#),
            ChatMessage::assistant(r#"{"intent":"booking_intent","message":"Как вас зовут?"}"#),
        ]);
        let h = hostess(model.clone());

        h.handle_message(ChatId(5), "Хочу столик").await.unwrap();
        h.handle_message(ChatId(5), "На 19:00").await.unwrap();

        let second = &model.requests()[1];
        let texts: Vec<_> = second.messages.iter().skip(1).map(|m| m.text().to_string()).collect();
        assert_eq!(texts[0], "Хочу столик");
        assert!(texts[1].contains("На какое время?"));
        assert_eq!(texts[2], "На 19:00");
    }

    #[test]
    fn reply_parsing_is_lenient() {
        let fenced = AssistantReply::parse("```json\n{\"intent\": \"cancelled\", \"datetime\": \"x\"}\n```");
        assert_eq!(fenced.intent, Intent::Cancelled);

        let unknown = AssistantReply::parse(r#"{"intent": "small_talk", "message": "Ок"}"#);
        assert_eq!(unknown.intent, Intent::Other);
        assert_eq!(unknown.message.as_deref(), Some("Ок"));

        let prose = AssistantReply::parse("Конечно, ждём вас!");
        assert_eq!(prose.intent, Intent::Other);
        assert_eq!(prose.message.as_deref(), Some("Конечно, ждём вас!"));

        let nulls = AssistantReply::parse(
            r#"{"intent":"booked","message":null,"datetime":"2025-10-21 19:00","client_name":"Иван",
                "phone_number":"+79123456789","table_name":"Стол 2","zone":"зал","guests_count":4,
                "date":null,"time":null,"alternatives":null}"#,
        );
        assert_eq!(nulls.intent, Intent::Booked);
        assert_eq!(nulls.client_name.as_deref(), Some("Иван"));
        assert_eq!(nulls.guests_count, Some(4));
        assert!(nulls.alternatives.is_empty());

        let odd = AssistantReply::parse(
            r#"{"intent":null,"guests_count":"3 человека","alternatives":["2025-10-21 18:30", 5]}"#,
        );
        assert_eq!(odd.intent, Intent::Other);
        assert_eq!(odd.guests_count, Some(3));
        assert_eq!(odd.alternatives, vec!["2025-10-21 18:30".to_string()]);

        let empty = AssistantReply::parse("  ");
        assert_eq!(empty.intent, Intent::Other);
        assert_eq!(empty.message, None);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let model = ScriptedModel::new(vec![]);
        let h = hostess(model);
        assert!(h.handle_message(ChatId(1), "Привет").await.is_err());
    }
}
