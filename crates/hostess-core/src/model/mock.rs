//! Offline keyword model (`LLM_MOCK=1`).
//!
//! Recognizes two canned booking requests and a few greetings. When tools are
//! offered it books through `book_slot`, and it echoes tool results back as the
//! final answer, so the whole pipeline can run without an API key.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::Result;

use super::{client::ChatModel, types::*};

#[derive(Clone, Debug, Default)]
pub struct KeywordModel;

impl KeywordModel {
    pub fn new() -> Self {
        Self
    }

    fn canned_booking(text: &str) -> Option<Value> {
        let t = text.to_lowercase();
        if !t.contains("забронировать") {
            return None;
        }
        if t.contains("сегодня")
            && t.contains("18:00")
            && t.contains("иван")
            && t.contains("1234567890")
        {
            return Some(json!({
                "date": "сегодня",
                "time": "18:00",
                "client_name": "Иван",
                "phone_number": "+791234567890",
            }));
        }
        if t.contains("завтра")
            && t.contains("20:30")
            && t.contains("мария")
            && t.contains("0987654321")
        {
            return Some(json!({
                "date": "завтра",
                "time": "20:30",
                "client_name": "Мария",
                "phone_number": "+790987654321",
            }));
        }
        None
    }

    fn is_small_talk(text: &str) -> bool {
        let t = text.to_lowercase();
        ["привет", "здравствуйте", "спасибо", "до свидания"]
            .iter()
            .any(|w| t.contains(w))
    }
}

#[async_trait]
impl ChatModel for KeywordModel {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse> {
        // Second round: turn the tool result into the final answer.
        if let Some(last) = req.messages.last().filter(|m| m.role == Role::Tool) {
            let mut v: Value = serde_json::from_str(last.text())?;
            let status = v.get("status").cloned().unwrap_or(json!("other"));
            if let Some(obj) = v.as_object_mut() {
                obj.insert("intent".to_string(), status);
            }
            return Ok(ChatResponse {
                message: ChatMessage::assistant(v.to_string()),
                usage: None,
            });
        }

        let user_text = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text().to_string())
            .unwrap_or_default();

        if let Some(args) = Self::canned_booking(&user_text) {
            if req.tools.iter().any(|t| t.function.name == "book_slot") {
                let call = ToolCall::function("mock-call-1", "book_slot", args.to_string());
                return Ok(ChatResponse {
                    message: ChatMessage {
                        role: Role::Assistant,
                        content: None,
                        tool_calls: vec![call],
                        tool_call_id: None,
                        name: None,
                    },
                    usage: None,
                });
            }
            let mut out = args;
            if let Some(obj) = out.as_object_mut() {
                obj.insert("intent".to_string(), json!("booking_intent"));
            }
            return Ok(ChatResponse {
                message: ChatMessage::assistant(out.to_string()),
                usage: None,
            });
        }

        let intent = if Self::is_small_talk(&user_text) {
            "greeting"
        } else {
            "other"
        };
        Ok(ChatResponse {
            message: ChatMessage::assistant(json!({ "intent": intent }).to_string()),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str, tools: bool) -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user(text)],
            tools: if tools {
                vec![ToolDefinition::function("book_slot", "d", json!({}))]
            } else {
                Vec::new()
            },
            json_response: false,
        }
    }

    #[tokio::test]
    async fn greeting_and_other() {
        let m = KeywordModel::new();
        let out = m.complete(request("Здравствуйте!", true)).await.unwrap();
        assert_eq!(out.message.text(), r#"{"intent":"greeting"}"#);

        let out = m.complete(request("Как дела?", true)).await.unwrap();
        assert_eq!(out.message.text(), r#"{"intent":"other"}"#);
    }

    #[tokio::test]
    async fn canned_booking_requests_tool_when_offered() {
        let m = KeywordModel::new();
        let text = "Хочу забронировать столик сегодня на 18:00, Иван, 1234567890";

        let out = m.complete(request(text, true)).await.unwrap();
        assert_eq!(out.message.tool_calls.len(), 1);
        let call = &out.message.tool_calls[0];
        assert_eq!(call.function.name, "book_slot");
        let args: Value = serde_json::from_str(&call.function.arguments).unwrap();
        assert_eq!(args["client_name"], "Иван");

        let out = m.complete(request(text, false)).await.unwrap();
        let v: Value = serde_json::from_str(out.message.text()).unwrap();
        assert_eq!(v["intent"], "booking_intent");
        assert_eq!(v["time"], "18:00");
    }

    #[tokio::test]
    async fn tool_result_becomes_final_answer() {
        let m = KeywordModel::new();
        let call = ToolCall::function("c1", "book_slot", "{}");
        let mut req = request("x", false);
        req.messages.push(ChatMessage::tool_result(
            &call,
            r#"{"status":"booked","table_name":"Стол 1"}"#,
        ));

        let out = m.complete(req).await.unwrap();
        let v: Value = serde_json::from_str(out.message.text()).unwrap();
        assert_eq!(v["intent"], "booked");
        assert_eq!(v["table_name"], "Стол 1");
    }
}
