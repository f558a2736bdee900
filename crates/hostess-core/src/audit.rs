//! Append-only audit trail of guest traffic and reservation tool calls,
//! written to `DATA_DIR/audit.log` as plain text blocks or JSON lines.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl AuditEvent {
    fn base(event: &str, user_id: i64, username: &str, chat_id: i64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            user_id: Some(user_id),
            username: Some(username.to_string()),
            chat_id: Some(chat_id),
            content: None,
            response: None,
            intent: None,
            tool_name: None,
            tool_input: None,
            tool_result: None,
            error: None,
            retry_after: None,
        }
    }

    pub fn message(
        user_id: i64,
        username: &str,
        chat_id: i64,
        content: &str,
        response: &str,
        intent: &str,
    ) -> Self {
        Self {
            content: Some(content.to_string()),
            response: Some(response.to_string()),
            intent: Some(intent.to_string()),
            ..Self::base("message", user_id, username, chat_id)
        }
    }

    pub fn command(user_id: i64, username: &str, chat_id: i64, command: &str) -> Self {
        Self {
            content: Some(command.to_string()),
            ..Self::base("command", user_id, username, chat_id)
        }
    }

    /// Arguments and results are JSON text; unparseable text is kept as a string.
    pub fn tool_call(
        user_id: i64,
        username: &str,
        chat_id: i64,
        tool_name: &str,
        arguments: &str,
        result: &str,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.to_string()),
            tool_input: Some(json_or_string(arguments)),
            tool_result: Some(json_or_string(result)),
            ..Self::base("tool_call", user_id, username, chat_id)
        }
    }

    pub fn error(user_id: i64, username: &str, chat_id: i64, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::base("error", user_id, username, chat_id)
        }
    }

    pub fn rate_limit(user_id: i64, username: &str, chat_id: i64, retry_after: f64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::base("rate_limit", user_id, username, chat_id)
        }
    }
}

fn json_or_string(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.response {
            event.response = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(v) = &event.tool_input {
            event.tool_input = Some(truncate_json_strings(v, AUDIT_MAX_TEXT));
        }
        if let Some(v) = &event.tool_result {
            event.tool_result = Some(truncate_json_strings(v, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

fn truncate_json_strings(v: &Value, max_chars: usize) -> Value {
    match v {
        Value::String(s) => Value::String(truncate_text(s, max_chars)),
        Value::Array(xs) => Value::Array(xs.iter().map(|x| truncate_json_strings(x, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_json_strings(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn json_value_to_display(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}
