//! Function tools offered to the model and their execution against the
//! reservation book.
//!
//! Every tool answers with a JSON object carrying a `status`; failures are
//! reported in-band (`"status": "error"`) so the model can explain them.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    dates::{parse_date, parse_date_time},
    errors::{Error, ReservationError},
    model::types::ToolDefinition,
    reservations::ReservationBook,
};

pub const CHECK_SLOT_AVAILABILITY: &str = "check_slot_availability";
pub const BOOK_SLOT: &str = "book_slot";
pub const CANCEL_RESERVATION: &str = "cancel_reservation";
pub const CHANGE_RESERVATION: &str = "change_reservation";

/// Wire format for datetimes in tool results.
pub const TOOL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";

const DATE_DESCRIPTION: &str =
    "Дата бронирования в формате 'YYYY-MM-DD' или относительная дата (например, 'сегодня', 'завтра').";
const TIME_DESCRIPTION: &str = "Время бронирования в формате 'HH:MM'.";

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::function(
            CHECK_SLOT_AVAILABILITY,
            "Проверяет доступность столика на указанную дату и время. Возвращает информацию о доступности и, если слот занят, предлагает альтернативные варианты.",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": DATE_DESCRIPTION },
                    "time": { "type": "string", "description": TIME_DESCRIPTION },
                    "guests_count": { "type": "integer", "description": "Количество гостей (по умолчанию 2)." },
                },
                "required": ["date", "time"],
            }),
        ),
        ToolDefinition::function(
            BOOK_SLOT,
            "Бронирует столик на указанную дату и время для клиента. Возвращает подтверждение бронирования или информацию о том, что подходящих столиков нет.",
            json!({
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": DATE_DESCRIPTION },
                    "time": { "type": "string", "description": TIME_DESCRIPTION },
                    "client_name": { "type": "string", "description": "Имя клиента, который бронирует столик." },
                    "phone_number": { "type": "string", "description": "Номер телефона клиента для связи." },
                    "guests_count": { "type": "integer", "description": "Количество гостей (по умолчанию 2)." },
                },
                "required": ["date", "time", "client_name", "phone_number"],
            }),
        ),
        ToolDefinition::function(
            CANCEL_RESERVATION,
            "Отменяет существующее бронирование по номеру телефона клиента.",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": { "type": "string", "description": "Номер телефона клиента, чью бронь нужно отменить." },
                    "date": { "type": "string", "description": "Опционально: дата отменяемой брони." },
                },
                "required": ["phone_number"],
            }),
        ),
        ToolDefinition::function(
            CHANGE_RESERVATION,
            "Переносит существующее бронирование на новое время/дату по номеру телефона клиента.",
            json!({
                "type": "object",
                "properties": {
                    "phone_number": { "type": "string", "description": "Номер телефона клиента." },
                    "new_date": { "type": "string", "description": "Новая дата бронирования." },
                    "new_time": { "type": "string", "description": "Новое время бронирования." },
                    "old_date": { "type": "string", "description": "Опционально: текущая дата бронирования (для уточнения)." },
                },
                "required": ["phone_number", "new_date", "new_time"],
            }),
        ),
    ]
}

#[derive(Deserialize)]
struct CheckArgs {
    date: String,
    time: String,
    #[serde(default)]
    guests_count: Option<Value>,
}

#[derive(Deserialize)]
struct BookArgs {
    date: String,
    time: String,
    client_name: String,
    phone_number: String,
    #[serde(default)]
    guests_count: Option<Value>,
}

#[derive(Deserialize)]
struct CancelArgs {
    phone_number: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct ChangeArgs {
    phone_number: String,
    new_date: String,
    new_time: String,
    #[serde(default)]
    old_date: Option<String>,
}

/// Party size as models send it: `4`, `4.0`, `"4"`, `"4 человека"`.
pub(crate) fn party_size(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => match n.as_u64() {
            Some(n) => u32::try_from(n).ok(),
            None => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
                .map(|f| f as u32),
        },
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Optional numeric field read through [`party_size`]; unusable values read as absent.
pub(crate) fn lenient_u32<'de, D>(de: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Option::<Value>::deserialize(de)?;
    Ok(v.as_ref().and_then(party_size))
}

pub struct ToolExecutor {
    book: Arc<ReservationBook>,
    clock: Clock,
    default_guests: u32,
    alternatives: usize,
}

impl ToolExecutor {
    pub fn new(
        book: Arc<ReservationBook>,
        clock: Clock,
        default_guests: u32,
        alternatives: usize,
    ) -> Self {
        Self {
            book,
            clock,
            default_guests,
            alternatives,
        }
    }

    /// Run tool `name` with JSON-encoded `arguments`; always returns a JSON object.
    pub async fn execute(&self, name: &str, arguments: &str) -> String {
        let result = match name {
            CHECK_SLOT_AVAILABILITY => match parse_args::<CheckArgs>(arguments) {
                Ok(args) => self.check_slot_availability(args).await,
                Err(e) => e,
            },
            BOOK_SLOT => match parse_args::<BookArgs>(arguments) {
                Ok(args) => self.book_slot(args).await,
                Err(e) => e,
            },
            CANCEL_RESERVATION => match parse_args::<CancelArgs>(arguments) {
                Ok(args) => self.cancel_reservation(args).await,
                Err(e) => e,
            },
            CHANGE_RESERVATION => match parse_args::<ChangeArgs>(arguments) {
                Ok(args) => self.change_reservation(args).await,
                Err(e) => e,
            },
            other => {
                warn!(tool = other, "model requested unknown tool");
                error_json(&format!("Неизвестная функция: {other}."))
            }
        };

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(tool = name, status, "tool executed");
        result.to_string()
    }

    async fn check_slot_availability(&self, args: CheckArgs) -> Value {
        let now = self.clock.now();
        let Some(dt) = parse_date_time(&args.date, &args.time, now) else {
            return bad_datetime();
        };
        let guests = match self.guests(args.guests_count.as_ref()) {
            Ok(g) => g,
            Err(e) => return e,
        };

        match self.book.find_available_table(dt, guests, now).await {
            Ok(Some(table)) => json!({
                "status": "available",
                "datetime": fmt_dt(self.book.normalize(dt)),
                "guests_count": guests,
                "zone": table.zone.label(),
            }),
            Ok(None) => self.unavailable(dt, guests, now).await,
            Err(e) => error_json(&e.to_string()),
        }
    }

    async fn book_slot(&self, args: BookArgs) -> Value {
        let now = self.clock.now();
        let Some(dt) = parse_date_time(&args.date, &args.time, now) else {
            return bad_datetime();
        };
        let guests = match self.guests(args.guests_count.as_ref()) {
            Ok(g) => g,
            Err(e) => return e,
        };
        if args.client_name.trim().is_empty() || args.phone_number.trim().is_empty() {
            return error_json("Для брони нужны имя и номер телефона.");
        }

        match self
            .book
            .book(dt, &args.client_name, &args.phone_number, guests, now)
            .await
        {
            Ok(b) => json!({
                "status": "booked",
                "datetime": fmt_dt(b.datetime),
                "client_name": args.client_name.trim(),
                "phone_number": args.phone_number.trim(),
                "table_name": b.table_name,
                "zone": b.zone.label(),
                "guests_count": b.guests_count,
            }),
            Err(Error::Reservation(ReservationError::Unavailable)) => {
                let mut v = self.unavailable(dt, guests, now).await;
                v["status"] = json!("error");
                v["message"] = json!(ReservationError::Unavailable.to_string());
                v
            }
            Err(e) => self.failure(e),
        }
    }

    async fn cancel_reservation(&self, args: CancelArgs) -> Value {
        let now = self.clock.now();
        let date = match args.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => match parse_date(raw, now.date_naive()) {
                Some(d) => Some(d),
                None => return bad_datetime(),
            },
            None => None,
        };

        match self.book.cancel(&args.phone_number, date, now).await {
            Ok(r) => json!({
                "status": "cancelled",
                "phone_number": args.phone_number.trim(),
                "client_name": r.client_name,
                "datetime": fmt_dt(r.start),
            }),
            Err(e) => self.failure(e),
        }
    }

    async fn change_reservation(&self, args: ChangeArgs) -> Value {
        let now = self.clock.now();
        let Some(new_dt) = parse_date_time(&args.new_date, &args.new_time, now) else {
            return bad_datetime();
        };
        let old_date = match args.old_date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(raw) => match parse_date(raw, now.date_naive()) {
                Some(d) => Some(d),
                None => return bad_datetime(),
            },
            None => None,
        };

        match self
            .book
            .reschedule(&args.phone_number, old_date, new_dt, now)
            .await
        {
            Ok(b) => json!({
                "status": "changed",
                "datetime": fmt_dt(b.datetime),
                "phone_number": args.phone_number.trim(),
                "table_name": b.table_name,
                "zone": b.zone.label(),
                "guests_count": b.guests_count,
            }),
            Err(e) => self.failure(e),
        }
    }

    /// Absent party size means the default; a given but unusable one is an error,
    /// never silently replaced.
    fn guests(&self, raw: Option<&Value>) -> std::result::Result<u32, Value> {
        match raw {
            None | Some(Value::Null) => Ok(self.default_guests),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(self.default_guests),
            Some(v) => party_size(v).filter(|n| *n > 0).ok_or_else(|| {
                warn!(guests = %v, "unusable party size");
                error_json("Некорректное количество гостей.")
            }),
        }
    }

    async fn unavailable(
        &self,
        dt: DateTime<FixedOffset>,
        guests: u32,
        now: DateTime<FixedOffset>,
    ) -> Value {
        let alternatives = self
            .book
            .alternatives(dt, guests, self.alternatives, now)
            .await
            .into_iter()
            .map(fmt_dt)
            .collect::<Vec<_>>();
        json!({
            "status": "unavailable",
            "datetime": fmt_dt(self.book.normalize(dt)),
            "guests_count": guests,
            "alternatives": alternatives,
        })
    }

    fn failure(&self, e: Error) -> Value {
        match e {
            Error::Reservation(r) => error_json(&r.to_string()),
            other => {
                error!(error = %other, "reservation book failure");
                error_json("Не удалось обработать бронирование, попробуйте чуть позже.")
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: &str) -> std::result::Result<T, Value> {
    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(raw).map_err(|e| {
        warn!(error = %e, "bad tool arguments");
        error_json(&format!("Некорректные параметры: {e}"))
    })
}

fn fmt_dt(dt: DateTime<FixedOffset>) -> String {
    dt.format(TOOL_DATETIME_FORMAT).to_string()
}

fn bad_datetime() -> Value {
    error_json("Некорректный формат даты или времени.")
}

fn error_json(message: &str) -> Value {
    json!({ "status": "error", "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::default_tables,
        reservations::{BookSettings, OpeningHours},
    };
    use chrono::TimeZone;

    fn executor() -> ToolExecutor {
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
        ToolExecutor::new(book, Clock::Fixed(now), 2, 5)
    }

    async fn run(ex: &ToolExecutor, name: &str, args: Value) -> Value {
        serde_json::from_str(&ex.execute(name, &args.to_string()).await).unwrap()
    }

    #[test]
    fn four_function_tools_with_required_fields() {
        let defs = definitions();
        let names: Vec<_> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                CHECK_SLOT_AVAILABILITY,
                BOOK_SLOT,
                CANCEL_RESERVATION,
                CHANGE_RESERVATION
            ]
        );
        assert!(defs.iter().all(|d| d.kind == "function"));
        assert_eq!(
            defs[1].function.parameters["required"],
            json!(["date", "time", "client_name", "phone_number"])
        );
    }

    #[tokio::test]
    async fn book_then_check_reports_alternatives() {
        let ex = executor();

        let v = run(
            &ex,
            BOOK_SLOT,
            json!({"date": "завтра", "time": "19:00", "client_name": "Иван", "phone_number": "+79123456789", "guests_count": "8"}),
        )
        .await;
        assert_eq!(v["status"], "booked");
        assert_eq!(v["datetime"], "2025-10-21 19:00");
        assert_eq!(v["table_name"], "Веранда 2");
        assert_eq!(v["zone"], "веранда");
        assert_eq!(v["guests_count"], 8);

        let v = run(
            &ex,
            CHECK_SLOT_AVAILABILITY,
            json!({"date": "2025-10-21", "time": "19:15", "guests_count": 8}),
        )
        .await;
        assert_eq!(v["status"], "unavailable");
        assert_eq!(v["datetime"], "2025-10-21 19:00");
        assert_eq!(v["alternatives"].as_array().unwrap().len(), 5);

        let v = run(
            &ex,
            CHECK_SLOT_AVAILABILITY,
            json!({"date": "2025-10-21", "time": "19:00"}),
        )
        .await;
        assert_eq!(v["status"], "available");
        assert_eq!(v["guests_count"], 2);
    }

    #[tokio::test]
    async fn failed_booking_still_offers_alternatives() {
        let ex = executor();
        let args = json!({"date": "завтра", "time": "19:00", "client_name": "A", "phone_number": "1", "guests_count": 8});
        run(&ex, BOOK_SLOT, args.clone()).await;

        let v = run(&ex, BOOK_SLOT, args).await;
        assert_eq!(v["status"], "error");
        assert!(v["message"].as_str().unwrap().contains("нет"));
        assert!(!v["alternatives"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_and_change_by_phone() {
        let ex = executor();
        run(
            &ex,
            BOOK_SLOT,
            json!({"date": "завтра", "time": "19:00", "client_name": "Иван", "phone_number": "+79123456789"}),
        )
        .await;

        let v = run(
            &ex,
            CHANGE_RESERVATION,
            json!({"phone_number": "89123456789", "new_date": "завтра", "new_time": "20:30", "old_date": "завтра"}),
        )
        .await;
        assert_eq!(v["status"], "changed");
        assert_eq!(v["datetime"], "2025-10-21 20:30");

        let v = run(&ex, CANCEL_RESERVATION, json!({"phone_number": "+7 912 345 67 89"})).await;
        assert_eq!(v["status"], "cancelled");
        assert_eq!(v["client_name"], "Иван");
        assert_eq!(v["datetime"], "2025-10-21 20:30");

        let v = run(&ex, CANCEL_RESERVATION, json!({"phone_number": "+79123456789"})).await;
        assert_eq!(v["status"], "error");
        assert_eq!(v["message"], "бронирование не найдено");
    }

    #[test]
    fn party_size_accepts_what_models_send() {
        assert_eq!(party_size(&json!(4)), Some(4));
        assert_eq!(party_size(&json!(6.0)), Some(6));
        assert_eq!(party_size(&json!("6")), Some(6));
        assert_eq!(party_size(&json!("6 человек")), Some(6));
        assert_eq!(party_size(&json!(-6)), None);
        assert_eq!(party_size(&json!(2.5)), None);
        assert_eq!(party_size(&json!("шестеро")), None);
        assert_eq!(party_size(&json!(true)), None);
    }

    #[tokio::test]
    async fn party_size_is_never_replaced_by_the_default() {
        let ex = executor();
        let book = |guests: Value| {
            json!({"date": "завтра", "time": "19:00", "client_name": "Иван", "phone_number": "+79123456789", "guests_count": guests})
        };

        let v = run(&ex, BOOK_SLOT, book(json!(6.0))).await;
        assert_eq!(v["status"], "booked");
        assert_eq!(v["guests_count"], 6);
        assert_eq!(v["table_name"], "Стол 3");

        let v = run(&ex, BOOK_SLOT, book(json!("6 человек"))).await;
        assert_eq!(v["status"], "booked");
        assert_eq!(v["guests_count"], 6);
        assert_eq!(v["table_name"], "Веранда 2");

        for bad in [json!(-6), json!(2.5), json!("шестеро"), json!(0)] {
            let v = run(&ex, BOOK_SLOT, book(bad)).await;
            assert_eq!(v["status"], "error");
            assert_eq!(v["message"], "Некорректное количество гостей.");
        }

        let v = run(
            &ex,
            CHECK_SLOT_AVAILABILITY,
            json!({"date": "завтра", "time": "20:00", "guests_count": -2}),
        )
        .await;
        assert_eq!(v["message"], "Некорректное количество гостей.");

        let v = run(
            &ex,
            CHECK_SLOT_AVAILABILITY,
            json!({"date": "завтра", "time": "20:00", "guests_count": null}),
        )
        .await;
        assert_eq!(v["status"], "available");
        assert_eq!(v["guests_count"], 2);
    }

    #[tokio::test]
    async fn bad_input_is_reported_in_band() {
        let ex = executor();

        let v = run(&ex, CHECK_SLOT_AVAILABILITY, json!({"date": "когда-нибудь", "time": "19:00"})).await;
        assert_eq!(v["message"], "Некорректный формат даты или времени.");

        let v = run(&ex, CHECK_SLOT_AVAILABILITY, json!({"date": "завтра", "time": "06:00"})).await;
        assert_eq!(v["status"], "error");
        assert!(v["message"].as_str().unwrap().contains("08:00"));

        let v: Value = serde_json::from_str(&ex.execute(BOOK_SLOT, "not json").await).unwrap();
        assert_eq!(v["status"], "error");

        let v: Value = serde_json::from_str(&ex.execute("order_pizza", "{}").await).unwrap();
        assert_eq!(v["status"], "error");
    }
}
