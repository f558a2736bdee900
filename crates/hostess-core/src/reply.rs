//! Guest-facing text for an [`AssistantReply`] and the "typing like a human"
//! delay before it is sent.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime};
use rand::Rng;

use crate::{
    assistant::{AssistantReply, Intent},
    errors::Error,
    tools::TOOL_DATETIME_FORMAT,
    Result,
};

const FALLBACK: &str = "Извините, я не совсем поняла ваш запрос.";

pub fn render(reply: &AssistantReply, restaurant_name: &str) -> String {
    let when = reply
        .datetime
        .as_deref()
        .map(display_datetime)
        .unwrap_or_default();
    let name = reply.client_name.as_deref().unwrap_or("гость");

    match reply.intent {
        Intent::Greeting => format!(
            "Здравствуйте! Я хостесс ресторана \"{restaurant_name}\". Могу помочь вам забронировать столик или ответить на вопросы."
        ),
        Intent::Booked => {
            let mut out = format!("Отлично, {name}! Ваш столик забронирован на {when}");
            if let Some(place) = table_place(reply) {
                out.push_str(&format!(" ({place})"));
            }
            out.push('.');
            if let Some(guests) = reply.guests_count {
                out.push_str(&format!(" Количество гостей: {guests}."));
            }
            if let Some(phone) = reply.phone_number.as_deref() {
                out.push_str(&format!(" Номер телефона для связи: {phone}."));
            }
            out.push_str(" Ждем вас! Хорошего дня!");
            out
        }
        Intent::Available => {
            format!("Столик на {when} свободен. Могу забронировать его для вас?")
        }
        Intent::Unavailable => {
            let mut out = format!("К сожалению, столик на {when} уже занят.");
            if reply.alternatives.is_empty() {
                out.push_str(" Свободных слотов рядом нет, попробуйте выбрать другой день.");
            } else {
                out.push_str(" Могу предложить следующие свободные слоты:\n");
                let slots: Vec<String> = reply
                    .alternatives
                    .iter()
                    .map(|a| display_datetime(a))
                    .collect();
                out.push_str(&slots.join("\n"));
            }
            out
        }
        Intent::Cancelled => format!("Ваша бронь на {when} отменена. Будем рады видеть вас в другой раз!"),
        Intent::Changed => {
            let mut out = format!("Готово! Ваша бронь перенесена на {when}");
            if let Some(place) = table_place(reply) {
                out.push_str(&format!(" ({place})"));
            }
            out.push_str(". Ждем вас!");
            out
        }
        Intent::Error => {
            let mut out = format!(
                "Произошла ошибка: {}. Пожалуйста, попробуйте еще раз.",
                reply
                    .message
                    .as_deref()
                    .map(|m| m.trim_end_matches('.'))
                    .unwrap_or("Неизвестная ошибка")
            );
            if !reply.alternatives.is_empty() {
                out.push_str("\nСвободные слоты:\n");
                let slots: Vec<String> = reply
                    .alternatives
                    .iter()
                    .map(|a| display_datetime(a))
                    .collect();
                out.push_str(&slots.join("\n"));
            }
            out
        }
        Intent::BookingIntent | Intent::CancelIntent | Intent::ChangeIntent | Intent::Other => {
            reply
                .message
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(FALLBACK)
                .to_string()
        }
    }
}

fn table_place(reply: &AssistantReply) -> Option<String> {
    match (reply.table_name.as_deref(), reply.zone.as_deref()) {
        (Some(t), Some(z)) => Some(format!("{t}, {z}")),
        (Some(t), None) => Some(t.to_string()),
        (None, Some(z)) => Some(z.to_string()),
        (None, None) => None,
    }
}

/// `2025-10-21 19:00` or RFC 3339 -> `21.10.2025 19:00`; other text as is.
pub fn display_datetime(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, TOOL_DATETIME_FORMAT) {
        return dt.format("%d.%m.%Y %H:%M").to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%d.%m.%Y %H:%M").to_string();
    }
    raw.to_string()
}

/// Pause before answering: uniform(min, max) plus a per-character term.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyDelay {
    min: Duration,
    max: Duration,
    per_char: Duration,
}

impl ReplyDelay {
    pub fn new(min: Duration, max: Duration, per_char: Duration) -> Result<Self> {
        if min > max {
            return Err(Error::Config(format!(
                "reply delay min ({min:?}) is greater than max ({max:?})"
            )));
        }
        Ok(Self { min, max, per_char })
    }

    pub fn disabled() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
            per_char: Duration::ZERO,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero() && self.per_char.is_zero()
    }

    pub fn compute<R: Rng + ?Sized>(&self, text: &str, rng: &mut R) -> Duration {
        let base = if self.min == self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        };
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        base + self.per_char.saturating_mul(chars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn reply(intent: Intent) -> AssistantReply {
        AssistantReply {
            intent,
            ..Default::default()
        }
    }

    #[test]
    fn greeting_names_the_restaurant() {
        let text = render(&reply(Intent::Greeting), "Ромашка");
        assert!(text.starts_with("Здравствуйте!"));
        assert!(text.contains("\"Ромашка\""));
    }

    #[test]
    fn booked_confirmation_lists_details() {
        let r = AssistantReply {
            datetime: Some("2025-10-21 19:00".to_string()),
            client_name: Some("Иван".to_string()),
            phone_number: Some("+79123456789".to_string()),
            table_name: Some("Стол 2".to_string()),
            zone: Some("зал".to_string()),
            guests_count: Some(4),
            ..reply(Intent::Booked)
        };
        assert_eq!(
            render(&r, "Ромашка"),
            "Отлично, Иван! Ваш столик забронирован на 21.10.2025 19:00 (Стол 2, зал). \
             Количество гостей: 4. Номер телефона для связи: +79123456789. Ждем вас! Хорошего дня!"
        );
    }

    #[test]
    fn unavailable_lists_alternatives_one_per_line() {
        let r = AssistantReply {
            datetime: Some("2025-10-21 19:00".to_string()),
            alternatives: vec!["2025-10-21 18:30".to_string(), "2025-10-21 19:30".to_string()],
            ..reply(Intent::Unavailable)
        };
        let text = render(&r, "Ромашка");
        assert!(text.starts_with("К сожалению, столик на 21.10.2025 19:00 уже занят."));
        assert!(text.ends_with(":\n21.10.2025 18:30\n21.10.2025 19:30"));

        let none = AssistantReply {
            alternatives: Vec::new(),
            ..r
        };
        assert!(render(&none, "Ромашка").contains("другой день"));
    }

    #[test]
    fn error_and_fallbacks() {
        let err = AssistantReply {
            message: Some("это время уже прошло".to_string()),
            ..reply(Intent::Error)
        };
        assert_eq!(
            render(&err, "Ромашка"),
            "Произошла ошибка: это время уже прошло. Пожалуйста, попробуйте еще раз."
        );
        assert!(render(&reply(Intent::Error), "Ромашка").contains("Неизвестная ошибка"));

        let ask = AssistantReply {
            message: Some("На какое время?".to_string()),
            ..reply(Intent::BookingIntent)
        };
        assert_eq!(render(&ask, "Ромашка"), "На какое время?");
        assert_eq!(render(&reply(Intent::Other), "Ромашка"), FALLBACK);
    }

    #[test]
    fn datetimes_are_shown_day_first() {
        assert_eq!(display_datetime("2025-10-21 19:00"), "21.10.2025 19:00");
        assert_eq!(display_datetime("2025-10-21T19:00:00+03:00"), "21.10.2025 19:00");
        assert_eq!(display_datetime("завтра вечером"), "завтра вечером");
    }

    #[test]
    fn delay_is_bounded_and_grows_with_length() {
        let d = ReplyDelay::new(
            Duration::from_secs(5),
            Duration::from_secs(20),
            Duration::from_millis(100),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let v = d.compute("0123456789", &mut rng);
            assert!(v >= Duration::from_secs(6) && v <= Duration::from_secs(21));
        }

        let fixed = ReplyDelay::new(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(fixed.compute("абв", &mut rng), Duration::from_millis(1030));

        assert!(ReplyDelay::disabled().is_disabled());
        assert_eq!(ReplyDelay::disabled().compute("text", &mut rng), Duration::ZERO);
        assert!(ReplyDelay::new(Duration::from_secs(2), Duration::from_secs(1), Duration::ZERO).is_err());
    }
}
