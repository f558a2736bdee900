//! Telegram text helpers: HTML escaping, message splitting and the staff
//! reservation listing.

use crate::reservations::{Reservation, ReservationBook};

/// Telegram's hard limit for one message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Split on line boundaries so that every chunk has at most `max_chars` chars.
/// A single overlong line is cut hard.
pub fn split_text(s: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;

    for line in s.split('\n') {
        let line_len = line.chars().count();
        let needed = if cur.is_empty() { line_len } else { line_len + 1 };
        if cur_len + needed > max_chars && !cur.is_empty() {
            out.push(std::mem::take(&mut cur));
            cur_len = 0;
        }

        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for chunk in chars.chunks(max_chars) {
                out.push(chunk.iter().collect());
            }
            continue;
        }

        if !cur.is_empty() {
            cur.push('\n');
            cur_len += 1;
        }
        cur.push_str(line);
        cur_len += line_len;
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

/// HTML list of upcoming reservations for `/bookings`.
pub fn format_bookings(book: &ReservationBook, reservations: &[Reservation]) -> String {
    if reservations.is_empty() {
        return "Предстоящих бронирований нет.".to_string();
    }

    let mut out = format!("<b>Предстоящие бронирования ({})</b>\n", reservations.len());
    let mut current_day = None;
    for r in reservations {
        let day = r.start.date_naive();
        if current_day != Some(day) {
            out.push_str(&format!("\n<b>{}</b>\n", day.format("%d.%m.%Y")));
            current_day = Some(day);
        }
        let table = book
            .table(r.table_id)
            .map(|t| format!("{} ({})", t.name, t.zone.label()))
            .unwrap_or_else(|| format!("стол #{}", r.table_id));
        out.push_str(&format!(
            "{} · {} · {} чел. · {} · <code>{}</code>\n",
            r.start.format("%H:%M"),
            escape_html(&table),
            r.guests_count,
            escape_html(&r.client_name),
            escape_html(&r.phone_number),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::default_tables,
        reservations::{BookSettings, OpeningHours},
    };
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn split_prefers_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_text(text, 9), vec!["aaaa\nbbbb", "cccc"]);
        assert_eq!(split_text("ббббб", 2), vec!["бб", "бб", "б"]);
        assert_eq!(split_text("short", 4096), vec!["short"]);
    }

    #[tokio::test]
    async fn bookings_are_grouped_by_day_and_escaped() {
        let msk = FixedOffset::east_opt(3 * 3600).unwrap();
        let book = ReservationBook::in_memory(BookSettings {
            offset: msk,
            slot_minutes: 30,
            hours: OpeningHours {
                open_minute: 8 * 60,
                close_minute: 24 * 60,
            },
            tables: default_tables(),
        });
        let now = msk.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        let at = |d, h| msk.with_ymd_and_hms(2025, 10, d, h, 0, 0).unwrap();
        book.book(at(21, 19), "<Иван>", "+79123456789", 2, now)
            .await
            .unwrap();
        book.book(at(22, 13), "Мария", "+79000000000", 6, now)
            .await
            .unwrap();

        let html = format_bookings(&book, &book.upcoming(now).await);
        assert!(html.contains("(2)"));
        assert!(html.contains("<b>21.10.2025</b>"));
        assert!(html.contains("<b>22.10.2025</b>"));
        assert!(html.contains("19:00 · Стол 1 (зал) · 2 чел. · &lt;Иван&gt;"));
        assert!(html.contains("13:00 · Стол 3 (зал) · 6 чел."));

        assert_eq!(format_bookings(&book, &[]), "Предстоящих бронирований нет.");
    }
}
