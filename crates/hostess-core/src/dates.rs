//! Date/time phrases as guests (and the model) write them.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use regex::Regex;

const MONTHS_GENITIVE: [&str; 12] = [
    "января",
    "февраля",
    "марта",
    "апреля",
    "мая",
    "июня",
    "июля",
    "августа",
    "сентября",
    "октября",
    "ноября",
    "декабря",
];

fn day_month_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})\s+(\p{L}+)$").expect("valid regex"))
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid regex"))
}

/// `DD.MM.YYYY` or `DD.MM.YY`.
fn dotted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{4}|\d{2})$").expect("valid regex")
    })
}

/// Parse a reservation date relative to `today` (restaurant local date).
///
/// Dates without a year roll over to next year once they have passed.
pub fn parse_date(input: &str, today: NaiveDate) -> Option<NaiveDate> {
    let s = input.trim().to_lowercase();
    match s.as_str() {
        "сегодня" | "today" => return Some(today),
        "завтра" | "tomorrow" => return Some(today + Duration::days(1)),
        "послезавтра" | "day after tomorrow" => return Some(today + Duration::days(2)),
        _ => {}
    }

    if let Some(caps) = iso_re().captures(&s) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }
    if let Some(caps) = dotted_re().captures(&s) {
        let year: i32 = caps[3].parse().ok()?;
        // Two-digit years are this century.
        let year = if caps[3].len() == 2 { 2000 + year } else { year };
        return NaiveDate::from_ymd_opt(year, caps[2].parse().ok()?, caps[1].parse().ok()?);
    }

    if let Some(caps) = day_month_re().captures(&s) {
        let day: u32 = caps[1].parse().ok()?;
        let month = MONTHS_GENITIVE.iter().position(|m| *m == &caps[2])? as u32 + 1;
        return upcoming(day, month, today);
    }

    if let Some((d, m)) = s.split_once('.') {
        if !m.contains('.') {
            let day: u32 = d.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            return upcoming(day, month, today);
        }
    }

    None
}

/// `HH:MM` (single-digit hours accepted).
pub fn parse_time(input: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M").ok()
}

/// Attach the restaurant offset to a local date + time.
pub fn combine(
    date: NaiveDate,
    time: NaiveTime,
    offset: FixedOffset,
) -> Option<DateTime<FixedOffset>> {
    offset.from_local_datetime(&date.and_time(time)).single()
}

/// Parse `date` + `time` phrases into a restaurant-local instant.
pub fn parse_date_time(
    date: &str,
    time: &str,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let offset = *now.offset();
    let d = parse_date(date, now.date_naive())?;
    let t = parse_time(time)?;
    combine(d, t, offset)
}

fn upcoming(day: u32, month: u32, today: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(d) if d >= today => Some(d),
        // Already passed (or 29 Feb in a non-leap year): try next year.
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn relative_words_in_both_languages() {
        let today = d(2025, 10, 20);
        assert_eq!(parse_date("Сегодня", today), Some(today));
        assert_eq!(parse_date(" today ", today), Some(today));
        assert_eq!(parse_date("завтра", today), Some(d(2025, 10, 21)));
        assert_eq!(parse_date("tomorrow", today), Some(d(2025, 10, 21)));
        assert_eq!(parse_date("послезавтра", today), Some(d(2025, 10, 22)));
    }

    #[test]
    fn month_names_roll_to_next_year_once_passed() {
        let today = d(2025, 10, 20);
        assert_eq!(parse_date("25 октября", today), Some(d(2025, 10, 25)));
        assert_eq!(parse_date("20 октября", today), Some(d(2025, 10, 20)));
        assert_eq!(parse_date("5 Марта", today), Some(d(2026, 3, 5)));
        assert_eq!(parse_date("31 ноября", today), None);
        assert_eq!(parse_date("5 брюмера", today), None);
    }

    #[test]
    fn numeric_formats() {
        let today = d(2025, 10, 20);
        assert_eq!(parse_date("2025-12-31", today), Some(d(2025, 12, 31)));
        assert_eq!(parse_date("25.10.2025", today), Some(d(2025, 10, 25)));
        assert_eq!(parse_date("25.10.25", today), Some(d(2025, 10, 25)));
        assert_eq!(parse_date("5.1.26", today), Some(d(2026, 1, 5)));
        assert_eq!(parse_date("25.10.025", today), None);
        assert_eq!(parse_date("25-10-20", today), None);
        assert_eq!(parse_date("31.02.2026", today), None);
        assert_eq!(parse_date("25.10", today), Some(d(2025, 10, 25)));
        assert_eq!(parse_date("01.02", today), Some(d(2026, 2, 1)));
        assert_eq!(parse_date("32.01", today), None);
        assert_eq!(parse_date("когда-нибудь", today), None);
    }

    #[test]
    fn times() {
        assert_eq!(parse_time("18:00"), NaiveTime::from_hms_opt(18, 0, 0));
        assert_eq!(parse_time(" 20:30 "), NaiveTime::from_hms_opt(20, 30, 0));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("вечером"), None);
    }

    #[test]
    fn date_time_uses_the_offset_of_now() {
        let msk = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = msk.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        let dt = parse_date_time("завтра", "19:30", now).unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-21T19:30:00+03:00");
        assert!(parse_date_time("завтра", "вечером", now).is_none());
    }
}
