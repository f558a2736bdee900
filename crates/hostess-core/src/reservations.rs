//! Table reservation book.
//!
//! Time is split into fixed slots (30 minutes by default). A reservation holds
//! one table for one slot. Requests are snapped down to the slot start, so a
//! request for 14:15 competes for the 14:00 slot.

use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{errors::ReservationError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    Hall,
    Veranda,
}

impl Zone {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hall" | "зал" => Some(Zone::Hall),
            "veranda" | "веранда" => Some(Zone::Veranda),
            _ => None,
        }
    }

    /// Guest-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Zone::Hall => "зал",
            Zone::Veranda => "веранда",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: u32,
    pub name: String,
    pub zone: Zone,
    pub capacity: u32,
}

/// Daily opening hours as minutes after local midnight. `close_minute` may be
/// 1440 (midnight).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpeningHours {
    pub open_minute: u32,
    pub close_minute: u32,
}

impl OpeningHours {
    pub fn open_label(&self) -> String {
        clock_label(self.open_minute)
    }

    pub fn close_label(&self) -> String {
        clock_label(self.close_minute)
    }
}

fn clock_label(minute: u32) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[derive(Clone, Debug)]
pub struct BookSettings {
    pub offset: FixedOffset,
    pub slot_minutes: u32,
    pub hours: OpeningHours,
    pub tables: Vec<Table>,
}

impl BookSettings {
    pub fn max_capacity(&self) -> u32 {
        self.tables.iter().map(|t| t.capacity).max().unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: u64,
    pub table_id: u32,
    pub start: DateTime<FixedOffset>,
    pub client_name: String,
    pub phone_number: String,
    pub guests_count: u32,
    pub booked_at: DateTime<FixedOffset>,
}

/// Outcome of a successful booking or reschedule.
#[derive(Clone, Debug, PartialEq)]
pub struct Booking {
    pub reservation_id: u64,
    pub datetime: DateTime<FixedOffset>,
    pub table_name: String,
    pub zone: Zone,
    pub guests_count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct BookState {
    next_id: u64,
    reservations: Vec<Reservation>,
}

pub struct ReservationBook {
    settings: BookSettings,
    path: Option<PathBuf>,
    state: Mutex<BookState>,
}

impl ReservationBook {
    /// A book that lives only as long as the process.
    pub fn in_memory(settings: BookSettings) -> Self {
        Self {
            settings,
            path: None,
            state: Mutex::new(BookState::default()),
        }
    }

    /// A book persisted to `path` (loaded now, rewritten after every change).
    pub fn open(settings: BookSettings, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        info!(
            path = %path.display(),
            reservations = state.reservations.len(),
            "reservation book loaded"
        );
        Ok(Self {
            settings,
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    pub fn settings(&self) -> &BookSettings {
        &self.settings
    }

    pub fn table(&self, id: u32) -> Option<&Table> {
        self.settings.tables.iter().find(|t| t.id == id)
    }

    /// Snap to the start of the containing slot, in the restaurant offset.
    pub fn normalize(&self, dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let local = dt.with_timezone(&self.settings.offset);
        let excess = minute_of_day(&local) % self.settings.slot_minutes.max(1);
        local
            - Duration::minutes(i64::from(excess))
            - Duration::seconds(i64::from(local.second()))
            - Duration::nanoseconds(i64::from(local.nanosecond()))
    }

    /// Check that a party may be seated at `start` at all (hours, past, size).
    pub fn validate_slot(
        &self,
        start: DateTime<FixedOffset>,
        guests: u32,
        now: DateTime<FixedOffset>,
    ) -> std::result::Result<DateTime<FixedOffset>, ReservationError> {
        let slot = self.normalize(start);

        if guests == 0 {
            return Err(ReservationError::InvalidPartySize);
        }
        let max = self.settings.max_capacity();
        if guests > max {
            return Err(ReservationError::PartyTooLarge { guests, max });
        }

        let hours = self.settings.hours;
        let begin = minute_of_day(&slot);
        if begin < hours.open_minute || begin + self.settings.slot_minutes > hours.close_minute {
            return Err(ReservationError::Closed {
                open: hours.open_label(),
                close: hours.close_label(),
            });
        }

        if slot < self.normalize(now) {
            return Err(ReservationError::InPast);
        }
        Ok(slot)
    }

    pub async fn find_available_table(
        &self,
        dt: DateTime<FixedOffset>,
        guests: u32,
        now: DateTime<FixedOffset>,
    ) -> std::result::Result<Option<Table>, ReservationError> {
        let slot = self.validate_slot(dt, guests, now)?;
        let st = self.state.lock().await;
        Ok(self.free_table(&st, slot, guests, None).cloned())
    }

    pub async fn is_slot_available(
        &self,
        dt: DateTime<FixedOffset>,
        guests: u32,
        now: DateTime<FixedOffset>,
    ) -> bool {
        matches!(self.find_available_table(dt, guests, now).await, Ok(Some(_)))
    }

    pub async fn book(
        &self,
        dt: DateTime<FixedOffset>,
        client_name: &str,
        phone_number: &str,
        guests: u32,
        now: DateTime<FixedOffset>,
    ) -> Result<Booking> {
        let slot = self.validate_slot(dt, guests, now)?;

        let mut st = self.state.lock().await;
        let table = self
            .free_table(&st, slot, guests, None)
            .cloned()
            .ok_or(ReservationError::Unavailable)?;

        let mut next = st.clone();
        next.next_id += 1;
        let id = next.next_id;
        next.reservations.push(Reservation {
            id,
            table_id: table.id,
            start: slot,
            client_name: client_name.trim().to_string(),
            phone_number: phone_number.trim().to_string(),
            guests_count: guests,
            booked_at: now,
        });
        self.save(&next)?;
        *st = next;

        info!(
            reservation = id,
            table = %table.name,
            start = %slot,
            guests,
            "table booked"
        );
        Ok(Booking {
            reservation_id: id,
            datetime: slot,
            table_name: table.name,
            zone: table.zone,
            guests_count: guests,
        })
    }

    /// Free slots around `dt` for the same party, earliest first.
    pub async fn alternatives(
        &self,
        dt: DateTime<FixedOffset>,
        guests: u32,
        count: usize,
        now: DateTime<FixedOffset>,
    ) -> Vec<DateTime<FixedOffset>> {
        let center = self.normalize(dt);
        let step = Duration::minutes(i64::from(self.settings.slot_minutes));
        let st = self.state.lock().await;

        let mut out: Vec<DateTime<FixedOffset>> = Vec::new();
        for k in 1..=(count / 2 + 1) as i32 {
            for candidate in [center - step * k, center + step * k] {
                let Ok(slot) = self.validate_slot(candidate, guests, now) else {
                    continue;
                };
                if self.free_table(&st, slot, guests, None).is_some() && !out.contains(&slot) {
                    out.push(slot);
                }
            }
        }
        out.sort();
        out.truncate(count);
        out
    }

    /// Cancel the earliest upcoming reservation for `phone` (optionally on `date`).
    pub async fn cancel(
        &self,
        phone: &str,
        date: Option<NaiveDate>,
        now: DateTime<FixedOffset>,
    ) -> Result<Reservation> {
        let mut st = self.state.lock().await;
        let idx = self
            .find_for_phone(&st, phone, date, now)
            .ok_or(ReservationError::NotFound)?;

        let mut next = st.clone();
        let removed = next.reservations.remove(idx);
        self.save(&next)?;
        *st = next;

        info!(reservation = removed.id, start = %removed.start, "reservation cancelled");
        Ok(removed)
    }

    /// Move the earliest upcoming reservation for `phone` to `new_dt`.
    ///
    /// The table may change; the party size stays.
    pub async fn reschedule(
        &self,
        phone: &str,
        old_date: Option<NaiveDate>,
        new_dt: DateTime<FixedOffset>,
        now: DateTime<FixedOffset>,
    ) -> Result<Booking> {
        let mut st = self.state.lock().await;
        let idx = self
            .find_for_phone(&st, phone, old_date, now)
            .ok_or(ReservationError::NotFound)?;
        let current = st.reservations[idx].clone();

        let slot = self.validate_slot(new_dt, current.guests_count, now)?;
        let table = self
            .free_table(&st, slot, current.guests_count, Some(current.id))
            .cloned()
            .ok_or(ReservationError::Unavailable)?;

        let mut next = st.clone();
        let r = &mut next.reservations[idx];
        r.start = slot;
        r.table_id = table.id;
        self.save(&next)?;
        *st = next;

        info!(
            reservation = current.id,
            from = %current.start,
            to = %slot,
            table = %table.name,
            "reservation moved"
        );
        Ok(Booking {
            reservation_id: current.id,
            datetime: slot,
            table_name: table.name,
            zone: table.zone,
            guests_count: current.guests_count,
        })
    }

    /// Reservations from the current slot on, earliest first.
    pub async fn upcoming(&self, now: DateTime<FixedOffset>) -> Vec<Reservation> {
        let from = self.normalize(now);
        let st = self.state.lock().await;
        let mut out: Vec<Reservation> = st
            .reservations
            .iter()
            .filter(|r| r.start >= from)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.start, r.table_id));
        out
    }

    /// Smallest free table that seats the party; ties by id.
    fn free_table<'a>(
        &'a self,
        st: &BookState,
        slot: DateTime<FixedOffset>,
        guests: u32,
        ignore: Option<u64>,
    ) -> Option<&'a Table> {
        self.settings
            .tables
            .iter()
            .filter(|t| t.capacity >= guests)
            .filter(|t| {
                !st.reservations.iter().any(|r| {
                    r.table_id == t.id && r.start == slot && Some(r.id) != ignore
                })
            })
            .min_by_key(|t| (t.capacity, t.id))
    }

    fn find_for_phone(
        &self,
        st: &BookState,
        phone: &str,
        date: Option<NaiveDate>,
        now: DateTime<FixedOffset>,
    ) -> Option<usize> {
        let from = self.normalize(now);
        st.reservations
            .iter()
            .enumerate()
            .filter(|(_, r)| r.start >= from && same_phone(&r.phone_number, phone))
            .filter(|(_, r)| date.map_or(true, |d| r.start.date_naive() == d))
            .min_by_key(|(_, r)| r.start)
            .map(|(idx, _)| idx)
    }

    fn save(&self, st: &BookState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(st)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "reservation book saved");
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<BookState> {
    if !path.exists() {
        return Ok(BookState::default());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(BookState::default());
    }
    let mut st: BookState = serde_json::from_str(&txt)?;
    // Never hand out an id that is already stored.
    let max_id = st.reservations.iter().map(|r| r.id).max().unwrap_or(0);
    st.next_id = st.next_id.max(max_id);
    Ok(st)
}

fn minute_of_day(dt: &DateTime<FixedOffset>) -> u32 {
    dt.hour() * 60 + dt.minute()
}

/// Compare phone numbers by digits; a Russian trunk `8` equals `+7`.
pub fn same_phone(a: &str, b: &str) -> bool {
    let a = phone_key(a);
    !a.is_empty() && a == phone_key(b)
}

fn phone_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 && digits.starts_with('8') {
        format!("7{}", &digits[1..])
    } else {
        digits
    }
}
