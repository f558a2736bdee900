use chrono::{DateTime, FixedOffset, Utc};

/// Source of "now" in the restaurant's offset.
#[derive(Clone, Copy, Debug)]
pub enum Clock {
    System(FixedOffset),
    /// Frozen time (tests, replays).
    Fixed(DateTime<FixedOffset>),
}

impl Clock {
    pub fn now(&self) -> DateTime<FixedOffset> {
        match self {
            Clock::System(offset) => Utc::now().with_timezone(offset),
            Clock::Fixed(t) => *t,
        }
    }
}
