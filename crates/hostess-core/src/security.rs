use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

/// Longest guest message forwarded to the model, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

// ============== Admin check ==============

/// Staff-only commands (`/bookings`). An empty admin list means nobody.
pub fn is_admin(user_id: Option<UserId>, admin_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    admin_users.contains(&user_id.0)
}

/// Cut a message to [`MAX_MESSAGE_CHARS`] on a char boundary.
pub fn clip_message(text: &str) -> &str {
    match text.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-guest token bucket: `max_tokens` messages, refilled over `window`.
/// At least one message per window is always allowed.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    window: Duration,
    buckets: HashMap<UserId, Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = f64::from(max_tokens.max(1));
        let window = window.max(Duration::from_millis(1));

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window.as_secs_f64(),
            window,
            buckets: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> (bool, Option<Duration>) {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> (bool, Option<Duration>) {
        if !self.enabled {
            return (true, None);
        }

        let bucket = self.buckets.entry(user_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return (true, None);
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        (false, Some(Duration::from_secs_f64(secs.max(0.0))))
    }

    /// Drop buckets that have been full for a whole window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.buckets
            .retain(|_, b| now.duration_since(b.last_update) < window);
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_requires_listed_user() {
        assert!(is_admin(Some(UserId(1)), &[1, 2]));
        assert!(!is_admin(Some(UserId(3)), &[1, 2]));
        assert!(!is_admin(Some(UserId(1)), &[]));
        assert!(!is_admin(None, &[1]));
    }

    #[test]
    fn rate_limiter_blocks_then_refills() {
        let mut rl = RateLimiter::new(true, 2, Duration::from_secs(10));
        let t0 = Instant::now();
        let u = UserId(42);

        assert!(rl.check_at(u, t0).0);
        assert!(rl.check_at(u, t0).0);
        let (ok, retry) = rl.check_at(u, t0);
        assert!(!ok);
        let retry = retry.unwrap();
        assert!(retry > Duration::from_secs(4) && retry <= Duration::from_secs(5));

        // Another guest has their own bucket.
        assert!(rl.check_at(UserId(7), t0).0);

        assert!(rl.check_at(u, t0 + Duration::from_secs(5)).0);
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let mut rl = RateLimiter::new(false, 1, Duration::from_secs(60));
        let t0 = Instant::now();
        for _ in 0..10 {
            assert_eq!(rl.check_at(UserId(1), t0), (true, None));
        }
    }

    #[test]
    fn prune_forgets_idle_guests() {
        let mut rl = RateLimiter::new(true, 2, Duration::from_secs(10));
        let t0 = Instant::now();
        rl.check_at(UserId(1), t0);
        rl.check_at(UserId(2), t0 + Duration::from_secs(9));
        rl.prune(t0 + Duration::from_secs(11));
        assert_eq!(rl.tracked(), 1);
    }

    #[test]
    fn zero_budget_still_allows_one_message_per_window() {
        let mut rl = RateLimiter::new(true, 0, Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(rl.check_at(UserId(1), t0).0);
        let (ok, retry) = rl.check_at(UserId(1), t0);
        assert!(!ok);
        assert!(retry.unwrap() <= Duration::from_secs(61));
        rl.prune(t0 + Duration::from_secs(61));
        assert_eq!(rl.tracked(), 0);

        let mut instant = RateLimiter::new(true, 3, Duration::ZERO);
        assert!(instant.check_at(UserId(1), t0).0);
        instant.prune(t0);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let long = "я".repeat(MAX_MESSAGE_CHARS + 10);
        let clipped = clip_message(&long);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);
        assert_eq!(clip_message("привет"), "привет");
    }
}
