use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::FixedOffset;

use crate::{
    errors::Error,
    reply::ReplyDelay,
    reservations::{BookSettings, OpeningHours, Table, Zone},
    Result,
};

/// Typed configuration for the hostess bot.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub admin_users: Vec<i64>,

    // LLM (any OpenAI-compatible endpoint: OpenRouter, Ollama, LM Studio...)
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub llm_mock: bool,

    // Restaurant
    pub restaurant_name: String,
    pub utc_offset: FixedOffset,
    pub opening_hours: OpeningHours,
    pub slot_duration_minutes: u32,
    pub tables: Vec<Table>,
    pub alternative_slots: usize,
    pub default_guests: u32,

    // Session data
    pub data_dir: PathBuf,
    pub reservations_file: PathBuf,
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Behavior
    pub reply_delay: ReplyDelay,
    pub history_turns: usize,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source (the process env in `load`).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = EnvSource(lookup);

        let telegram_bot_token = env.str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let admin_users = parse_csv_i64(env.str("HOSTESS_ADMIN_USERS"));

        let llm_mock = env.bool("LLM_MOCK").unwrap_or(false);
        let llm_api_key = env.str("LLM_API_KEY").and_then(non_empty);
        if llm_api_key.is_none() && !llm_mock {
            return Err(Error::Config(
                "LLM_API_KEY environment variable is required (or set LLM_MOCK=1)".to_string(),
            ));
        }
        let llm_base_url = env
            .str("LLM_BASE_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string());
        let llm_model = env
            .str("LLM_MODEL")
            .and_then(non_empty)
            .unwrap_or_else(|| "openai/gpt-3.5-turbo".to_string());
        let llm_timeout = Duration::from_secs(env.u64("LLM_TIMEOUT_SECS").unwrap_or(60));

        let restaurant_name = env
            .str("RESTAURANT_NAME")
            .and_then(non_empty)
            .unwrap_or_else(|| "Ромашка".to_string());

        // Moscow (GMT+3, no DST) unless told otherwise.
        let utc_offset = parse_utc_offset(
            &env.str("RESTAURANT_UTC_OFFSET").unwrap_or_else(|| "+03:00".to_string()),
        )?;
        let opening_hours = parse_opening_hours(
            &env.str("OPENING_HOURS").unwrap_or_else(|| "08:00-24:00".to_string()),
        )?;

        let slot_duration_minutes = env.u32("SLOT_DURATION_MINUTES").unwrap_or(30);
        if slot_duration_minutes == 0 || 1440 % slot_duration_minutes != 0 {
            return Err(Error::Config(format!(
                "SLOT_DURATION_MINUTES must divide a day evenly, got {slot_duration_minutes}"
            )));
        }

        let tables = match env.str("RESTAURANT_TABLES").and_then(non_empty) {
            Some(raw) => parse_tables(&raw)?,
            None => default_tables(),
        };

        let alternative_slots = env.usize("ALTERNATIVE_SLOTS").unwrap_or(5);
        let default_guests = env.u32("DEFAULT_GUESTS").unwrap_or(2).max(1);

        let reply_delay = ReplyDelay::new(
            Duration::from_secs(env.u64("REPLY_DELAY_MIN_SECS").unwrap_or(5)),
            Duration::from_secs(env.u64("REPLY_DELAY_MAX_SECS").unwrap_or(20)),
            Duration::from_millis(env.u64("REPLY_DELAY_PER_CHAR_MS").unwrap_or(100)),
        )?;
        let history_turns = env.usize("HISTORY_TURNS").unwrap_or(10);

        let rate_limit_enabled = env.bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env.u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env.u64("RATE_LIMIT_WINDOW").unwrap_or(60));
        if rate_limit_enabled && (rate_limit_requests == 0 || rate_limit_window.is_zero()) {
            return Err(Error::Config(
                "RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW must be positive (or set RATE_LIMIT_ENABLED=false)"
                    .to_string(),
            ));
        }

        let data_dir = env
            .str("DATA_DIR")
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        fs::create_dir_all(&data_dir)?;
        let reservations_file = data_dir.join("reservations.json");
        let audit_log_path = data_dir.join("audit.log");
        let audit_log_json = env.bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            admin_users,
            llm_api_key,
            llm_base_url,
            llm_model,
            llm_timeout,
            llm_mock,
            restaurant_name,
            utc_offset,
            opening_hours,
            slot_duration_minutes,
            tables,
            alternative_slots,
            default_guests,
            data_dir,
            reservations_file,
            audit_log_path,
            audit_log_json,
            reply_delay,
            history_turns,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }

    pub fn book_settings(&self) -> BookSettings {
        BookSettings {
            offset: self.utc_offset,
            slot_minutes: self.slot_duration_minutes,
            hours: self.opening_hours,
            tables: self.tables.clone(),
        }
    }
}

/// Five tables of different size, in the hall and on the veranda.
pub fn default_tables() -> Vec<Table> {
    [
        ("Стол 1", Zone::Hall, 2),
        ("Стол 2", Zone::Hall, 4),
        ("Стол 3", Zone::Hall, 6),
        ("Веранда 1", Zone::Veranda, 4),
        ("Веранда 2", Zone::Veranda, 8),
    ]
    .into_iter()
    .enumerate()
    .map(|(idx, (name, zone, capacity))| Table {
        id: idx as u32 + 1,
        name: name.to_string(),
        zone,
        capacity,
    })
    .collect()
}

/// `+03:00`, `-05:30`, `+3`, `UTC+3`.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let bad = || Error::Config(format!("invalid RESTAURANT_UTC_OFFSET: {raw:?}"));

    let s = raw.trim();
    let s = s
        .strip_prefix("UTC")
        .or_else(|| s.strip_prefix("GMT"))
        .unwrap_or(s);
    let (sign, rest) = match s.chars().next() {
        Some('+') => (1, &s[1..]),
        Some('-') => (-1, &s[1..]),
        Some(c) if c.is_ascii_digit() => (1, s),
        _ => return Err(bad()),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = h.trim().parse().map_err(|_| bad())?;
    let minutes: i32 = m.trim().parse().map_err(|_| bad())?;
    if hours > 14 || minutes >= 60 {
        return Err(bad());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(bad)
}

/// `08:00-24:00`. A close of `24:00` means midnight.
pub fn parse_opening_hours(raw: &str) -> Result<OpeningHours> {
    let bad = || Error::Config(format!("invalid OPENING_HOURS: {raw:?}"));

    let (open, close) = raw.trim().split_once('-').ok_or_else(bad)?;
    let open_minute = parse_clock_minutes(open).ok_or_else(bad)?;
    let close_minute = parse_clock_minutes(close).ok_or_else(bad)?;
    if open_minute >= close_minute {
        return Err(bad());
    }
    Ok(OpeningHours {
        open_minute,
        close_minute,
    })
}

fn parse_clock_minutes(s: &str) -> Option<u32> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

/// `Стол 1:hall:2;Веранда:veranda:6`
pub fn parse_tables(raw: &str) -> Result<Vec<Table>> {
    let mut out = Vec::new();
    for (idx, item) in raw
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
    {
        let bad = || Error::Config(format!("invalid RESTAURANT_TABLES entry: {item:?}"));
        let mut parts = item.rsplitn(3, ':');
        let capacity: u32 = parts
            .next()
            .and_then(|c| c.trim().parse().ok())
            .filter(|c| *c > 0)
            .ok_or_else(bad)?;
        let zone = parts.next().and_then(Zone::parse).ok_or_else(bad)?;
        let name = parts
            .next()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(bad)?;
        out.push(Table {
            id: idx as u32 + 1,
            name: name.to_string(),
            zone,
            capacity,
        });
    }
    if out.is_empty() {
        return Err(Error::Config(
            "RESTAURANT_TABLES must list at least one table".to_string(),
        ));
    }
    Ok(out)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

struct EnvSource<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn str(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.str(key).map(|s| {
            matches!(
                s.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Option<u64> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn u32(&self, key: &str) -> Option<u32> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }

    fn usize(&self, key: &str) -> Option<usize> {
        self.str(key).and_then(|s| s.trim().parse().ok())
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
