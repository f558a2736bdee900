use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use hostess_core::{
    assistant::Hostess,
    audit::AuditLogger,
    config::Config,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    reply::ReplyDelay,
    security::RateLimiter,
};

use crate::handlers;
use crate::TelegramMessenger;

const PRUNE_EVERY: Duration = Duration::from_secs(600);
/// Conversations silent for this long start over.
const DIALOGUE_IDLE: Duration = Duration::from_secs(12 * 3600);

pub struct AppState {
    pub hostess: Arc<Hostess>,
    pub messenger: Arc<dyn MessagingPort>,
    pub admin_users: Vec<i64>,
    pub reply_delay: ReplyDelay,
    pub rate_limiter: Mutex<RateLimiter>,
    pub chat_locks: ChatLocks,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(cfg: &Config, hostess: Arc<Hostess>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            hostess,
            messenger,
            admin_users: cfg.admin_users.clone(),
            reply_delay: cfg.reply_delay,
            rate_limiter: Mutex::new(RateLimiter::new(
                cfg.rate_limit_enabled,
                cfg.rate_limit_requests,
                cfg.rate_limit_window,
            )),
            chat_locks: ChatLocks::default(),
            audit: AuditLogger::new(cfg.audit_log_path.clone(), cfg.audit_log_json),
        }
    }
}

/// One in-flight conversation turn per chat; later messages wait their turn.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody holds or waits for.
    pub async fn prune(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }
}

pub async fn run_polling(cfg: Arc<Config>, hostess: Arc<Hostess>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "telegram bot started"),
        Err(e) => warn!(error = %e, "getMe failed, continuing"),
    }
    info!(
        restaurant = %cfg.restaurant_name,
        tables = cfg.tables.len(),
        admins = cfg.admin_users.len(),
        data_dir = %cfg.data_dir.display(),
        "hostess ready"
    );

    // Throttle outbound calls; the adapter still retries a 429 RetryAfter once.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let throttled = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let messenger: Arc<dyn MessagingPort> = throttled.clone();

    let state = Arc::new(AppState::new(&cfg, hostess, messenger));

    // Per-chat and per-guest maps would otherwise grow with every chat ever seen.
    let pruner = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_EVERY);
        loop {
            tick.tick().await;
            prune_idle(&pruner, &throttled).await;
        }
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("telegram bot stopped");
    Ok(())
}

async fn prune_idle(state: &AppState, throttled: &ThrottledMessenger) {
    let now = Instant::now();
    let guests = {
        let mut rl = state.rate_limiter.lock().await;
        rl.prune(now);
        rl.tracked()
    };
    let dialogues = state
        .hostess
        .dialogue()
        .prune_idle(DIALOGUE_IDLE, now)
        .await;
    let locks = state.chat_locks.prune().await;
    let limiters = throttled.prune().await;
    debug!(guests, dialogues, locks, limiters, "pruned idle per-chat state");
}
