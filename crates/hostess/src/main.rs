use std::sync::Arc;

use tracing::info;

use hostess_core::{
    assistant::{Hostess, HostessOptions},
    clock::Clock,
    config::Config,
    model::{client::ChatModel, mock::KeywordModel},
    reservations::ReservationBook,
};
use hostess_openai::{OpenAiChatClient, OpenAiChatConfig};

#[tokio::main]
async fn main() -> Result<(), hostess_core::Error> {
    hostess_core::logging::init("hostess")?;

    let cfg = Arc::new(Config::load()?);

    let book = Arc::new(ReservationBook::open(
        cfg.book_settings(),
        cfg.reservations_file.clone(),
    )?);

    let model: Arc<dyn ChatModel> = match (&cfg.llm_api_key, cfg.llm_mock) {
        (Some(key), false) => Arc::new(OpenAiChatClient::new(
            OpenAiChatConfig::new(key.clone(), cfg.llm_model.clone())
                .with_base_url(cfg.llm_base_url.clone())
                .with_timeout(cfg.llm_timeout),
        )?),
        _ => Arc::new(KeywordModel::new()),
    };
    info!(provider = ?model.provider(), model = %cfg.llm_model, "chat model ready");

    let hostess = Arc::new(Hostess::new(
        model,
        book,
        Clock::System(cfg.utc_offset),
        HostessOptions {
            restaurant_name: cfg.restaurant_name.clone(),
            default_guests: cfg.default_guests,
            alternatives: cfg.alternative_slots,
            history_turns: cfg.history_turns,
        },
    ));

    hostess_telegram::router::run_polling(cfg, hostess)
        .await
        .map_err(|e| hostess_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
