/// Core error type for the hostess bot.
///
/// Adapter crates should map their specific errors into this type so the bot
/// core can handle failures consistently (user-facing message vs logged).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),

    #[error("external error: {0}")]
    External(String),
}

/// Why the reservation book refused a request.
///
/// Messages are guest-facing (they travel through the model into the chat).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    #[error("ресторан работает с {open} до {close}, это время вне графика")]
    Closed { open: String, close: String },

    #[error("это время уже прошло")]
    InPast,

    #[error("количество гостей должно быть не меньше одного")]
    InvalidPartySize,

    #[error("у нас нет столика на {guests} гостей, максимум {max}")]
    PartyTooLarge { guests: u32, max: u32 },

    #[error("к сожалению, подходящих свободных столиков на это время нет")]
    Unavailable,

    #[error("бронирование не найдено")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
