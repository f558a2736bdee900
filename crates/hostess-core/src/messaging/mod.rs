//! Messenger abstraction: the handlers talk to this port, Telegram implements it.

pub mod port;
pub mod throttled;
pub mod types;
