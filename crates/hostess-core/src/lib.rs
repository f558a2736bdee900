//! Core of the restaurant hostess bot: reservation book, model port, tool
//! execution and the reply pipeline.
//!
//! Telegram and the OpenAI-compatible API live behind ports (traits)
//! implemented in adapter crates.

pub mod assistant;
pub mod audit;
pub mod clock;
pub mod config;
pub mod dates;
pub mod dialogue;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod reply;
pub mod reservations;
pub mod security;
pub mod tools;

pub use errors::{Error, Result};
