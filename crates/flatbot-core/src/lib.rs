//! Core of the rental listings bot: listing rules, the conversation state
//! machine and the ports it drives.
//!
//! Telegram and PostgreSQL live behind ports (traits) implemented in adapter
//! crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod listing;
pub mod logging;
pub mod messaging;
pub mod security;
pub mod store;
pub mod utils;

pub use errors::{Error, Result};
