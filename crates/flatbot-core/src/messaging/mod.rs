//! Messenger abstractions: the conversation talks to Telegram only through these.

pub mod port;
pub mod throttled;
pub mod types;
