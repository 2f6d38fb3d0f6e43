//! Telegram transport adapter: a thin [`loom_channels::Channel`]
//! implementation over `teloxide`. Carries no session or agent logic —
//! that lives in `loom_channels::Router`.

pub mod channel;
pub mod error;
pub mod handler;
pub mod send;

pub use channel::TelegramChannel;
pub use error::TelegramError;
