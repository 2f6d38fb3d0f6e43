//! Discord transport adapter: a thin [`loom_channels::Channel`]
//! implementation over `serenity`. Carries no session or agent logic —
//! that lives in `loom_channels::Router`, which every adapter feeds
//! through the same normalized `InboundMessage` shape.

pub mod channel;
pub mod error;
pub mod handler;
pub mod send;

pub use channel::DiscordChannel;
pub use error::DiscordError;
