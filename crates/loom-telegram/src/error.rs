use loom_channels::ChannelError;

/// Errors produced by the Telegram adapter, convertible into the transport-
/// agnostic [`ChannelError`] the rest of the gateway deals in.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,
}

impl From<TelegramError> for ChannelError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Teloxide(e) => ChannelError::ConnectionFailed(e.to_string()),
            TelegramError::NoToken => ChannelError::ConfigError("missing bot_token".to_string()),
        }
    }
}
