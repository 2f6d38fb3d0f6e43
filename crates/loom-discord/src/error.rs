use loom_channels::ChannelError;

/// Errors produced by the Discord adapter, convertible into the transport-
/// agnostic [`ChannelError`] the rest of the gateway deals in.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured")]
    NoToken,
}

impl From<DiscordError> for ChannelError {
    fn from(e: DiscordError) -> Self {
        match e {
            DiscordError::Serenity(e) => ChannelError::ConnectionFailed(e.to_string()),
            DiscordError::NoToken => ChannelError::ConfigError("missing bot_token".to_string()),
        }
    }
}
