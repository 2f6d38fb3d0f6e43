use thiserror::Error;

/// Error taxonomy shared across the gateway. Each variant carries a
/// descriptive message; `.code()` gives the stable string used in logs.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("cancelled")]
    Cancelled,

    #[error("agent loop exceeded iteration bound ({0})")]
    BoundExceeded(u32),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Transport(_) => "TRANSPORT_ERROR",
            GatewayError::Protocol(_) => "PROTOCOL_ERROR",
            GatewayError::Tool(_) => "TOOL_ERROR",
            GatewayError::Session(_) => "SESSION_ERROR",
            GatewayError::Cancelled => "CANCELLED",
            GatewayError::BoundExceeded(_) => "BOUND_EXCEEDED",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// `true` for errors the agent loop should surface to the model as a
    /// tool_result rather than abort the turn over.
    pub fn is_tool_error(&self) -> bool {
        matches!(self, GatewayError::Tool(_))
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_is_the_only_non_fatal_kind() {
        assert!(GatewayError::Tool("boom".to_string()).is_tool_error());
        assert!(!GatewayError::Transport("boom".to_string()).is_tool_error());
        assert!(!GatewayError::Cancelled.is_tool_error());
    }

    #[test]
    fn every_variant_has_a_stable_code() {
        assert_eq!(GatewayError::Config("x".into()).code(), "CONFIG_ERROR");
        assert_eq!(GatewayError::BoundExceeded(20).code(), "BOUND_EXCEEDED");
        assert_eq!(GatewayError::Cancelled.code(), "CANCELLED");
    }
}
