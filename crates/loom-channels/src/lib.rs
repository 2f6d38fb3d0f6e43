//! Channel adapters and the router that ties them to sessions and the
//! agent loop.

pub mod channel;
pub mod error;
pub mod manager;
pub mod router;
pub mod types;

pub use channel::Channel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use router::{resolve_session_key, Router, RouterConfig, RouterEvent, StreamSink};
pub use types::{Capabilities, ChannelStatus, InboundMessage, OutboundMessage, ParseMode, SendResult};
