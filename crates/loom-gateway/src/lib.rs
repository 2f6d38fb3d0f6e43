//! Library half of the gateway binary: split out from `main.rs` so the
//! end-to-end scenarios in `tests/` can drive `app::build_router` directly
//! instead of spawning the real process.

pub mod app;
pub mod cli_channel;
pub mod http;
pub mod providers;
pub mod webchat_channel;
