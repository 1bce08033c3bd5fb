//! Public session API
//!
//! - [`session`] - the [`RtcSession`](session::RtcSession) facade
//! - [`builder`] - fluent construction with adapter injection
//! - [`config`] - `SessionConfig`, loadable from TOML
//! - [`types`] - value types shared across the crate

pub mod builder;
pub mod config;
pub mod session;
pub mod types;


pub use builder::RtcSessionBuilder;
pub use config::SessionConfig;
pub use session::RtcSession;
pub use types::*;
