//! # RTC Client Core
//!
//! Channel-session core for real-time-communication clients. It sits between
//! a host (UI or CLI) and an RTC engine, and gives the host:
//!
//! - a session state machine that serializes join, leave and mute requests
//! - promise-style operations with deadlines over a callback-style engine
//! - one event contract (state changes, connection changes, remote
//!   participants, log lines) with any number of subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  Host (UI / CLI)     │
//! └──────────┬───────────┘
//!            │ RtcSession
//! ┌──────────▼───────────┐      ┌──────────────┐
//! │ SessionStateMachine  ├─────►│ EventEmitter │──► subscribers
//! └──────────┬───────────┘      └──────────────┘
//!            │ EngineAdapter
//! ┌──────────▼───────────┐
//! │ CallbackAdapter<E>   │
//! └──────────┬───────────┘
//!            │ NativeEngine
//!   SDK binding / SimulatedEngine
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rtc_client_core::{ChannelConfig, JoinOutcome, RtcSessionBuilder};
//! use rtc_client_core::adapter::{JoinBehavior, SimulatedEngine};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let engine = SimulatedEngine::new()
//!     .with_default_join(JoinBehavior::succeed_with_uid(42, Duration::from_millis(5)));
//!
//! let session = RtcSessionBuilder::new()
//!     .app_id("app1")
//!     .simulated(engine)
//!     .build()
//!     .await
//!     .unwrap();
//!
//! session.initialize("app1").await.unwrap();
//! match session.join_channel(ChannelConfig::new("room1")).await.unwrap() {
//!     JoinOutcome::Success(uid) => assert_eq!(uid, 42),
//!     JoinOutcome::Failure(reason) => panic!("join failed: {}", reason),
//! }
//! assert!(session.is_connected());
//!
//! session.dispose().await;
//! # })
//! ```

pub mod adapter;
pub mod client;
pub mod error;
pub mod events;
pub mod state_machine;

pub use client::{
    AudioProfile, ChannelConfig, JoinOutcome, RemoteParticipant, RequestId, RtcSession, RtcSessionBuilder,
    SessionConfig, SessionId, SessionState, SessionStats, UserId,
};
pub use error::{SessionError, SessionResult};
pub use events::{EventFilter, EventSubscription, SessionEvent, SessionEventHandler, SessionEventKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
