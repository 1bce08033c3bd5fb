//! Engine adapter layer
//!
//! The [`EngineAdapter`] trait is the only way the session core talks to an
//! RTC engine. It offers promise-style calls (each call resolves once the
//! transport answers or its deadline expires) and an event queue of
//! normalized [`EngineEvent`]s.
//!
//! ```text
//! ┌──────────────────────────┐
//! │   SessionStateMachine    │
//! └────────────┬─────────────┘
//!              │ EngineAdapter
//! ┌────────────▼─────────────┐
//! │  CallbackAdapter<E>      │  correlation, deadlines,
//! │                          │  stale/late callback filtering
//! └────────────┬─────────────┘
//!              │ NativeEngine + NativeEventHandler
//! ┌────────────▼─────────────┐
//! │ SDK binding │ Simulated  │
//! └──────────────────────────┘
//! ```
//!
//! Which engine sits at the bottom is chosen when the session is built, by
//! handing a different adapter to the session.

pub mod callback;
pub mod native;
pub mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::client::types::{ChannelConfig, JoinOutcome, RequestId, UserId};
use crate::error::SessionResult;

pub use callback::CallbackAdapter;
pub use native::{NativeCallback, NativeEngine, NativeError, NativeEventHandler};
pub use simulated::{EngineCall, JoinBehavior, LeaveBehavior, SimulatedEngine};

/// Why a remote participant left the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    /// Left on purpose
    Quit,
    /// No packets received for too long
    Dropped,
    /// Switched from broadcaster to audience
    BecameAudience,
    /// Any other backend reason code
    Other(u32),
}

impl OfflineReason {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => OfflineReason::Quit,
            1 => OfflineReason::Dropped,
            2 => OfflineReason::BecameAudience,
            other => OfflineReason::Other(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            OfflineReason::Quit => 0,
            OfflineReason::Dropped => 1,
            OfflineReason::BecameAudience => 2,
            OfflineReason::Other(code) => code,
        }
    }
}

/// One join attempt as dispatched to the adapter
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub request_id: RequestId,
    pub channel: ChannelConfig,
}

/// Normalized events raised by an adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The transport confirmed the local user is in `channel`
    LocalJoinConfirmed { channel: String, uid: UserId },
    /// A remote participant joined
    ParticipantJoined { uid: UserId },
    /// A remote participant left
    ParticipantLeft { uid: UserId, reason: OfflineReason },
    /// The transport dropped the channel connection
    ConnectionLost { reason: String },
    /// An engine error not tied to an in-flight request
    EngineError { code: i32, message: String },
}

/// Single point of contact with an RTC transport
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Prepare the engine. Fails with `Configuration` for an empty id;
    /// repeated calls after success do nothing.
    async fn initialize(&self, app_id: &str) -> SessionResult<()>;

    /// Join a channel, waiting at most `timeout` for the transport.
    ///
    /// Transport failures and deadline expiry come back as
    /// `JoinOutcome::Failure`; only validation problems (`NotInitialized`,
    /// `Disposed`) are errors.
    async fn join_channel(&self, request: JoinRequest, timeout: Duration) -> SessionResult<JoinOutcome>;

    /// Leave the current channel and wait for the acknowledgement.
    /// Returns immediately when not in a channel.
    async fn leave_channel(&self, timeout: Duration) -> SessionResult<()>;

    /// Mute or unmute the local microphone stream. Does nothing before
    /// `initialize`.
    async fn set_local_audio_muted(&self, muted: bool) -> SessionResult<()>;

    /// Release the engine. Safe to call any number of times; afterwards
    /// every call fails with `Disposed` and no event is raised.
    async fn dispose(&self);

    /// A receiver for the adapter's event queue
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    fn is_initialized(&self) -> bool;
}
