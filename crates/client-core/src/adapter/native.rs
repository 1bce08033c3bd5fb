//! Callback-style engine surface
//!
//! This is the shape of a typical RTC SDK: calls return immediately with a
//! status code, and their real outcome arrives later through an event
//! handler registered at initialization. An SDK binding implements
//! [`NativeEngine`]; [`CallbackAdapter`](super::CallbackAdapter) turns it into
//! an [`EngineAdapter`](super::EngineAdapter).

use std::sync::Arc;

use thiserror::Error;

use super::OfflineReason;
use crate::client::types::{AudioProfile, UserId};

/// Status returned synchronously by a native call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("native error {code}: {message}")]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Callbacks raised by a native engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCallback {
    JoinChannelSuccess { channel: String, uid: UserId },
    LeaveChannel,
    UserJoined { uid: UserId },
    UserOffline { uid: UserId, reason: OfflineReason },
    ConnectionLost,
    Error { code: i32, message: String },
}

/// Receives callbacks from a native engine, on whatever thread the engine uses
pub trait NativeEventHandler: Send + Sync {
    fn on_callback(&self, callback: NativeCallback);
}

/// Fire-and-forget call surface of an RTC SDK
pub trait NativeEngine: Send + Sync + 'static {
    fn initialize(&self, app_id: &str, handler: Arc<dyn NativeEventHandler>) -> Result<(), NativeError>;

    fn set_audio_profile(&self, profile: AudioProfile) -> Result<(), NativeError>;

    /// Start joining. The outcome arrives as `JoinChannelSuccess` or `Error`.
    fn join_channel(&self, token: Option<&str>, channel: &str, uid: Option<UserId>) -> Result<(), NativeError>;

    /// Start leaving. Acknowledged by `LeaveChannel`.
    fn leave_channel(&self) -> Result<(), NativeError>;

    fn mute_local_audio(&self, muted: bool) -> Result<(), NativeError>;

    fn release(&self);
}
