//! Type definitions for the channel-session core
//!
//! Small value types shared by the adapter, the state machine and the
//! public session API.
//!
//! # Type Categories
//!
//! - **Identifiers** - `UserId`, `RequestId`, `SessionId`
//! - **Join Types** - `ChannelConfig`, `AudioProfile`, `JoinOutcome`
//! - **Session Types** - `SessionState`, `RemoteParticipant`, `SessionStats`
//!
//! # Usage Examples
//!
//! ```rust
//! use rtc_client_core::{AudioProfile, ChannelConfig};
//!
//! let config = ChannelConfig::new("room1")
//!     .with_token("007eJxT...")
//!     .with_requested_uid(42)
//!     .with_audio_profile(AudioProfile::SpeechStandard);
//!
//! assert_eq!(config.channel_name, "room1");
//! assert_eq!(config.requested_uid, Some(42));
//! assert!(config.validate().is_ok());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

// ===== IDENTIFIERS =====

/// User identifier inside a channel, as assigned by the RTC backend
pub type UserId = u32;

/// Identifier of one join attempt dispatched to the adapter
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Session identifier, used to tell concurrent sessions apart in logs
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ===== JOIN TYPES =====

/// Audio profile requested for a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioProfile {
    /// Engine default (speech, 32 kHz mono on most backends)
    #[default]
    Default,
    /// Music, standard quality
    MusicStandard,
    /// Music, high quality
    MusicHighQuality,
    /// Speech, standard quality
    SpeechStandard,
}

impl std::fmt::Display for AudioProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AudioProfile::Default => "default",
            AudioProfile::MusicStandard => "music_standard",
            AudioProfile::MusicHighQuality => "music_high_quality",
            AudioProfile::SpeechStandard => "speech_standard",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for AudioProfile {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "default" => Ok(AudioProfile::Default),
            "music_standard" => Ok(AudioProfile::MusicStandard),
            "music_high_quality" => Ok(AudioProfile::MusicHighQuality),
            "speech_standard" => Ok(AudioProfile::SpeechStandard),
            other => Err(SessionError::invalid_argument(format!("unknown audio profile '{}'", other))),
        }
    }
}

/// Parameters of a single join attempt
///
/// Built by the caller for each join and never mutated afterwards.
/// `requested_uid` is `None` when the backend should assign the user id;
/// zero is a valid requested id and carries no special meaning here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name of the channel to join (must be non-empty)
    pub channel_name: String,
    /// Optional access token issued by the backend operator
    pub token: Option<String>,
    /// Optional user id to request
    pub requested_uid: Option<UserId>,
    /// Audio profile to apply before joining
    pub audio_profile: AudioProfile,
}

impl ChannelConfig {
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            token: None,
            requested_uid: None,
            audio_profile: AudioProfile::Default,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_requested_uid(mut self, uid: UserId) -> Self {
        self.requested_uid = Some(uid);
        self
    }

    pub fn with_audio_profile(mut self, profile: AudioProfile) -> Self {
        self.audio_profile = profile;
        self
    }

    /// Reject configurations that must never reach the adapter
    pub fn validate(&self) -> SessionResult<()> {
        if self.channel_name.trim().is_empty() {
            return Err(SessionError::invalid_argument("channel name must not be empty"));
        }
        Ok(())
    }
}

/// Result of one join attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinOutcome {
    /// Joined; carries the local user id assigned by the backend
    Success(UserId),
    /// Join did not complete; carries a human readable reason
    Failure(String),
}

impl JoinOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JoinOutcome::Success(_))
    }

    pub fn uid(&self) -> Option<UserId> {
        match self {
            JoinOutcome::Success(uid) => Some(*uid),
            JoinOutcome::Failure(_) => None,
        }
    }
}

impl std::fmt::Display for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinOutcome::Success(uid) => write!(f, "success (uid {})", uid),
            JoinOutcome::Failure(reason) => write!(f, "failure ({})", reason),
        }
    }
}

// ===== SESSION TYPES =====

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Engine not yet initialized
    Uninitialized,
    /// Engine ready, not in a channel
    Initialized,
    /// Join dispatched, waiting for the transport
    Connecting,
    /// In a channel
    Connected,
    /// Leave dispatched, waiting for the acknowledgement
    Leaving,
    /// Terminal; no further transitions
    Disposed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the session state machine
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Uninitialized, Initialized) => true,
            (Initialized, Connecting) => true,
            (Connecting, Connected) | (Connecting, Initialized) => true,
            (Connected, Leaving) => true,
            // connection dropped by the transport
            (Connected, Initialized) => true,
            (Leaving, Initialized) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Disposed
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A remote party currently present in the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteParticipant {
    /// Remote user id
    pub uid: UserId,
    /// When the joined event was observed
    pub joined_at: DateTime<Utc>,
}

/// Snapshot of a session's current state and counters
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub state: SessionState,
    pub current_channel: Option<String>,
    pub local_uid: Option<UserId>,
    pub audio_muted: bool,
    pub participant_count: usize,
    /// Join attempts dispatched to the adapter since creation
    pub join_attempts: u64,
    /// Join attempts that ended in `JoinOutcome::Failure`
    pub failed_joins: u64,
    /// Requests waiting in the queue behind the one in flight
    pub pending_requests: usize,
}
