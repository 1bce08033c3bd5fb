//! Session configuration
//!
//! `SessionConfig` carries everything the operator of the RTC backend supplies:
//! the application id, an optional default channel, the audio profile used for
//! default joins, whether `LogMessage` events are emitted, and the deadlines
//! applied to transport calls.
//!
//! It can be built in code:
//!
//! ```rust
//! use rtc_client_core::{AudioProfile, SessionConfig};
//! use std::time::Duration;
//!
//! let config = SessionConfig::new("app1")
//!     .with_default_channel("lobby")
//!     .with_audio_profile(AudioProfile::MusicStandard)
//!     .with_join_timeout(Duration::from_secs(3));
//!
//! assert_eq!(config.join_timeout(), Duration::from_secs(3));
//! assert!(config.validate().is_ok());
//! ```
//!
//! or read from TOML:
//!
//! ```rust
//! use rtc_client_core::SessionConfig;
//!
//! let config = SessionConfig::from_toml_str(r#"
//!     app_id = "app1"
//!     default_channel = "lobby"
//!     audio_profile = "speech_standard"
//!     logging_enabled = false
//! "#).unwrap();
//!
//! assert_eq!(config.default_channel.as_deref(), Some("lobby"));
//! assert!(!config.logging_enabled);
//! assert_eq!(config.join_timeout_ms, 10_000);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::types::{AudioProfile, ChannelConfig};
use crate::error::{SessionError, SessionResult};

/// Default deadline for a join, in milliseconds
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 10_000;
/// Default deadline for a leave acknowledgement, in milliseconds
pub const DEFAULT_LEAVE_TIMEOUT_MS: u64 = 5_000;
/// Default capacity of the event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Application identifier issued by the RTC backend operator
    pub app_id: String,
    /// Channel joined by `join_default_channel`
    pub default_channel: Option<String>,
    /// Audio profile used by `join_default_channel`
    pub audio_profile: AudioProfile,
    /// Emit `LogMessage` events to subscribers
    pub logging_enabled: bool,
    /// Deadline for a join
    pub join_timeout_ms: u64,
    /// Deadline for a leave acknowledgement
    pub leave_timeout_ms: u64,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            default_channel: None,
            audio_profile: AudioProfile::Default,
            logging_enabled: true,
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            leave_timeout_ms: DEFAULT_LEAVE_TIMEOUT_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> SessionResult<Self> {
        toml::from_str(text).map_err(|e| SessionError::config(format!("invalid session config: {}", e)))
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> SessionResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SessionError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_default_channel(mut self, channel: impl Into<String>) -> Self {
        self.default_channel = Some(channel.into());
        self
    }

    pub fn with_audio_profile(mut self, profile: AudioProfile) -> Self {
        self.audio_profile = profile;
        self
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_leave_timeout(mut self, timeout: Duration) -> Self {
        self.leave_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    /// The join parameters for the configured default channel
    pub fn default_channel_config(&self) -> SessionResult<ChannelConfig> {
        let channel = self
            .default_channel
            .as_deref()
            .ok_or_else(|| SessionError::config("no default channel configured"))?;
        let config = ChannelConfig::new(channel).with_audio_profile(self.audio_profile);
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that do not depend on the app id.
    ///
    /// The app id itself is checked by `initialize`, which may receive a
    /// different one.
    pub fn validate(&self) -> SessionResult<()> {
        if self.join_timeout_ms == 0 {
            return Err(SessionError::config("join_timeout_ms must be greater than zero"));
        }
        if self.leave_timeout_ms == 0 {
            return Err(SessionError::config("leave_timeout_ms must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(SessionError::config("event_capacity must be greater than zero"));
        }
        if let Some(channel) = &self.default_channel {
            if channel.trim().is_empty() {
                return Err(SessionError::config("default_channel must not be empty when set"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.app_id.is_empty());
        assert!(config.logging_enabled);
        assert_eq!(config.join_timeout(), Duration::from_secs(10));
        assert_eq!(config.leave_timeout(), Duration::from_secs(5));
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_and_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            app_id = "app1"
            audio_profile = "music_high_quality"
            join_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.app_id, "app1");
        assert_eq!(config.audio_profile, AudioProfile::MusicHighQuality);
        assert_eq!(config.join_timeout(), Duration::from_millis(2500));
        assert_eq!(config.leave_timeout_ms, DEFAULT_LEAVE_TIMEOUT_MS);
        assert!(config.default_channel.is_none());
    }

    #[test]
    fn test_toml_rejects_unknown_profile() {
        let err = SessionConfig::from_toml_str(r#"audio_profile = "karaoke""#).unwrap_err();
        assert!(matches!(err, SessionError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = SessionConfig::new("app1").with_join_timeout(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = SessionConfig::new("app1").with_event_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_channel_config() {
        let config = SessionConfig::new("app1")
            .with_default_channel("lobby")
            .with_audio_profile(AudioProfile::SpeechStandard);
        let channel = config.default_channel_config().unwrap();
        assert_eq!(channel.channel_name, "lobby");
        assert_eq!(channel.audio_profile, AudioProfile::SpeechStandard);
        assert!(channel.token.is_none());

        let err = SessionConfig::new("app1").default_channel_config().unwrap_err();
        assert!(matches!(err, SessionError::Configuration { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SessionConfig::load("/nonexistent/rtc-session.toml").unwrap_err();
        assert!(matches!(err, SessionError::Configuration { .. }));
    }
}
