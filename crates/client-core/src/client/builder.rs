//! Builder for [`RtcSession`]

use std::sync::Arc;
use std::time::Duration;

use super::config::SessionConfig;
use super::session::RtcSession;
use super::types::AudioProfile;
use crate::adapter::{CallbackAdapter, EngineAdapter, SimulatedEngine};
use crate::error::{SessionError, SessionResult};

/// Fluent construction of a session and its engine adapter
///
/// The adapter decides which engine the session runs on. Pass any
/// [`EngineAdapter`] with [`adapter`](Self::adapter), or use
/// [`simulated`](Self::simulated) for the in-process engine.
///
/// # Examples
///
/// ```rust
/// use rtc_client_core::{AudioProfile, RtcSessionBuilder};
/// use rtc_client_core::adapter::SimulatedEngine;
///
/// # tokio_test::block_on(async {
/// let session = RtcSessionBuilder::new()
///     .app_id("app1")
///     .default_channel("lobby")
///     .audio_profile(AudioProfile::SpeechStandard)
///     .simulated(SimulatedEngine::new())
///     .build()
///     .await
///     .unwrap();
///
/// session.initialize_from_config().await.unwrap();
/// assert!(session.join_default_channel().await.unwrap().is_success());
/// # })
/// ```
pub struct RtcSessionBuilder {
    config: SessionConfig,
    adapter: Option<Arc<dyn EngineAdapter>>,
    engine: Option<SimulatedEngine>,
}

impl RtcSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            adapter: None,
            engine: None,
        }
    }

    /// Start from an existing configuration, e.g. one loaded from TOML
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            ..Self::new()
        }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.config.app_id = app_id.into();
        self
    }

    pub fn default_channel(mut self, channel: impl Into<String>) -> Self {
        self.config.default_channel = Some(channel.into());
        self
    }

    pub fn audio_profile(mut self, profile: AudioProfile) -> Self {
        self.config.audio_profile = profile;
        self
    }

    /// Publish `LogMessage` events (on by default)
    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.logging_enabled = enabled;
        self
    }

    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_join_timeout(timeout);
        self
    }

    pub fn leave_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_leave_timeout(timeout);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Run the session on `adapter`
    pub fn adapter(mut self, adapter: Arc<dyn EngineAdapter>) -> Self {
        self.adapter = Some(adapter);
        self.engine = None;
        self
    }

    /// Run the session on a [`SimulatedEngine`]
    pub fn simulated(mut self, engine: SimulatedEngine) -> Self {
        self.engine = Some(engine);
        self.adapter = None;
        self
    }

    /// Validate the configuration and create the session.
    ///
    /// Fails with `Configuration` when no adapter or engine was given.
    pub async fn build(self) -> SessionResult<Arc<RtcSession>> {
        let adapter: Arc<dyn EngineAdapter> = match (self.adapter, self.engine) {
            (Some(adapter), _) => adapter,
            (None, Some(engine)) => Arc::new(CallbackAdapter::with_capacity(engine, self.config.event_capacity)),
            (None, None) => return Err(SessionError::config("no engine adapter configured")),
        };
        RtcSession::new(self.config, adapter).map(Arc::new)
    }
}

impl Default for RtcSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_requires_adapter() {
        let result = RtcSessionBuilder::new().app_id("app1").build().await;
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = RtcSessionBuilder::new()
            .join_timeout(Duration::ZERO)
            .simulated(SimulatedEngine::new())
            .build()
            .await;
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_build_applies_config() {
        let session = RtcSessionBuilder::new()
            .app_id("app1")
            .default_channel("lobby")
            .logging(false)
            .event_capacity(32)
            .simulated(SimulatedEngine::new())
            .build()
            .await
            .unwrap();

        let config = session.config();
        assert_eq!(config.app_id, "app1");
        assert_eq!(config.default_channel.as_deref(), Some("lobby"));
        assert!(!config.logging_enabled);
        assert_eq!(config.event_capacity, 32);
    }
}
