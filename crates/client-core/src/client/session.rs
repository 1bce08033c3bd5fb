//! The channel session facade
//!
//! [`RtcSession`] is what a host UI or CLI talks to. It validates input,
//! forwards state-changing requests to the session's state machine and
//! exposes the event stream.
//!
//! # Usage Examples
//!
//! ```rust
//! use rtc_client_core::{ChannelConfig, RtcSession, SessionConfig};
//! use rtc_client_core::adapter::SimulatedEngine;
//!
//! # tokio_test::block_on(async {
//! let session = RtcSession::simulated(SessionConfig::default(), SimulatedEngine::new()).unwrap();
//! let mut events = session.subscribe_events();
//!
//! session.initialize("app1").await.unwrap();
//! let outcome = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
//! assert!(outcome.is_success());
//! assert_eq!(session.current_channel().as_deref(), Some("room1"));
//!
//! session.leave_channel().await.unwrap();
//! session.dispose().await;
//! # let _ = events.try_recv();
//! # })
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use super::config::SessionConfig;
use super::types::{ChannelConfig, JoinOutcome, RemoteParticipant, SessionId, SessionState, SessionStats, UserId};
use crate::adapter::{CallbackAdapter, EngineAdapter, SimulatedEngine};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventEmitter, EventSubscription, SessionEvent, SessionEventHandler};
use crate::state_machine::SessionStateMachine;

/// One logical channel session, from initialize through dispose
pub struct RtcSession {
    config: SessionConfig,
    emitter: Arc<EventEmitter>,
    machine: SessionStateMachine,
}

impl RtcSession {
    /// Create a session over `adapter`.
    ///
    /// Must be called from within a tokio runtime: the session spawns its
    /// worker, event pump and handler dispatcher here.
    pub fn new(config: SessionConfig, adapter: Arc<dyn EngineAdapter>) -> SessionResult<Self> {
        config.validate()?;

        let session_id = SessionId::new();
        let emitter = Arc::new(EventEmitter::new(config.event_capacity, config.logging_enabled));
        let machine = SessionStateMachine::new(session_id.clone(), adapter, emitter.clone(), &config);

        info!("[{}] session created", session_id);
        Ok(Self {
            config,
            emitter,
            machine,
        })
    }

    /// Create a session over a [`SimulatedEngine`]
    pub fn simulated(config: SessionConfig, engine: SimulatedEngine) -> SessionResult<Self> {
        let adapter = Arc::new(CallbackAdapter::with_capacity(engine, config.event_capacity));
        Self::new(config, adapter)
    }

    /// Initialize the engine with `app_id`.
    ///
    /// An empty id fails with `Configuration` and leaves the session
    /// uninitialized.
    pub async fn initialize(&self, app_id: &str) -> SessionResult<()> {
        if app_id.trim().is_empty() {
            return Err(SessionError::config("app id must not be empty"));
        }
        self.machine.initialize(app_id).await
    }

    /// Initialize with the app id from the session's configuration
    pub async fn initialize_from_config(&self) -> SessionResult<()> {
        let app_id = self.config.app_id.clone();
        self.initialize(&app_id).await
    }

    /// Join a channel.
    ///
    /// Joining while connected to another channel leaves it first. Transport
    /// failures and timeouts come back as [`JoinOutcome::Failure`]; errors are
    /// reserved for invalid input and lifecycle misuse.
    pub async fn join_channel(&self, channel: ChannelConfig) -> SessionResult<JoinOutcome> {
        channel.validate()?;
        self.machine.join(channel).await
    }

    /// Join the configured default channel with the configured audio profile
    pub async fn join_default_channel(&self) -> SessionResult<JoinOutcome> {
        let channel = self.config.default_channel_config()?;
        self.machine.join(channel).await
    }

    /// Leave the current channel. Succeeds without effect when not in one;
    /// transport failures are logged and the session returns to Initialized.
    pub async fn leave_channel(&self) -> SessionResult<()> {
        self.machine.leave().await
    }

    /// Mute or unmute the local microphone. Ignored before initialize.
    pub async fn set_audio_muted(&self, muted: bool) -> SessionResult<()> {
        self.machine.set_muted(muted).await
    }

    /// Release the engine. Every later operation fails with `Disposed`.
    /// Calling it again has no further effect.
    pub async fn dispose(&self) {
        self.machine.dispose().await;
    }

    pub fn session_id(&self) -> &SessionId {
        self.machine.session_id()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn current_channel(&self) -> Option<String> {
        self.machine.current_channel()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.is_connected()
    }

    pub fn is_audio_muted(&self) -> bool {
        self.machine.is_audio_muted()
    }

    pub fn local_uid(&self) -> Option<UserId> {
        self.machine.local_uid()
    }

    pub fn participants(&self) -> Vec<RemoteParticipant> {
        self.machine.participants()
    }

    pub fn stats(&self) -> SessionStats {
        self.machine.stats()
    }

    /// A receiver seeing every event published from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.emitter.subscribe_events()
    }

    /// Register a handler for every event; returns its subscription id
    pub fn add_event_handler(&self, handler: Arc<dyn SessionEventHandler>) -> uuid::Uuid {
        self.emitter.subscribe(EventSubscription::all_events(handler))
    }

    /// Register a filtered subscription; returns its id
    pub fn subscribe(&self, subscription: EventSubscription) -> uuid::Uuid {
        self.emitter.subscribe(subscription)
    }

    /// Remove a subscription. Safe to call from inside a handler.
    pub fn unsubscribe(&self, subscription_id: uuid::Uuid) -> bool {
        self.emitter.unsubscribe(subscription_id)
    }
}
