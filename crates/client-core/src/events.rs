//! Event handling for channel sessions
//!
//! Every observable change of a session is published as a [`SessionEvent`].
//! Two delivery paths exist side by side:
//!
//! - **Broadcast** - [`EventEmitter::subscribe_events`] hands out a
//!   `tokio::sync::broadcast::Receiver` that sees every event.
//! - **Handlers** - implementations of [`SessionEventHandler`] wrapped in an
//!   [`EventSubscription`] (optionally filtered by [`SessionEventKind`]).
//!   Handlers run one after another, in registration order, on a single
//!   dispatcher task. A handler may call back into the session or remove its
//!   own subscription.
//!
//! # Usage Examples
//!
//! ## Basic Event Handler
//!
//! ```rust
//! use rtc_client_core::events::SessionEventHandler;
//! use rtc_client_core::UserId;
//! use async_trait::async_trait;
//!
//! struct RosterView;
//!
//! #[async_trait]
//! impl SessionEventHandler for RosterView {
//!     async fn on_participant_joined(&self, uid: UserId) {
//!         println!("{} joined", uid);
//!     }
//!
//!     async fn on_connection_state_changed(&self, connected: bool) {
//!         println!("connected: {}", connected);
//!     }
//! }
//! ```
//!
//! ## Event Filtering
//!
//! ```rust
//! use rtc_client_core::events::{EventFilter, SessionEventKind};
//!
//! let filter = EventFilter::kinds([
//!     SessionEventKind::ParticipantJoined,
//!     SessionEventKind::ParticipantLeft,
//! ]);
//! assert!(filter.accepts(SessionEventKind::ParticipantLeft));
//! assert!(!filter.accepts(SessionEventKind::LogMessage));
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::adapter::OfflineReason;
use crate::client::types::{SessionState, UserId};

/// Events published by a session
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Human readable trace of a transition or adapter call outcome
    LogMessage {
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// The session moved between lifecycle states
    StateChanged {
        from: SessionState,
        to: SessionState,
        timestamp: DateTime<Utc>,
    },
    /// The session entered or left a channel
    ConnectionStateChanged {
        connected: bool,
        channel: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The transport confirmed the local user's join
    LocalJoinConfirmed {
        channel: String,
        uid: UserId,
        timestamp: DateTime<Utc>,
    },
    /// A remote participant appeared in the channel
    ParticipantJoined {
        uid: UserId,
        timestamp: DateTime<Utc>,
    },
    /// A remote participant left the channel
    ParticipantLeft {
        uid: UserId,
        reason: OfflineReason,
        timestamp: DateTime<Utc>,
    },
}

/// Discriminant of [`SessionEvent`], used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionEventKind {
    LogMessage,
    StateChanged,
    ConnectionStateChanged,
    LocalJoinConfirmed,
    ParticipantJoined,
    ParticipantLeft,
}

impl SessionEvent {
    pub fn log(text: impl Into<String>) -> Self {
        SessionEvent::LogMessage {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn state_changed(from: SessionState, to: SessionState) -> Self {
        SessionEvent::StateChanged {
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn connection_changed(connected: bool, channel: Option<String>) -> Self {
        SessionEvent::ConnectionStateChanged {
            connected,
            channel,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::LogMessage { .. } => SessionEventKind::LogMessage,
            SessionEvent::StateChanged { .. } => SessionEventKind::StateChanged,
            SessionEvent::ConnectionStateChanged { .. } => SessionEventKind::ConnectionStateChanged,
            SessionEvent::LocalJoinConfirmed { .. } => SessionEventKind::LocalJoinConfirmed,
            SessionEvent::ParticipantJoined { .. } => SessionEventKind::ParticipantJoined,
            SessionEvent::ParticipantLeft { .. } => SessionEventKind::ParticipantLeft,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::LogMessage { timestamp, .. }
            | SessionEvent::StateChanged { timestamp, .. }
            | SessionEvent::ConnectionStateChanged { timestamp, .. }
            | SessionEvent::LocalJoinConfirmed { timestamp, .. }
            | SessionEvent::ParticipantJoined { timestamp, .. }
            | SessionEvent::ParticipantLeft { timestamp, .. } => *timestamp,
        }
    }
}

/// Selects which events a subscription receives
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event kinds to deliver; `None` delivers everything
    pub kinds: Option<HashSet<SessionEventKind>>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn kinds(kinds: impl IntoIterator<Item = SessionEventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
        }
    }

    pub fn accepts(&self, kind: SessionEventKind) -> bool {
        match &self.kinds {
            Some(kinds) => kinds.contains(&kind),
            None => true,
        }
    }
}

/// Receives session events
///
/// Every method has an empty default; implement only what you need.
/// `on_session_event` is the single entry point used by the dispatcher and
/// fans out to the typed methods.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_log_message(&self, _text: String) {}

    async fn on_state_changed(&self, _from: SessionState, _to: SessionState) {}

    async fn on_connection_state_changed(&self, _connected: bool) {}

    async fn on_local_join_confirmed(&self, _channel: String, _uid: UserId) {}

    async fn on_participant_joined(&self, _uid: UserId) {}

    async fn on_participant_left(&self, _uid: UserId, _reason: OfflineReason) {}

    async fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::LogMessage { text, .. } => self.on_log_message(text).await,
            SessionEvent::StateChanged { from, to, .. } => self.on_state_changed(from, to).await,
            SessionEvent::ConnectionStateChanged { connected, .. } => {
                self.on_connection_state_changed(connected).await
            }
            SessionEvent::LocalJoinConfirmed { channel, uid, .. } => {
                self.on_local_join_confirmed(channel, uid).await
            }
            SessionEvent::ParticipantJoined { uid, .. } => self.on_participant_joined(uid).await,
            SessionEvent::ParticipantLeft { uid, reason, .. } => {
                self.on_participant_left(uid, reason).await
            }
        }
    }
}

/// A registered handler together with its filter
#[derive(Clone)]
pub struct EventSubscription {
    handler: Arc<dyn SessionEventHandler>,
    filter: EventFilter,
    id: uuid::Uuid,
}

impl EventSubscription {
    pub fn new(handler: Arc<dyn SessionEventHandler>, filter: EventFilter) -> Self {
        Self {
            handler,
            filter,
            id: uuid::Uuid::new_v4(),
        }
    }

    pub fn all_events(handler: Arc<dyn SessionEventHandler>) -> Self {
        Self::new(handler, EventFilter::all())
    }

    /// Only participant joined/left events
    pub fn participant_events(handler: Arc<dyn SessionEventHandler>) -> Self {
        Self::new(
            handler,
            EventFilter::kinds([SessionEventKind::ParticipantJoined, SessionEventKind::ParticipantLeft]),
        )
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn should_receive(&self, event: &SessionEvent) -> bool {
        self.filter.accepts(event.kind())
    }

    pub async fn deliver_event(&self, event: SessionEvent) {
        if self.should_receive(&event) {
            self.handler.on_session_event(event).await;
        }
    }
}

type Registry = Arc<RwLock<Vec<EventSubscription>>>;

/// Publishes session events to broadcast receivers and registered handlers
pub struct EventEmitter {
    subscriptions: Registry,
    broadcast_tx: broadcast::Sender<SessionEvent>,
    dispatch_tx: mpsc::UnboundedSender<SessionEvent>,
    logging_enabled: bool,
}

impl EventEmitter {
    /// Create an emitter and spawn its handler dispatcher.
    ///
    /// Must be called from within a tokio runtime. The dispatcher stops once
    /// the emitter is dropped.
    pub fn new(capacity: usize, logging_enabled: bool) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let subscriptions: Registry = Arc::new(RwLock::new(Vec::new()));

        tokio::spawn(run_dispatcher(subscriptions.clone(), dispatch_rx));

        Self {
            subscriptions,
            broadcast_tx,
            dispatch_tx,
            logging_enabled,
        }
    }

    pub fn subscribe(&self, subscription: EventSubscription) -> uuid::Uuid {
        let id = subscription.id();
        self.subscriptions.write().push(subscription);
        id
    }

    pub fn unsubscribe(&self, subscription_id: uuid::Uuid) -> bool {
        let mut subscriptions = self.subscriptions.write();
        if let Some(pos) = subscriptions.iter().position(|s| s.id() == subscription_id) {
            subscriptions.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Publish an event. Never blocks.
    pub fn emit(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.broadcast_tx.send(event.clone());

        if !self.subscriptions.read().is_empty() {
            if self.dispatch_tx.send(event).is_err() {
                tracing::warn!("event dispatcher stopped; handler delivery skipped");
            }
        }
    }

    /// Publish a `LogMessage`, unless logging events are disabled
    pub fn log(&self, text: impl Into<String>) {
        if self.logging_enabled {
            self.emit(SessionEvent::log(text));
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn receiver_count(&self) -> usize {
        self.broadcast_tx.receiver_count()
    }
}

async fn run_dispatcher(subscriptions: Registry, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        // snapshot, so handlers can (un)subscribe while being called
        let snapshot = subscriptions.read().clone();

        for subscription in snapshot {
            let event = event.clone();
            let delivery = tokio::spawn(async move {
                subscription.deliver_event(event).await;
            });
            if let Err(e) = delivery.await {
                tracing::error!("Error delivering event: {}", e);
            }
        }
    }
}
