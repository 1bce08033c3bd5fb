//! Adapter over a callback-style native engine
//!
//! `CallbackAdapter` owns the native engine handle and turns its
//! fire-and-forget calls plus asynchronous callbacks into the
//! [`EngineAdapter`] contract:
//!
//! - at most one join and one leave are awaited at a time; the matching
//!   callback completes them
//! - every wait has a deadline; a join that misses it resolves to
//!   `JoinOutcome::Failure`, a leave to `SessionError::Timeout`
//! - a join that missed its deadline is remembered until its result shows
//!   up (or one more deadline passes). That result is discarded and never
//!   completes a newer join, even one for the same channel
//! - if a discarded result was a success, the engine is in a channel nobody
//!   asked for; the next join or leave first takes it out of that channel
//! - remote participant callbacks are only forwarded while the engine is
//!   confirmed in a channel
//! - after `dispose`, pending waits fail with `Disposed` and every further
//!   callback is dropped
//!
//! Native error callbacks carry no channel, so an error arriving while a
//! join is abandoned is attributed to the oldest abandoned join.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::native::{NativeCallback, NativeEngine, NativeEventHandler};
use super::{EngineAdapter, EngineEvent, JoinRequest};
use crate::client::config::DEFAULT_EVENT_CAPACITY;
use crate::client::types::{JoinOutcome, RequestId, UserId};
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Initialized,
    Disposed,
}

struct PendingJoin {
    request_id: RequestId,
    channel: String,
    reply: oneshot::Sender<SessionResult<JoinOutcome>>,
}

/// A join whose deadline passed before the engine answered
#[derive(Debug)]
struct AbandonedJoin {
    request_id: RequestId,
    channel: String,
    expires_at: Instant,
}

struct AdapterState {
    lifecycle: Lifecycle,
    joined_channel: Option<String>,
    pending_join: Option<PendingJoin>,
    pending_leave: Option<oneshot::Sender<SessionResult<()>>>,
    /// Oldest first
    abandoned_joins: VecDeque<AbandonedJoin>,
    /// Channel entered by a join result that was discarded
    stray_channel: Option<String>,
}

impl AdapterState {
    fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Created,
            joined_channel: None,
            pending_join: None,
            pending_leave: None,
            abandoned_joins: VecDeque::new(),
            stray_channel: None,
        }
    }

    /// Claim the abandoned join a join result belongs to. `None` matches the
    /// oldest one.
    fn claim_abandoned(&mut self, channel: Option<&str>) -> Option<AbandonedJoin> {
        let now = Instant::now();
        self.abandoned_joins.retain(|abandoned| abandoned.expires_at > now);
        let index = match channel {
            Some(channel) => self.abandoned_joins.iter().position(|a| a.channel == channel)?,
            None => 0,
        };
        self.abandoned_joins.remove(index)
    }

    /// The engine is out of every channel and any join it was still working on
    fn reset_channel(&mut self) {
        self.joined_channel = None;
        self.stray_channel = None;
        self.abandoned_joins.clear();
    }
}

/// State shared with the native engine's callback thread
struct Shared {
    state: Mutex<AdapterState>,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn publish(&self, event: EngineEvent) {
        // nobody listening yet is fine
        let _ = self.events.send(event);
    }

    /// Remove the pending join if it still belongs to `request_id`
    fn clear_pending_join(&self, request_id: RequestId) -> bool {
        let mut state = self.state.lock();
        match &state.pending_join {
            Some(pending) if pending.request_id == request_id => {
                state.pending_join = None;
                true
            }
            _ => false,
        }
    }

    /// Give up on the pending join, remembering it so its result can be
    /// told apart from a newer join's for `grace`
    fn abandon_pending_join(&self, request_id: RequestId, grace: Duration) -> bool {
        let mut state = self.state.lock();
        match state.pending_join.take() {
            Some(pending) if pending.request_id == request_id => {
                state.abandoned_joins.push_back(AbandonedJoin {
                    request_id,
                    channel: pending.channel,
                    expires_at: Instant::now() + grace,
                });
                true
            }
            other => {
                state.pending_join = other;
                false
            }
        }
    }

    fn on_join_success(&self, state: &mut AdapterState, channel: String, uid: UserId) {
        if let Some(abandoned) = state.claim_abandoned(Some(channel.as_str())) {
            warn!(
                "discarding late join result for channel {} (uid {}) of {}",
                channel, uid, abandoned.request_id
            );
            state.stray_channel = Some(channel);
            return;
        }

        match state.pending_join.take() {
            Some(pending) if pending.channel == channel => {
                debug!("join {} confirmed for channel {} as uid {}", pending.request_id, channel, uid);
                state.joined_channel = Some(channel.clone());
                state.stray_channel = None;
                if pending.reply.send(Ok(JoinOutcome::Success(uid))).is_err() {
                    debug!("join {} waiter already gone", pending.request_id);
                }
                self.publish(EngineEvent::LocalJoinConfirmed { channel, uid });
            }
            other => {
                state.pending_join = other;
                warn!("discarding late join result for channel {} (uid {})", channel, uid);
                state.stray_channel = Some(channel);
            }
        }
    }

    fn on_error(&self, state: &mut AdapterState, code: i32, message: String) {
        if let Some(abandoned) = state.claim_abandoned(None) {
            warn!(
                "discarding late join error {} for {} to {}: {}",
                code, abandoned.request_id, abandoned.channel, message
            );
            return;
        }

        match state.pending_join.take() {
            Some(pending) => {
                debug!("join {} failed with engine error {}", pending.request_id, code);
                let reason = format!("engine error {}: {}", code, message);
                let _ = pending.reply.send(Ok(JoinOutcome::Failure(reason)));
            }
            None => {
                warn!("engine error {}: {}", code, message);
                self.publish(EngineEvent::EngineError { code, message });
            }
        }
    }
}

impl NativeEventHandler for Shared {
    fn on_callback(&self, callback: NativeCallback) {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Disposed {
            debug!("dropping {:?} received after dispose", callback);
            return;
        }

        match callback {
            NativeCallback::JoinChannelSuccess { channel, uid } => self.on_join_success(&mut state, channel, uid),
            NativeCallback::Error { code, message } => self.on_error(&mut state, code, message),
            NativeCallback::LeaveChannel => {
                state.reset_channel();
                match state.pending_leave.take() {
                    Some(reply) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => debug!("unsolicited leave acknowledgement"),
                }
            }
            NativeCallback::UserJoined { uid } => {
                if state.joined_channel.is_some() {
                    self.publish(EngineEvent::ParticipantJoined { uid });
                } else {
                    debug!("dropping join of remote uid {} while not in a channel", uid);
                }
            }
            NativeCallback::UserOffline { uid, reason } => {
                if state.joined_channel.is_some() {
                    self.publish(EngineEvent::ParticipantLeft { uid, reason });
                } else {
                    debug!("dropping departure of remote uid {} while not in a channel", uid);
                }
            }
            NativeCallback::ConnectionLost => {
                if let Some(channel) = state.joined_channel.take() {
                    self.publish(EngineEvent::ConnectionLost {
                        reason: format!("connection to channel {} lost", channel),
                    });
                } else {
                    debug!("connection lost while not in a channel");
                }
            }
        }
    }
}

/// [`EngineAdapter`] over any [`NativeEngine`]
pub struct CallbackAdapter<E: NativeEngine> {
    engine: E,
    shared: Arc<Shared>,
}

impl<E: NativeEngine> CallbackAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self::with_capacity(engine, DEFAULT_EVENT_CAPACITY)
    }

    /// `capacity` bounds the event queue; slow subscribers lag past it
    pub fn with_capacity(engine: E, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            engine,
            shared: Arc::new(Shared {
                state: Mutex::new(AdapterState::new()),
                events,
            }),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Channel the engine is currently in, as far as callbacks tell
    pub fn joined_channel(&self) -> Option<String> {
        self.shared.state.lock().joined_channel.clone()
    }

    fn check_usable(&self) -> SessionResult<bool> {
        match self.shared.state.lock().lifecycle {
            Lifecycle::Disposed => Err(SessionError::Disposed),
            Lifecycle::Created => Ok(false),
            Lifecycle::Initialized => Ok(true),
        }
    }

    /// Ask the engine to leave and wait for the acknowledgement
    async fn leave_native(&self, timeout: Duration) -> SessionResult<()> {
        let reply_rx = {
            let mut state = self.shared.state.lock();
            if state.pending_leave.is_some() {
                return Err(SessionError::transport("leave already in progress"));
            }
            let (reply, reply_rx) = oneshot::channel();
            state.pending_leave = Some(reply);
            reply_rx
        };

        if let Err(e) = self.engine.leave_channel() {
            self.shared.state.lock().pending_leave = None;
            return Err(SessionError::transport(format!("leave rejected: {}", e)));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Disposed),
            Err(_) => {
                let mut state = self.shared.state.lock();
                state.pending_leave = None;
                state.joined_channel = None;
                state.stray_channel = None;
                Err(SessionError::timeout("leave_channel", timeout))
            }
        }
    }

    /// Take the engine out of a channel it entered after its join was given up on
    async fn leave_stray_channel(&self, timeout: Duration) {
        let stray = self.shared.state.lock().stray_channel.clone();
        if let Some(channel) = stray {
            info!("leaving channel {} entered after its join deadline", channel);
            if let Err(e) = self.leave_native(timeout).await {
                warn!("could not leave channel {}: {}", channel, e);
            }
        }
    }
}

#[async_trait]
impl<E: NativeEngine> EngineAdapter for CallbackAdapter<E> {
    async fn initialize(&self, app_id: &str) -> SessionResult<()> {
        if app_id.trim().is_empty() {
            return Err(SessionError::config("app id must not be empty"));
        }
        if self.check_usable()? {
            debug!("engine already initialized");
            return Ok(());
        }

        let handler: Arc<dyn NativeEventHandler> = self.shared.clone();
        self.engine
            .initialize(app_id, handler)
            .map_err(|e| SessionError::transport(format!("engine initialization failed: {}", e)))?;

        let mut state = self.shared.state.lock();
        if state.lifecycle == Lifecycle::Disposed {
            return Err(SessionError::Disposed);
        }
        state.lifecycle = Lifecycle::Initialized;
        info!("engine initialized");
        Ok(())
    }

    async fn join_channel(&self, request: JoinRequest, timeout: Duration) -> SessionResult<JoinOutcome> {
        let JoinRequest { request_id, channel } = request;
        channel.validate()?;
        self.leave_stray_channel(timeout).await;

        let mut reply_rx = {
            let mut state = self.shared.state.lock();
            match state.lifecycle {
                Lifecycle::Created => return Err(SessionError::NotInitialized),
                Lifecycle::Disposed => return Err(SessionError::Disposed),
                Lifecycle::Initialized => {}
            }
            if let Some(pending) = &state.pending_join {
                return Ok(JoinOutcome::Failure(format!("join {} already in progress", pending.request_id)));
            }
            let (reply, reply_rx) = oneshot::channel();
            state.pending_join = Some(PendingJoin {
                request_id,
                channel: channel.channel_name.clone(),
                reply,
            });
            reply_rx
        };

        // engine calls are made without holding the lock; callbacks may
        // arrive on this very thread
        if let Err(e) = self.engine.set_audio_profile(channel.audio_profile) {
            self.shared.clear_pending_join(request_id);
            return Ok(JoinOutcome::Failure(format!("setting audio profile failed: {}", e)));
        }
        if let Err(e) = self
            .engine
            .join_channel(channel.token.as_deref(), &channel.channel_name, channel.requested_uid)
        {
            self.shared.clear_pending_join(request_id);
            return Ok(JoinOutcome::Failure(format!("join rejected: {}", e)));
        }

        match tokio::time::timeout(timeout, &mut reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Disposed),
            Err(_) => {
                if self.shared.abandon_pending_join(request_id, timeout) {
                    warn!("join {} to {} timed out after {:?}", request_id, channel.channel_name, timeout);
                    Ok(JoinOutcome::Failure(
                        SessionError::timeout("join_channel", timeout).to_string(),
                    ))
                } else {
                    // settled between the deadline and the cleanup
                    reply_rx.try_recv().unwrap_or(Err(SessionError::Disposed))
                }
            }
        }
    }

    async fn leave_channel(&self, timeout: Duration) -> SessionResult<()> {
        {
            let state = self.shared.state.lock();
            match state.lifecycle {
                Lifecycle::Disposed => return Err(SessionError::Disposed),
                Lifecycle::Created => return Ok(()),
                Lifecycle::Initialized => {}
            }
            if state.joined_channel.is_none() && state.stray_channel.is_none() {
                debug!("leave requested while not in a channel");
                return Ok(());
            }
        }
        self.leave_native(timeout).await
    }

    async fn set_local_audio_muted(&self, muted: bool) -> SessionResult<()> {
        if !self.check_usable()? {
            debug!("mute requested before initialization; ignoring");
            return Ok(());
        }
        self.engine
            .mute_local_audio(muted)
            .map_err(|e| SessionError::transport(format!("mute failed: {}", e)))
    }

    async fn dispose(&self) {
        let was_initialized = {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Disposed {
                return;
            }
            let was_initialized = state.lifecycle == Lifecycle::Initialized;
            state.lifecycle = Lifecycle::Disposed;
            state.reset_channel();
            if let Some(pending) = state.pending_join.take() {
                let _ = pending.reply.send(Err(SessionError::Disposed));
            }
            if let Some(reply) = state.pending_leave.take() {
                let _ = reply.send(Err(SessionError::Disposed));
            }
            was_initialized
        };

        if was_initialized {
            self.engine.release();
        }
        info!("engine adapter disposed");
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    fn is_initialized(&self) -> bool {
        self.shared.state.lock().lifecycle == Lifecycle::Initialized
    }
}
