//! Session state machine
//!
//! [`SessionStateMachine`] is the only place session state changes. It owns
//! two tasks:
//!
//! - a **worker** serving initialize/join/leave/mute requests one at a time,
//!   in the order they were submitted
//! - an **event pump** applying the adapter's [`EngineEvent`]s (remote
//!   participants, connection loss) as they arrive
//!
//! Both apply their changes under one lock and publish the resulting
//! [`SessionEvent`]s while still holding it, so subscribers observe changes
//! in the order they were made.
//!
//! ```text
//!  join/leave/mute ──► FIFO queue ──► worker ──┐
//!                                              ├──► Core (state, channel,
//!  EngineAdapter events ──► event pump ────────┘     participants) ──► EventEmitter
//! ```

mod pump;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::adapter::{EngineAdapter, JoinRequest};
use crate::client::config::SessionConfig;
use crate::client::types::{
    ChannelConfig, JoinOutcome, RemoteParticipant, RequestId, SessionId, SessionState, SessionStats, UserId,
};
use crate::error::{SessionError, SessionResult};
use crate::events::{EventEmitter, SessionEvent};

/// A queued state-changing request
enum Command {
    Initialize {
        app_id: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Join {
        channel: ChannelConfig,
        reply: oneshot::Sender<SessionResult<JoinOutcome>>,
    },
    Leave {
        reply: oneshot::Sender<SessionResult<()>>,
    },
    SetMuted {
        muted: bool,
        reply: oneshot::Sender<SessionResult<()>>,
    },
}

impl Command {
    fn fail(self, error: SessionError) {
        // the caller may have given up waiting
        match self {
            Command::Initialize { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Join { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::Leave { reply } => {
                let _ = reply.send(Err(error));
            }
            Command::SetMuted { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

struct Core {
    state: SessionState,
    channel: Option<String>,
    local_uid: Option<UserId>,
    audio_muted: bool,
    participants: HashMap<UserId, RemoteParticipant>,
    /// Join the machine is currently waiting on
    inflight: Option<RequestId>,
    join_attempts: u64,
    failed_joins: u64,
}

impl Core {
    fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            channel: None,
            local_uid: None,
            audio_muted: false,
            participants: HashMap::new(),
            inflight: None,
            join_attempts: 0,
            failed_joins: 0,
        }
    }

    fn clear_channel(&mut self) {
        self.channel = None;
        self.local_uid = None;
        self.participants.clear();
    }
}

struct Inner {
    session_id: SessionId,
    adapter: Arc<dyn EngineAdapter>,
    emitter: Arc<EventEmitter>,
    core: Mutex<Core>,
    pending: AtomicUsize,
    next_request: AtomicU64,
    shutdown: watch::Sender<bool>,
    join_timeout: Duration,
    leave_timeout: Duration,
}

/// Serialized owner of one session's state
pub struct SessionStateMachine {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionStateMachine {
    /// Create the machine and spawn its worker and event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        session_id: SessionId,
        adapter: Arc<dyn EngineAdapter>,
        emitter: Arc<EventEmitter>,
        config: &SessionConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let engine_events = adapter.subscribe();

        let inner = Arc::new(Inner {
            session_id,
            adapter,
            emitter,
            core: Mutex::new(Core::new()),
            pending: AtomicUsize::new(0),
            next_request: AtomicU64::new(0),
            shutdown,
            join_timeout: config.join_timeout(),
            leave_timeout: config.leave_timeout(),
        });

        tokio::spawn(run_worker(inner.clone(), command_rx));
        tokio::spawn(pump::run_event_pump(inner.clone(), engine_events));

        debug!("[{}] state machine started", inner.session_id);
        Self { inner, commands }
    }

    pub async fn initialize(&self, app_id: impl Into<String>) -> SessionResult<()> {
        let app_id = app_id.into();
        self.submit(|reply| Command::Initialize { app_id, reply }).await
    }

    /// Queue a join. Resolves once the join settles or fails validation.
    pub async fn join(&self, channel: ChannelConfig) -> SessionResult<JoinOutcome> {
        self.submit(|reply| Command::Join { channel, reply }).await
    }

    /// Queue a leave. Leaving when not in a channel succeeds without effect.
    pub async fn leave(&self) -> SessionResult<()> {
        self.submit(|reply| Command::Leave { reply }).await
    }

    pub async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        self.submit(|reply| Command::SetMuted { muted, reply }).await
    }

    /// Move to `Disposed`, fail everything queued and release the adapter.
    /// Later calls return immediately.
    pub async fn dispose(&self) {
        let first = {
            let mut core = self.inner.core.lock();
            if core.state == SessionState::Disposed {
                false
            } else {
                let was_in_channel = matches!(core.state, SessionState::Connected | SessionState::Leaving);
                core.inflight = None;
                core.clear_channel();
                self.inner.transition(&mut core, SessionState::Disposed);
                if was_in_channel {
                    self.inner.emitter.emit(SessionEvent::connection_changed(false, None));
                }
                true
            }
        };

        self.inner.shutdown.send_replace(true);

        if first {
            self.inner.adapter.dispose().await;
            info!("[{}] session disposed", self.inner.session_id);
            self.inner.emitter.log("session disposed");
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn current_channel(&self) -> Option<String> {
        self.inner.core.lock().channel.clone()
    }

    pub fn local_uid(&self) -> Option<UserId> {
        self.inner.core.lock().local_uid
    }

    pub fn is_connected(&self) -> bool {
        self.inner.core.lock().state == SessionState::Connected
    }

    pub fn is_audio_muted(&self) -> bool {
        self.inner.core.lock().audio_muted
    }

    /// Remote participants ordered by uid
    pub fn participants(&self) -> Vec<RemoteParticipant> {
        let mut participants: Vec<_> = self.inner.core.lock().participants.values().cloned().collect();
        participants.sort_by_key(|p| p.uid);
        participants
    }

    pub fn stats(&self) -> SessionStats {
        let core = self.inner.core.lock();
        SessionStats {
            session_id: self.inner.session_id.clone(),
            state: core.state,
            current_channel: core.channel.clone(),
            local_uid: core.local_uid,
            audio_muted: core.audio_muted,
            participant_count: core.participants.len(),
            join_attempts: core.join_attempts,
            failed_joins: core.failed_joins,
            pending_requests: self.inner.pending.load(Ordering::SeqCst),
        }
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<SessionResult<T>>) -> Command,
    ) -> SessionResult<T> {
        if self.state() == SessionState::Disposed {
            return Err(SessionError::Disposed);
        }

        let (reply, reply_rx) = oneshot::channel();
        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        if self.commands.send(make(reply)).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::Disposed);
        }

        match reply_rx.await {
            Ok(result) => result,
            Err(_) if self.state() == SessionState::Disposed => Err(SessionError::Disposed),
            Err(_) => Err(SessionError::internal("session worker stopped")),
        }
    }
}

impl Drop for SessionStateMachine {
    fn drop(&mut self) {
        // stops the worker and pump; the adapter is released only by dispose
        self.inner.shutdown.send_replace(true);
    }
}

/// Resolves once shutdown has been signalled
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn run_worker(inner: Arc<Inner>, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let command = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        inner.pending.fetch_sub(1, Ordering::SeqCst);
        inner.serve(command).await;
    }

    commands.close();
    while let Ok(command) = commands.try_recv() {
        inner.pending.fetch_sub(1, Ordering::SeqCst);
        command.fail(SessionError::Disposed);
    }
    debug!("[{}] worker stopped", inner.session_id);
}

impl Inner {
    async fn serve(&self, command: Command) {
        match command {
            Command::Initialize { app_id, reply } => {
                let _ = reply.send(self.initialize(&app_id).await);
            }
            Command::Join { channel, reply } => {
                let _ = reply.send(self.join(channel).await);
            }
            Command::Leave { reply } => {
                let _ = reply.send(self.leave().await);
            }
            Command::SetMuted { muted, reply } => {
                let _ = reply.send(self.set_muted(muted).await);
            }
        }
    }

    /// Apply a transition if it is an edge of the state graph.
    /// Publishes `StateChanged` and a log line.
    fn transition(&self, core: &mut Core, to: SessionState) -> bool {
        let from = core.state;
        if from == to {
            return true;
        }
        if !from.can_transition_to(to) {
            warn!("[{}] refusing transition {} -> {}", self.session_id, from, to);
            return false;
        }
        core.state = to;
        info!("[{}] {} -> {}", self.session_id, from, to);
        self.emitter.emit(SessionEvent::state_changed(from, to));
        self.emitter.log(format!("state {} -> {}", from, to));
        true
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    async fn initialize(&self, app_id: &str) -> SessionResult<()> {
        let state = self.core.lock().state;
        match state {
            SessionState::Disposed => return Err(SessionError::Disposed),
            SessionState::Uninitialized => {}
            _ => return Ok(()),
        }

        match self.adapter.initialize(app_id).await {
            Ok(()) => {
                let mut core = self.core.lock();
                if core.state == SessionState::Disposed {
                    return Err(SessionError::Disposed);
                }
                self.transition(&mut core, SessionState::Initialized);
                self.emitter.log("engine initialized");
                Ok(())
            }
            Err(e) => {
                warn!("[{}] initialize failed: {}", self.session_id, e);
                self.emitter.log(format!("initialize failed: {}", e));
                Err(e)
            }
        }
    }

    async fn join(&self, channel: ChannelConfig) -> SessionResult<JoinOutcome> {
        channel.validate()?;

        let in_other_channel = {
            let core = self.core.lock();
            match core.state {
                SessionState::Disposed => return Err(SessionError::Disposed),
                SessionState::Uninitialized => return Err(SessionError::NotInitialized),
                SessionState::Connected => {
                    if let (Some(current), Some(uid)) = (core.channel.as_deref(), core.local_uid) {
                        if current == channel.channel_name {
                            debug!("[{}] already in {}", self.session_id, current);
                            return Ok(JoinOutcome::Success(uid));
                        }
                    }
                    true
                }
                _ => false,
            }
        };

        if in_other_channel {
            info!("[{}] leaving current channel before joining {}", self.session_id, channel.channel_name);
            self.emitter.log(format!("implicit leave before joining {}", channel.channel_name));
            self.leave().await?;
        }

        let request_id = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst) + 1);
        {
            let mut core = self.core.lock();
            match core.state {
                SessionState::Disposed => return Err(SessionError::Disposed),
                SessionState::Initialized => {}
                other => {
                    return Err(SessionError::internal(format!("cannot join from state {}", other)));
                }
            }
            core.inflight = Some(request_id);
            core.join_attempts += 1;
            core.participants.clear();
            self.transition(&mut core, SessionState::Connecting);
        }
        self.emitter.log(format!("joining {} ({})", channel.channel_name, request_id));

        let request = JoinRequest {
            request_id,
            channel: channel.clone(),
        };
        let mut shutdown = self.shutdown_signal();
        let result = tokio::select! {
            result = self.adapter.join_channel(request, self.join_timeout) => result,
            _ = stopped(&mut shutdown) => Err(SessionError::Disposed),
        };

        let mut core = self.core.lock();
        if core.state == SessionState::Disposed || core.inflight != Some(request_id) {
            debug!("[{}] dropping result of {}: no longer waiting on it", self.session_id, request_id);
            return Err(SessionError::Disposed);
        }
        core.inflight = None;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_validation() => {
                self.transition(&mut core, SessionState::Initialized);
                self.emitter.log(format!("join {} rejected: {}", request_id, e));
                return Err(e);
            }
            Err(e) => JoinOutcome::Failure(e.to_string()),
        };

        match &outcome {
            JoinOutcome::Success(uid) => {
                core.channel = Some(channel.channel_name.clone());
                core.local_uid = Some(*uid);
                self.transition(&mut core, SessionState::Connected);
                self.emitter
                    .emit(SessionEvent::connection_changed(true, Some(channel.channel_name.clone())));
                self.emitter
                    .log(format!("joined {} as uid {}", channel.channel_name, uid));
            }
            JoinOutcome::Failure(reason) => {
                core.failed_joins += 1;
                core.participants.clear();
                self.transition(&mut core, SessionState::Initialized);
                warn!("[{}] join {} to {} failed: {}", self.session_id, request_id, channel.channel_name, reason);
                self.emitter
                    .log(format!("join {} failed: {}", channel.channel_name, reason));
            }
        }
        Ok(outcome)
    }

    async fn leave(&self) -> SessionResult<()> {
        let channel = {
            let mut core = self.core.lock();
            match core.state {
                SessionState::Disposed => return Err(SessionError::Disposed),
                SessionState::Connected => {}
                other => {
                    debug!("[{}] leave ignored in state {}", self.session_id, other);
                    return Ok(());
                }
            }
            self.transition(&mut core, SessionState::Leaving);
            core.channel.clone().unwrap_or_default()
        };

        let mut shutdown = self.shutdown_signal();
        let result = tokio::select! {
            result = self.adapter.leave_channel(self.leave_timeout) => result,
            _ = stopped(&mut shutdown) => Err(SessionError::Disposed),
        };

        let mut core = self.core.lock();
        if core.state == SessionState::Disposed {
            return Err(SessionError::Disposed);
        }
        match result {
            Ok(()) => self.emitter.log(format!("left {}", channel)),
            Err(e) => {
                warn!("[{}] leave of {} failed: {}; forcing Initialized", self.session_id, channel, e);
                self.emitter.log(format!("leave {} failed: {}", channel, e));
            }
        }
        core.clear_channel();
        self.transition(&mut core, SessionState::Initialized);
        self.emitter.emit(SessionEvent::connection_changed(false, None));
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        let state = self.core.lock().state;
        match state {
            SessionState::Disposed => return Err(SessionError::Disposed),
            SessionState::Uninitialized => {
                debug!("[{}] mute ignored before initialize", self.session_id);
                return Ok(());
            }
            _ => {}
        }

        let verb = if muted { "muted" } else { "unmuted" };
        match self.adapter.set_local_audio_muted(muted).await {
            Ok(()) => {
                let mut core = self.core.lock();
                if core.state == SessionState::Disposed {
                    return Err(SessionError::Disposed);
                }
                core.audio_muted = muted;
                self.emitter.log(format!("local audio {}", verb));
                Ok(())
            }
            Err(SessionError::Disposed) => Err(SessionError::Disposed),
            Err(e) => {
                warn!("[{}] could not set audio {}: {}", self.session_id, verb, e);
                self.emitter.log(format!("setting audio {} failed: {}", verb, e));
                Ok(())
            }
        }
    }
}
