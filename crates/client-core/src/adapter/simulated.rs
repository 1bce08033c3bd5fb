//! Deterministic in-process engine
//!
//! `SimulatedEngine` implements [`NativeEngine`] without any network: each
//! call is recorded, and its callbacks are raised from a tokio task after a
//! scripted delay. Tests and the demo CLI drive it through
//! [`JoinBehavior`]/[`LeaveBehavior`] scripts and [`SimulatedEngine::inject`].
//!
//! The local join is confirmed with `JoinChannelSuccess` only; the engine
//! never raises `UserJoined` for the local user.
//!
//! ```rust
//! use rtc_client_core::adapter::{JoinBehavior, SimulatedEngine};
//! use std::time::Duration;
//!
//! let engine = SimulatedEngine::new()
//!     .with_default_join(JoinBehavior::succeed_with_uid(42, Duration::from_millis(5)))
//!     .with_remote_participants([1001, 1002]);
//!
//! // the next join fails, later ones use the default
//! engine.script_join(JoinBehavior::fail(110, "invalid token", Duration::from_millis(5)));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::native::{NativeCallback, NativeEngine, NativeError, NativeEventHandler};
use crate::client::types::{AudioProfile, UserId};

/// First uid handed out when a join does not request one
pub const FIRST_ASSIGNED_UID: UserId = 1000;

const DEFAULT_JOIN_DELAY: Duration = Duration::from_millis(20);
const DEFAULT_LEAVE_DELAY: Duration = Duration::from_millis(10);
const DEFAULT_REMOTE_DELAY: Duration = Duration::from_millis(5);

/// How the engine answers one `join_channel` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinBehavior {
    /// Raise `JoinChannelSuccess` after `after`. The uid is `uid`, else the
    /// requested uid, else the next assigned one.
    Succeed { uid: Option<UserId>, after: Duration },
    /// Raise `Error` after `after`
    Fail { code: i32, message: String, after: Duration },
    /// Refuse synchronously
    Reject { code: i32, message: String },
    /// Never answer
    NoResponse,
}

impl JoinBehavior {
    pub fn succeed_after(after: Duration) -> Self {
        JoinBehavior::Succeed { uid: None, after }
    }

    pub fn succeed_with_uid(uid: UserId, after: Duration) -> Self {
        JoinBehavior::Succeed { uid: Some(uid), after }
    }

    pub fn fail(code: i32, message: impl Into<String>, after: Duration) -> Self {
        JoinBehavior::Fail {
            code,
            message: message.into(),
            after,
        }
    }

    pub fn reject(code: i32, message: impl Into<String>) -> Self {
        JoinBehavior::Reject {
            code,
            message: message.into(),
        }
    }
}

impl Default for JoinBehavior {
    fn default() -> Self {
        JoinBehavior::succeed_after(DEFAULT_JOIN_DELAY)
    }
}

/// How the engine answers `leave_channel`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveBehavior {
    Acknowledge { after: Duration },
    Reject { code: i32, message: String },
    NoResponse,
}

impl Default for LeaveBehavior {
    fn default() -> Self {
        LeaveBehavior::Acknowledge {
            after: DEFAULT_LEAVE_DELAY,
        }
    }
}

/// A call received by the simulated engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Initialize { app_id: String },
    SetAudioProfile(AudioProfile),
    JoinChannel {
        channel: String,
        token: Option<String>,
        uid: Option<UserId>,
    },
    LeaveChannel,
    MuteLocalAudio(bool),
    Release,
}

struct Plan {
    scripted_joins: VecDeque<JoinBehavior>,
    default_join: JoinBehavior,
    leave: LeaveBehavior,
    remote_participants: Vec<UserId>,
    remote_delay: Duration,
    initialize_error: Option<NativeError>,
}

struct SimulatedInner {
    handler: Mutex<Option<Arc<dyn NativeEventHandler>>>,
    plan: Mutex<Plan>,
    calls: Mutex<Vec<EngineCall>>,
    next_uid: AtomicU32,
}

/// Scriptable engine with no network behind it
#[derive(Clone)]
pub struct SimulatedEngine {
    inner: Arc<SimulatedInner>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SimulatedInner {
                handler: Mutex::new(None),
                plan: Mutex::new(Plan {
                    scripted_joins: VecDeque::new(),
                    default_join: JoinBehavior::default(),
                    leave: LeaveBehavior::default(),
                    remote_participants: Vec::new(),
                    remote_delay: DEFAULT_REMOTE_DELAY,
                    initialize_error: None,
                }),
                calls: Mutex::new(Vec::new()),
                next_uid: AtomicU32::new(FIRST_ASSIGNED_UID),
            }),
        }
    }

    pub fn with_default_join(self, behavior: JoinBehavior) -> Self {
        self.set_default_join(behavior);
        self
    }

    pub fn with_leave(self, behavior: LeaveBehavior) -> Self {
        self.set_leave_behavior(behavior);
        self
    }

    /// Remote users announced (one `UserJoined` each) after every successful join
    pub fn with_remote_participants(self, uids: impl IntoIterator<Item = UserId>) -> Self {
        self.inner.plan.lock().remote_participants = uids.into_iter().collect();
        self
    }

    /// Queue a behavior for the next join; queued behaviors are used in order
    /// before falling back to the default
    pub fn script_join(&self, behavior: JoinBehavior) {
        self.inner.plan.lock().scripted_joins.push_back(behavior);
    }

    pub fn set_default_join(&self, behavior: JoinBehavior) {
        self.inner.plan.lock().default_join = behavior;
    }

    pub fn set_leave_behavior(&self, behavior: LeaveBehavior) {
        self.inner.plan.lock().leave = behavior;
    }

    /// Make `initialize` fail with `error`
    pub fn fail_initialize(&self, error: NativeError) {
        self.inner.plan.lock().initialize_error = Some(error);
    }

    /// Deliver a callback right now, on the caller's thread
    pub fn inject(&self, callback: NativeCallback) {
        let handler = self.inner.handler.lock().clone();
        match handler {
            Some(handler) => handler.on_callback(callback),
            None => tracing::debug!("simulated engine has no handler; dropping {:?}", callback),
        }
    }

    /// Every call received so far, oldest first
    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.calls.lock().clone()
    }

    pub fn join_count(&self) -> usize {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|call| matches!(call, EngineCall::JoinChannel { .. }))
            .count()
    }

    fn record(&self, call: EngineCall) {
        self.inner.calls.lock().push(call);
    }

    fn raise_later(&self, delay: Duration, callbacks: Vec<(Duration, NativeCallback)>) {
        let Some(handler) = self.inner.handler.lock().clone() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for (gap, callback) in callbacks {
                if !gap.is_zero() {
                    tokio::time::sleep(gap).await;
                }
                handler.on_callback(callback);
            }
        });
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for SimulatedEngine {
    fn initialize(&self, app_id: &str, handler: Arc<dyn NativeEventHandler>) -> Result<(), NativeError> {
        self.record(EngineCall::Initialize {
            app_id: app_id.to_string(),
        });
        if let Some(error) = self.inner.plan.lock().initialize_error.clone() {
            return Err(error);
        }
        *self.inner.handler.lock() = Some(handler);
        Ok(())
    }

    fn set_audio_profile(&self, profile: AudioProfile) -> Result<(), NativeError> {
        self.record(EngineCall::SetAudioProfile(profile));
        Ok(())
    }

    fn join_channel(&self, token: Option<&str>, channel: &str, uid: Option<UserId>) -> Result<(), NativeError> {
        self.record(EngineCall::JoinChannel {
            channel: channel.to_string(),
            token: token.map(str::to_string),
            uid,
        });

        let (behavior, remotes, remote_delay) = {
            let mut plan = self.inner.plan.lock();
            let behavior = plan
                .scripted_joins
                .pop_front()
                .unwrap_or_else(|| plan.default_join.clone());
            (behavior, plan.remote_participants.clone(), plan.remote_delay)
        };

        match behavior {
            JoinBehavior::Succeed { uid: fixed, after } => {
                let local_uid = fixed
                    .or(uid)
                    .unwrap_or_else(|| self.inner.next_uid.fetch_add(1, Ordering::Relaxed));
                let mut callbacks = vec![(
                    Duration::ZERO,
                    NativeCallback::JoinChannelSuccess {
                        channel: channel.to_string(),
                        uid: local_uid,
                    },
                )];
                callbacks.extend(
                    remotes
                        .into_iter()
                        .map(|remote| (remote_delay, NativeCallback::UserJoined { uid: remote })),
                );
                self.raise_later(after, callbacks);
                Ok(())
            }
            JoinBehavior::Fail { code, message, after } => {
                self.raise_later(after, vec![(Duration::ZERO, NativeCallback::Error { code, message })]);
                Ok(())
            }
            JoinBehavior::Reject { code, message } => Err(NativeError::new(code, message)),
            JoinBehavior::NoResponse => Ok(()),
        }
    }

    fn leave_channel(&self) -> Result<(), NativeError> {
        self.record(EngineCall::LeaveChannel);
        let behavior = self.inner.plan.lock().leave.clone();
        match behavior {
            LeaveBehavior::Acknowledge { after } => {
                self.raise_later(after, vec![(Duration::ZERO, NativeCallback::LeaveChannel)]);
                Ok(())
            }
            LeaveBehavior::Reject { code, message } => Err(NativeError::new(code, message)),
            LeaveBehavior::NoResponse => Ok(()),
        }
    }

    fn mute_local_audio(&self, muted: bool) -> Result<(), NativeError> {
        self.record(EngineCall::MuteLocalAudio(muted));
        Ok(())
    }

    fn release(&self) {
        self.record(EngineCall::Release);
    }
}
