//! Applies adapter events to the session

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::{stopped, Inner};
use crate::adapter::EngineEvent;
use crate::client::types::{RemoteParticipant, SessionState};
use crate::events::SessionEvent;

pub(super) async fn run_event_pump(inner: Arc<Inner>, mut events: broadcast::Receiver<EngineEvent>) {
    let mut shutdown = inner.shutdown_signal();

    loop {
        let event = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => inner.apply_engine_event(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("[{}] event pump lagged, {} adapter events lost", inner.session_id, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("[{}] event pump stopped", inner.session_id);
}

impl Inner {
    fn apply_engine_event(&self, event: EngineEvent) {
        let mut core = self.core.lock();
        let in_channel = matches!(core.state, SessionState::Connecting | SessionState::Connected);

        match event {
            EngineEvent::LocalJoinConfirmed { channel, uid } => {
                if in_channel {
                    self.emitter.emit(SessionEvent::LocalJoinConfirmed {
                        channel,
                        uid,
                        timestamp: Utc::now(),
                    });
                }
            }
            EngineEvent::ParticipantJoined { uid } => {
                if !in_channel {
                    debug!("[{}] ignoring join of {} outside a channel", self.session_id, uid);
                    return;
                }
                if core.participants.contains_key(&uid) {
                    return;
                }
                let participant = RemoteParticipant {
                    uid,
                    joined_at: Utc::now(),
                };
                let timestamp = participant.joined_at;
                core.participants.insert(uid, participant);
                self.emitter.emit(SessionEvent::ParticipantJoined { uid, timestamp });
                self.emitter.log(format!("participant {} joined", uid));
            }
            EngineEvent::ParticipantLeft { uid, reason } => {
                if !in_channel {
                    debug!("[{}] ignoring departure of {} outside a channel", self.session_id, uid);
                    return;
                }
                if core.participants.remove(&uid).is_some() {
                    self.emitter.emit(SessionEvent::ParticipantLeft {
                        uid,
                        reason,
                        timestamp: Utc::now(),
                    });
                    self.emitter.log(format!("participant {} left ({:?})", uid, reason));
                }
            }
            EngineEvent::ConnectionLost { reason } => {
                if core.state != SessionState::Connected {
                    debug!("[{}] connection loss ignored in state {}", self.session_id, core.state);
                    return;
                }
                warn!("[{}] {}", self.session_id, reason);
                core.clear_channel();
                self.transition(&mut core, SessionState::Initialized);
                self.emitter.emit(SessionEvent::connection_changed(false, None));
                self.emitter.log(reason);
            }
            EngineEvent::EngineError { code, message } => {
                info!("[{}] engine reported error {}: {}", self.session_id, code, message);
                self.emitter.log(format!("engine error {}: {}", code, message));
            }
        }
    }
}
