//! End-to-end session scenarios against the simulated engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rtc_client_core::adapter::{EngineCall, JoinBehavior, LeaveBehavior, SimulatedEngine};
use rtc_client_core::{
    ChannelConfig, JoinOutcome, RtcSession, SessionConfig, SessionError, SessionEvent, SessionEventHandler,
    SessionState,
};
use tokio::sync::{broadcast, Mutex};

const SHORT: Duration = Duration::from_millis(5);

fn simulated_session(engine: &SimulatedEngine) -> Arc<RtcSession> {
    let config = SessionConfig::new("app1")
        .with_join_timeout(Duration::from_millis(500))
        .with_leave_timeout(Duration::from_millis(200));
    Arc::new(RtcSession::simulated(config, engine.clone()).unwrap())
}

fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

fn connection_changes(events: &[SessionEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ConnectionStateChanged { connected, .. } => Some(*connected),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_initialize_with_empty_app_id() {
    let engine = SimulatedEngine::new();
    let session = simulated_session(&engine);

    let err = session.initialize("").await.unwrap_err();
    assert!(matches!(err, SessionError::Configuration { .. }));
    assert_eq!(session.state(), SessionState::Uninitialized);
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_join_success_with_assigned_uid() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_with_uid(42, SHORT));
    let session = simulated_session(&engine);
    let mut events = session.subscribe_events();

    session.initialize("app1").await.unwrap();
    let outcome = session.join_channel(ChannelConfig::new("room1")).await.unwrap();

    assert_eq!(outcome, JoinOutcome::Success(42));
    assert_eq!(session.current_channel().as_deref(), Some("room1"));
    assert!(session.is_connected());
    assert_eq!(session.local_uid(), Some(42));
    assert_eq!(connection_changes(&drain(&mut events)), vec![true]);
}

#[tokio::test]
async fn test_join_other_channel_leaves_first() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(SHORT));
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();

    let mut events = session.subscribe_events();
    let outcome = session.join_channel(ChannelConfig::new("room2")).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(session.current_channel().as_deref(), Some("room2"));

    let events = drain(&mut events);
    assert_eq!(connection_changes(&events), vec![false, true]);

    // the disconnect from room1 is published before the new join starts
    let disconnected_at = events
        .iter()
        .position(|e| matches!(e, SessionEvent::ConnectionStateChanged { connected: false, .. }))
        .unwrap();
    let connecting_at = events
        .iter()
        .position(|e| {
            matches!(
                e,
                SessionEvent::StateChanged {
                    to: SessionState::Connecting,
                    ..
                }
            )
        })
        .unwrap();
    assert!(disconnected_at < connecting_at);

    let calls = engine.calls();
    let leave_at = calls.iter().position(|c| *c == EngineCall::LeaveChannel).unwrap();
    let second_join_at = calls
        .iter()
        .position(|c| matches!(c, EngineCall::JoinChannel { channel, .. } if channel == "room2"))
        .unwrap();
    assert!(leave_at < second_join_at);
}

#[tokio::test]
async fn test_mute_before_initialize_is_noop() {
    let engine = SimulatedEngine::new();
    let session = simulated_session(&engine);

    session.set_audio_muted(true).await.unwrap();
    assert!(!session.is_audio_muted());
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn test_mute_after_initialize() {
    let engine = SimulatedEngine::new();
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();

    session.set_audio_muted(true).await.unwrap();
    assert!(session.is_audio_muted());
    session.set_audio_muted(false).await.unwrap();
    assert!(!session.is_audio_muted());
    assert!(engine.calls().contains(&EngineCall::MuteLocalAudio(true)));
}

#[tokio::test]
async fn test_dispose_twice() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(SHORT));
    let session = simulated_session(&engine);
    let mut events = session.subscribe_events();
    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();

    session.dispose().await;
    let after_first = session.state();
    session.dispose().await;

    assert_eq!(after_first, SessionState::Disposed);
    assert_eq!(session.state(), SessionState::Disposed);
    assert!(!session.is_connected());
    assert!(session.current_channel().is_none());

    let releases = engine.calls().iter().filter(|c| **c == EngineCall::Release).count();
    assert_eq!(releases, 1);

    let events = drain(&mut events);
    let disposals = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::StateChanged {
                    to: SessionState::Disposed,
                    ..
                }
            )
        })
        .count();
    assert_eq!(disposals, 1);
    assert_eq!(connection_changes(&events), vec![true, false]);
}

#[tokio::test]
async fn test_leave_when_initialized_is_noop() {
    let engine = SimulatedEngine::new();
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();
    let mut events = session.subscribe_events();

    session.leave_channel().await.unwrap();

    assert_eq!(session.state(), SessionState::Initialized);
    assert!(!engine.calls().contains(&EngineCall::LeaveChannel));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn test_leave_before_initialize_is_noop() {
    let session = simulated_session(&SimulatedEngine::new());
    session.leave_channel().await.unwrap();
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn test_join_stays_connected_until_leave() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(SHORT));
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();

    let config = ChannelConfig::new("room1").with_requested_uid(7);
    let outcome = session.join_channel(config.clone()).await.unwrap();
    assert_eq!(outcome, JoinOutcome::Success(7));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(session.is_connected());
    assert_eq!(session.current_channel(), Some(config.channel_name));

    session.leave_channel().await.unwrap();
    assert!(!session.is_connected());
    assert!(session.current_channel().is_none());
    assert_eq!(session.state(), SessionState::Initialized);
}

#[tokio::test]
async fn test_join_failure_is_an_outcome() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::fail(110, "invalid token", SHORT));
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();

    let outcome = session
        .join_channel(ChannelConfig::new("room1").with_token("expired"))
        .await
        .unwrap();
    assert!(matches!(outcome, JoinOutcome::Failure(ref reason) if reason.contains("invalid token")));
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(!session.is_connected());

    // not fatal: the next join may succeed
    engine.set_default_join(JoinBehavior::succeed_after(SHORT));
    assert!(session.join_channel(ChannelConfig::new("room1")).await.unwrap().is_success());
}

#[tokio::test]
async fn test_stale_response_does_not_override_newer_join() {
    let engine = SimulatedEngine::new();
    let config = SessionConfig::new("app1").with_join_timeout(Duration::from_millis(100));
    let session = RtcSession::simulated(config, engine.clone()).unwrap();
    session.initialize("app1").await.unwrap();

    // answers 30 ms after its deadline, while the second join is waiting
    engine.script_join(JoinBehavior::succeed_with_uid(1, Duration::from_millis(130)));
    engine.script_join(JoinBehavior::succeed_with_uid(2, Duration::from_millis(70)));

    let first = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    assert!(!first.is_success());
    assert_eq!(session.state(), SessionState::Initialized);

    let second = session.join_channel(ChannelConfig::new("room2")).await.unwrap();
    assert_eq!(second, JoinOutcome::Success(2));
    assert_eq!(session.current_channel().as_deref(), Some("room2"));
    assert_eq!(session.local_uid(), Some(2));
}

#[tokio::test]
async fn test_stale_failure_does_not_fail_newer_join() {
    let engine = SimulatedEngine::new();
    let config = SessionConfig::new("app1").with_join_timeout(Duration::from_millis(100));
    let session = RtcSession::simulated(config, engine.clone()).unwrap();
    session.initialize("app1").await.unwrap();

    // the first join's error lands while the second join is waiting
    engine.script_join(JoinBehavior::fail(110, "stale error from first join", Duration::from_millis(130)));
    engine.script_join(JoinBehavior::succeed_with_uid(2, Duration::from_millis(70)));

    let first = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    assert!(matches!(first, JoinOutcome::Failure(ref r) if r.contains("timed out")));

    let second = session.join_channel(ChannelConfig::new("room2")).await.unwrap();
    assert_eq!(second, JoinOutcome::Success(2));
    assert_eq!(session.current_channel().as_deref(), Some("room2"));
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_stale_response_for_same_channel_does_not_override_newer_join() {
    let engine = SimulatedEngine::new();
    let config = SessionConfig::new("app1").with_join_timeout(Duration::from_millis(100));
    let session = RtcSession::simulated(config, engine.clone()).unwrap();
    session.initialize("app1").await.unwrap();

    engine.script_join(JoinBehavior::succeed_with_uid(1, Duration::from_millis(130)));
    engine.script_join(JoinBehavior::succeed_with_uid(2, Duration::from_millis(70)));

    let first = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    assert!(!first.is_success());

    let second = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    assert_eq!(second, JoinOutcome::Success(2));
    assert_eq!(session.local_uid(), Some(2));

    // the engine is in room1 through the second join, so leaving reaches it
    session.leave_channel().await.unwrap();
    assert!(engine.calls().contains(&EngineCall::LeaveChannel));
}

#[tokio::test]
async fn test_late_response_after_timeout_is_ignored() {
    let engine = SimulatedEngine::new();
    let config = SessionConfig::new("app1").with_join_timeout(Duration::from_millis(40));
    let session = RtcSession::simulated(config, engine.clone()).unwrap();
    session.initialize("app1").await.unwrap();

    engine.script_join(JoinBehavior::succeed_with_uid(1, Duration::from_millis(80)));
    let outcome = session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    assert!(!outcome.is_success());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(session.current_channel().is_none());
    assert_eq!(session.stats().failed_joins, 1);
}

#[tokio::test]
async fn test_leave_during_connecting_runs_after_join() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(Duration::from_millis(50)));
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();
    let mut events = session.subscribe_events();

    let join = {
        let session = session.clone();
        tokio::spawn(async move { session.join_channel(ChannelConfig::new("room1")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(session.state(), SessionState::Connecting);

    session.leave_channel().await.unwrap();
    assert!(join.await.unwrap().unwrap().is_success());

    let trace: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        trace,
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Leaving,
            SessionState::Initialized,
        ]
    );
    assert!(engine.calls().contains(&EngineCall::LeaveChannel));
}

#[tokio::test]
async fn test_leave_failure_is_best_effort() {
    let engine = SimulatedEngine::new()
        .with_default_join(JoinBehavior::succeed_after(SHORT))
        .with_leave(LeaveBehavior::NoResponse);
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();

    session.leave_channel().await.unwrap();
    assert_eq!(session.state(), SessionState::Initialized);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn test_remote_participants_tracked() {
    let engine = SimulatedEngine::new()
        .with_default_join(JoinBehavior::succeed_after(SHORT))
        .with_remote_participants([2001, 2002]);
    let session = simulated_session(&engine);
    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let uids: Vec<_> = session.participants().iter().map(|p| p.uid).collect();
    assert_eq!(uids, vec![2001, 2002]);

    session.leave_channel().await.unwrap();
    assert!(session.participants().is_empty());
}

#[derive(Default)]
struct ConnectionRecorder {
    changes: Mutex<Vec<bool>>,
}

#[async_trait]
impl SessionEventHandler for ConnectionRecorder {
    async fn on_connection_state_changed(&self, connected: bool) {
        self.changes.lock().await.push(connected);
    }
}

#[tokio::test]
async fn test_handler_subscription() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(SHORT));
    let session = simulated_session(&engine);
    let recorder = Arc::new(ConnectionRecorder::default());
    let id = session.add_event_handler(recorder.clone());

    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    session.leave_channel().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*recorder.changes.lock().await, vec![true, false]);

    assert!(session.unsubscribe(id));
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(recorder.changes.lock().await.len(), 2);
}

/// Calls back into the session from inside the handler
struct LeaveOnJoin {
    session: Arc<RtcSession>,
    done: Mutex<bool>,
}

#[async_trait]
impl SessionEventHandler for LeaveOnJoin {
    async fn on_connection_state_changed(&self, connected: bool) {
        if connected {
            self.session.leave_channel().await.unwrap();
            *self.done.lock().await = true;
        }
    }
}

#[tokio::test]
async fn test_handler_may_call_back_into_session() {
    let engine = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_after(SHORT));
    let session = simulated_session(&engine);
    let handler = Arc::new(LeaveOnJoin {
        session: session.clone(),
        done: Mutex::new(false),
    });
    session.add_event_handler(handler.clone());

    session.initialize("app1").await.unwrap();
    session.join_channel(ChannelConfig::new("room1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(*handler.done.lock().await);
    assert_eq!(session.state(), SessionState::Initialized);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let engine_a = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_with_uid(1, SHORT));
    let engine_b = SimulatedEngine::new().with_default_join(JoinBehavior::succeed_with_uid(2, SHORT));
    let a = simulated_session(&engine_a);
    let b = simulated_session(&engine_b);

    a.initialize("app1").await.unwrap();
    b.initialize("app1").await.unwrap();
    let (ra, rb) = tokio::join!(
        a.join_channel(ChannelConfig::new("room-a")),
        b.join_channel(ChannelConfig::new("room-b"))
    );
    assert_eq!(ra.unwrap(), JoinOutcome::Success(1));
    assert_eq!(rb.unwrap(), JoinOutcome::Success(2));

    a.dispose().await;
    assert_eq!(a.state(), SessionState::Disposed);
    assert_eq!(b.state(), SessionState::Connected);
    assert_eq!(b.current_channel().as_deref(), Some("room-b"));
    assert_ne!(a.session_id(), b.session_id());
}
