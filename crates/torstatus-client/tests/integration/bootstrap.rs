//! Bootstrap polling tests -- change detection, malformed replies, disconnects.

use std::collections::VecDeque;
use std::time::Duration;

use torstatus_client::{ClientEvent, ConnectionState, ControlClient, PollErrorPolicy};

use crate::harness::{
    bootstrap, is_state, states, wait_event, wait_state, Action, FakeDaemon, Script,
};

const GARBAGE: &str = "250-status/bootstrap-phase=NOTICE BOOTSTRAP\r\n250 OK\r\n";

#[tokio::test]
async fn test_repeated_percent_is_not_announced() {
    let script = Script {
        bootstrap: VecDeque::from([
            bootstrap(25, "Loading networkstatus consensus"),
            bootstrap(25, "Loading networkstatus consensus"),
            bootstrap(60, "Loading relay descriptors"),
            bootstrap(100, "Done"),
        ]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let client = ControlClient::spawn(daemon.client_config());
    let mut events = client.subscribe();

    client.open().await.unwrap();
    let seen = wait_event(&mut events, Duration::from_secs(5), |e| {
        is_state(e, ConnectionState::Bootstrapped)
    })
    .await
    .unwrap();

    assert_eq!(
        states(&seen),
        vec![
            ConnectionState::Ready,
            ConnectionState::Bootstrapping,
            ConnectionState::Bootstrapping,
            ConnectionState::Bootstrapped,
        ]
    );
    match &seen[1] {
        ClientEvent::ConnectionStateChanged { reason, .. } => {
            assert_eq!(reason.as_deref(), Some("Loading networkstatus consensus"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // 100% keeps repeating; nothing more is announced.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(events.try_recv().is_err());

    let snap = client.snapshot().await.unwrap();
    assert_eq!(snap.bootstrap.unwrap().percent, 100);

    client.destroy().await;
    daemon.shutdown();
}

#[tokio::test]
async fn test_malformed_reply_reported_connection_kept() {
    let script = Script {
        bootstrap: VecDeque::from([Action::Reply(GARBAGE.into()), bootstrap(100, "Done")]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let client = ControlClient::spawn(daemon.client_config());
    let mut events = client.subscribe();

    client.open().await.unwrap();
    let seen = wait_event(&mut events, Duration::from_secs(5), |e| {
        is_state(e, ConnectionState::Bootstrapped)
    })
    .await
    .unwrap();

    assert!(is_state(&seen[0], ConnectionState::Ready));
    match &seen[1] {
        ClientEvent::ProtocolError { message, status } => {
            assert!(message.contains("could not parse bootstrap status"));
            assert_eq!(*status, Some(250));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(is_state(&seen[2], ConnectionState::Bootstrapped));
    assert_eq!(daemon.connection_count(), 1);

    client.destroy().await;
    daemon.shutdown();
}

#[tokio::test]
async fn test_mixed_status_reply_keeps_later_polls_in_step() {
    let mixed = "250-status/bootstrap-phase=NOTICE BOOTSTRAP PROGRESS=40 SUMMARY=\"x\"\r\n\
                 551-Internal error\r\n551 Try again\r\n";
    let script = Script {
        bootstrap: VecDeque::from([Action::Reply(mixed.into()), bootstrap(100, "Done")]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let mut config = daemon.client_config();
    config.strict_status_codes = true;
    let client = ControlClient::spawn(config);
    let mut events = client.subscribe();

    client.open().await.unwrap();
    let seen = wait_event(&mut events, Duration::from_secs(5), |e| {
        is_state(e, ConnectionState::Bootstrapped)
    })
    .await
    .unwrap();

    assert_eq!(seen.len(), 3, "saw {seen:?}");
    assert!(is_state(&seen[0], ConnectionState::Ready));
    assert!(matches!(
        &seen[1],
        ClientEvent::ProtocolError { status: Some(551), .. }
    ));
    assert_eq!(daemon.connection_count(), 1);

    // Later polls keep answering 100% with no further errors.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(events.try_recv().is_err());

    client.destroy().await;
    daemon.shutdown();
}

#[tokio::test]
async fn test_malformed_reply_disconnect_policy() {
    let script = Script {
        bootstrap: VecDeque::from([Action::Reply(GARBAGE.into()), bootstrap(100, "Done")]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let mut config = daemon.client_config();
    config.auto_retry = false;
    config.poll_error_policy = PollErrorPolicy::Disconnect;
    let client = ControlClient::spawn(config);

    client.open().await.unwrap();

    let snap = client.snapshot().await.unwrap();
    assert_eq!(snap.state, ConnectionState::Closed);
    assert!(snap
        .reason
        .unwrap_or_default()
        .contains("could not parse bootstrap status"));
    assert!(!snap.poll_active);
    assert!(!snap.retry_active);

    client.destroy().await;
    daemon.shutdown();
}

#[tokio::test]
async fn test_hangup_during_poll_closes_then_reconnects() {
    let script = Script {
        bootstrap: VecDeque::from([
            bootstrap(100, "Done"),
            Action::Hangup,
            bootstrap(100, "Done"),
        ]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let client = ControlClient::spawn(daemon.client_config());
    let mut events = client.subscribe();

    client.open().await.unwrap();
    let seen = wait_event(&mut events, Duration::from_secs(5), |e| {
        is_state(e, ConnectionState::Closed)
    })
    .await
    .unwrap();

    // Straight from Bootstrapped to Closed, no protocol error on the way.
    assert_eq!(
        states(&seen),
        vec![
            ConnectionState::Ready,
            ConnectionState::Bootstrapped,
            ConnectionState::Closed,
        ]
    );
    assert!(!seen
        .iter()
        .any(|e| matches!(e, ClientEvent::ProtocolError { .. })));

    // Auto-retry brings it back.
    let seen = wait_event(&mut events, Duration::from_secs(5), |e| {
        is_state(e, ConnectionState::Bootstrapped)
    })
    .await
    .unwrap();
    assert_eq!(
        states(&seen),
        vec![ConnectionState::Ready, ConnectionState::Bootstrapped]
    );
    assert_eq!(daemon.connection_count(), 2);

    let snap = client.snapshot().await.unwrap();
    assert!(!snap.retry_active);
    assert!(snap.poll_active);

    client.destroy().await;
    daemon.shutdown();
}

#[tokio::test]
async fn test_hangup_without_auto_retry_stays_closed() {
    let script = Script {
        bootstrap: VecDeque::from([bootstrap(40, "Loading"), Action::Hangup]),
        ..Default::default()
    };
    let daemon = FakeDaemon::start(script).await.unwrap();
    let mut config = daemon.client_config();
    config.auto_retry = false;
    let client = ControlClient::spawn(config);

    client.open().await.unwrap();
    wait_state(&client, ConnectionState::Closed, Duration::from_secs(5))
        .await
        .unwrap();

    let snap = client.snapshot().await.unwrap();
    assert!(!snap.retry_active);
    assert!(!snap.poll_active);
    assert!(snap.bootstrap.is_none());
    assert!(snap.protocol_info.is_none());

    client.destroy().await;
    daemon.shutdown();
}
