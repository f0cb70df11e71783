//! Connection Lifecycle Tests
//!
//! The reconnect loop against a mock dialer: protocol handshake, heartbeat
//! enforcement, status translation and orderly shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use castkit::mock::{MockDialer, MockPeer};
use castkit::{
    CancelGuard, ConnectConfig, ConnectionState, Context, Event, Lifecycle, DEFAULT_RECEIVER_ID,
    DEFAULT_SENDER_ID, NAMESPACE_CONNECTION, NAMESPACE_HEARTBEAT, NAMESPACE_RECEIVER,
};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    lifecycle: Arc<Lifecycle>,
    peers: Receiver<MockPeer>,
    events: Receiver<Event>,
    guard: CancelGuard,
    runner: JoinHandle<()>,
}

fn start(config: ConnectConfig) -> Harness {
    let (dialer, peers) = MockDialer::new();
    let lifecycle = Arc::new(Lifecycle::new(Box::new(dialer), config));
    let events = lifecycle.events();
    let (ctx, guard) = Context::background().with_cancel();
    let addr: SocketAddr = "127.0.0.1:8009".parse().unwrap();

    let runner = std::thread::spawn({
        let lifecycle = Arc::clone(&lifecycle);
        move || lifecycle.run(&ctx, addr)
    });
    Harness {
        lifecycle,
        peers,
        events,
        guard,
        runner,
    }
}

impl Harness {
    fn stop(self) {
        self.guard.cancel();
        self.runner.join().unwrap();
    }

    /// Next event within the wait budget.
    fn event(&self) -> Event {
        self.events.recv_timeout(WAIT).expect("lifecycle event")
    }
}

fn quiet_heartbeat() -> ConnectConfig {
    ConnectConfig {
        heartbeat_interval: Duration::from_secs(60),
        heartbeat_timeout: Duration::from_secs(60),
        ..ConnectConfig::default()
    }
}

// ============================================================
// Handshake
// ============================================================

#[test]
fn test_connect_frame_precedes_the_connected_event() {
    let harness = start(quiet_heartbeat());

    let mut peer = harness.peers.recv_timeout(WAIT).expect("dial");
    let hello = peer.pull_frame(WAIT).expect("handshake frame");
    assert_eq!(hello.header.typ, "CONNECT");
    assert_eq!(hello.header.namespace, NAMESPACE_CONNECTION);
    assert_eq!(hello.header.source_id, DEFAULT_SENDER_ID);
    assert_eq!(hello.header.destination_id, DEFAULT_RECEIVER_ID);

    assert_eq!(harness.event(), Event::Connected);
    assert_eq!(harness.lifecycle.state(), ConnectionState::Connected);
    harness.stop();
}

#[test]
fn test_peer_close_triggers_disconnect_and_reconnect() {
    let harness = start(quiet_heartbeat());

    let peer = harness.peers.recv_timeout(WAIT).expect("first dial");
    assert_eq!(harness.event(), Event::Connected);

    peer.close();
    assert!(matches!(harness.event(), Event::Disconnected { .. }));

    // The loop dials again without being told to.
    let _second = harness.peers.recv_timeout(WAIT).expect("second dial");
    assert_eq!(harness.event(), Event::Connected);

    harness.stop();
}

#[test]
fn test_cancel_ends_the_loop_with_a_final_disconnect() {
    let harness = start(quiet_heartbeat());

    let _peer = harness.peers.recv_timeout(WAIT).expect("dial");
    assert_eq!(harness.event(), Event::Connected);

    harness.guard.cancel();
    let deadline = Instant::now() + WAIT;
    let mut disconnected = false;
    while Instant::now() < deadline {
        match harness.events.recv_timeout(WAIT) {
            Ok(Event::Disconnected { .. }) => {
                disconnected = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(disconnected);
    harness.runner.join().unwrap();
}

// ============================================================
// Heartbeat
// ============================================================

#[test]
fn test_missed_heartbeat_closes_the_connection() {
    let harness = start(ConnectConfig {
        heartbeat_interval: Duration::from_millis(30),
        heartbeat_timeout: Duration::from_millis(50),
        ..ConnectConfig::default()
    });

    let _peer = harness.peers.recv_timeout(WAIT).expect("dial");
    assert_eq!(harness.event(), Event::Connected);

    // No PONG ever comes back.
    match harness.event() {
        Event::Disconnected { reason } => assert_eq!(reason, "heartbeat timeout"),
        other => panic!("expected disconnect, got {other:?}"),
    }
    harness.stop();
}

#[test]
fn test_answered_pings_keep_the_connection_alive() {
    let harness = start(ConnectConfig {
        heartbeat_interval: Duration::from_millis(30),
        heartbeat_timeout: Duration::from_millis(200),
        ..ConnectConfig::default()
    });

    let mut peer = harness.peers.recv_timeout(WAIT).expect("dial");
    assert_eq!(harness.event(), Event::Connected);

    // Answer every PING for several heartbeat rounds.
    let window_end = Instant::now() + Duration::from_millis(300);
    while Instant::now() < window_end {
        if let Some(frame) = peer.pull_frame(Duration::from_millis(50)) {
            if frame.header.typ == "PING" {
                peer.push_frame(
                    r#"{"type":"PONG"}"#,
                    DEFAULT_RECEIVER_ID,
                    DEFAULT_SENDER_ID,
                    NAMESPACE_HEARTBEAT,
                )
                .unwrap();
            }
        }
    }

    assert!(harness.events.try_recv().is_err(), "no disconnect expected");
    harness.stop();
}

// ============================================================
// Status translation
// ============================================================

#[test]
fn test_receiver_status_broadcast_becomes_events() {
    let harness = start(quiet_heartbeat());

    let peer = harness.peers.recv_timeout(WAIT).expect("dial");
    assert_eq!(harness.event(), Event::Connected);

    peer.push_frame(
        concat!(
            r#"{"type":"RECEIVER_STATUS","status":{"#,
            r#""applications":[{"appId":"APP1","displayName":"Demo App"}],"#,
            r#""volume":{"level":0.5,"muted":false}}}"#
        ),
        DEFAULT_RECEIVER_ID,
        DEFAULT_SENDER_ID,
        NAMESPACE_RECEIVER,
    )
    .unwrap();

    assert_eq!(
        harness.event(),
        Event::AppStarted {
            app_id: "APP1".to_string(),
            display_name: "Demo App".to_string(),
        }
    );
    assert_eq!(
        harness.event(),
        Event::StatusUpdated {
            level: 0.5,
            muted: false,
        }
    );

    // The app going away on the next status is a stop event.
    peer.push_frame(
        r#"{"type":"RECEIVER_STATUS","status":{"applications":[],"volume":{"level":0.5,"muted":false}}}"#,
        DEFAULT_RECEIVER_ID,
        DEFAULT_SENDER_ID,
        NAMESPACE_RECEIVER,
    )
    .unwrap();
    assert_eq!(
        harness.event(),
        Event::AppStopped {
            app_id: "APP1".to_string(),
            display_name: "Demo App".to_string(),
        }
    );

    harness.stop();
}
