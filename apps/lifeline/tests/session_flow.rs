//! End-to-end signaling tests: a real relay router mounted on loopback,
//! with a host-role and a viewer-role `SignalingClient` talking through
//! it exactly as the UI shells would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lifeline::config::SupportConfig;
use lifeline::signaling::{SignalingClient, SignalingError};
use lifeline_proto::{Role, SignalPayload};
use lifeline_relay::store::{SessionStore, StoreConfig};

async fn spawn_relay() -> String {
    let store = Arc::new(SessionStore::new(StoreConfig::default()));
    let app = lifeline_relay::router(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("relay serve");
    });
    format!("http://{addr}")
}

fn client_config(relay_url: &str, poll_ms: u64) -> SupportConfig {
    SupportConfig {
        relay_url: relay_url.to_string(),
        poll_interval: Duration::from_millis(poll_ms),
        ..Default::default()
    }
}

#[test_timeout::tokio_timeout_test]
async fn host_offer_reaches_the_viewer_exactly_once() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 1000));
    let viewer = SignalingClient::new(&client_config(&relay, 1000));

    let grant = host.create_session().await.expect("create");
    assert_eq!(grant.role, Role::Host);
    let code = grant.code.expect("host gets the shareable code");
    assert_eq!(code.len(), 6);

    let joined = viewer.join_session(&code).await.expect("join");
    assert_eq!(joined.role, Role::Viewer);
    assert_eq!(joined.session_id, grant.session_id);

    host.send_signal(SignalPayload::Offer {
        sdp: "v=0 host-offer".to_string(),
    })
    .await
    .expect("offer relayed");

    let outcome = viewer.poll_signals().await.expect("poll");
    assert_eq!(outcome.signals.len(), 1);
    assert_eq!(outcome.signals[0].from, Role::Host);
    assert!(matches!(
        outcome.signals[0].payload,
        SignalPayload::Offer { ref sdp } if sdp == "v=0 host-offer"
    ));
    assert!(!outcome.remote_control_enabled);

    // The cursor advanced to the delivered timestamp, so polling again
    // returns nothing.
    assert_eq!(viewer.cursor(), outcome.signals[0].timestamp);
    let drained = viewer.poll_signals().await.expect("second poll");
    assert!(drained.signals.is_empty());

    // Signals never echo back to their sender.
    let host_outcome = host.poll_signals().await.expect("host poll");
    assert!(host_outcome.signals.is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn cursor_only_moves_forward_across_polls() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 1000));
    let viewer = SignalingClient::new(&client_config(&relay, 1000));

    let grant = host.create_session().await.unwrap();
    viewer.join_session(&grant.code.unwrap()).await.unwrap();

    host.send_signal(SignalPayload::Offer {
        sdp: "first".to_string(),
    })
    .await
    .unwrap();
    let first = viewer.poll_signals().await.unwrap();
    let cursor_after_first = viewer.cursor();
    assert_eq!(cursor_after_first, first.signals.last().unwrap().timestamp);

    // An empty poll leaves the cursor untouched.
    viewer.poll_signals().await.unwrap();
    assert_eq!(viewer.cursor(), cursor_after_first);

    tokio::time::sleep(Duration::from_millis(5)).await;
    host.send_signal(SignalPayload::IceCandidate {
        candidate: "candidate:1".to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    })
    .await
    .unwrap();

    let second = viewer.poll_signals().await.unwrap();
    assert_eq!(second.signals.len(), 1);
    assert_eq!(viewer.cursor(), second.signals[0].timestamp);
    assert!(viewer.cursor() > cursor_after_first);
}

#[test_timeout::tokio_timeout_test]
async fn polling_task_delivers_batches_and_flag_transitions() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 1000));
    let viewer = Arc::new(SignalingClient::new(&client_config(&relay, 25)));

    let grant = host.create_session().await.unwrap();
    viewer.join_session(&grant.code.unwrap()).await.unwrap();

    let (signal_tx, mut signal_rx) = tokio::sync::mpsc::unbounded_channel();
    let (flag_tx, mut flag_rx) = tokio::sync::mpsc::unbounded_channel();
    viewer.start_polling(
        move |signals| {
            let _ = signal_tx.send(signals);
        },
        Some(move |enabled: bool| {
            let _ = flag_tx.send(enabled);
        }),
    );
    assert!(viewer.is_polling());

    // The initial flag state is reported once polling observes it.
    let initial = tokio::time::timeout(Duration::from_secs(5), flag_rx.recv())
        .await
        .expect("flag report in time")
        .expect("flag channel open");
    assert!(!initial);

    host.send_signal(SignalPayload::Offer {
        sdp: "polled-offer".to_string(),
    })
    .await
    .unwrap();
    let batch = tokio::time::timeout(Duration::from_secs(5), signal_rx.recv())
        .await
        .expect("batch in time")
        .expect("signal channel open");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].from, Role::Host);

    host.enable_remote_control().await.unwrap();
    let flipped = tokio::time::timeout(Duration::from_secs(5), flag_rx.recv())
        .await
        .expect("flag transition in time")
        .expect("flag channel open");
    assert!(flipped);

    viewer.stop_polling();
    // Idempotent, including after the task is gone.
    viewer.stop_polling();
    assert!(!viewer.is_polling());
}

#[test_timeout::tokio_timeout_test]
async fn role_and_session_guards_fail_closed() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 1000));
    let viewer = SignalingClient::new(&client_config(&relay, 1000));

    // No session yet: every authenticated call fails closed locally.
    assert!(matches!(
        viewer
            .send_signal(SignalPayload::Offer { sdp: "x".into() })
            .await,
        Err(SignalingError::NoActiveSession)
    ));
    assert!(matches!(
        viewer.poll_signals().await,
        Err(SignalingError::NoActiveSession)
    ));

    let grant = host.create_session().await.unwrap();
    viewer.join_session(&grant.code.unwrap()).await.unwrap();

    // Remote-control toggles are host-only, checked before any I/O.
    assert!(matches!(
        viewer.enable_remote_control().await,
        Err(SignalingError::WrongRole { required: Role::Host })
    ));
    host.enable_remote_control().await.unwrap();
    host.disable_remote_control().await.unwrap();

    // A bogus code surfaces as a relay rejection, not a transport error.
    let stranger = SignalingClient::new(&client_config(&relay, 1000));
    assert!(matches!(
        stranger.join_session("000000").await,
        Err(SignalingError::Relay { .. })
    ));
}

#[test_timeout::tokio_timeout_test]
async fn end_session_clears_state_and_stops_polling() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 25));

    host.create_session().await.unwrap();
    host.start_polling(|_| {}, None::<fn(bool)>);
    assert!(host.is_polling());

    host.end_session().await.expect("end acknowledged");
    assert!(!host.is_polling());
    assert!(host.session_id().is_none());
    assert!(host.role().is_none());
    assert!(matches!(
        host.send_signal(SignalPayload::Offer { sdp: "x".into() })
            .await,
        Err(SignalingError::NoActiveSession)
    ));

    // Ending again without a session is a local no-op failure, and
    // cleanup stays safe to call repeatedly.
    assert!(matches!(
        host.end_session().await,
        Err(SignalingError::NoActiveSession)
    ));
    host.cleanup();
    host.cleanup();
}

#[test_timeout::tokio_timeout_test]
async fn stop_polling_is_safe_before_the_first_tick() {
    let relay = spawn_relay().await;
    let host = SignalingClient::new(&client_config(&relay, 60_000));

    // Never started: nothing to cancel.
    host.stop_polling();
    assert!(!host.is_polling());

    host.create_session().await.unwrap();
    host.start_polling(|_| {}, None::<fn(bool)>);
    // Cancel long before the first (60s) tick fires.
    host.stop_polling();
    assert!(!host.is_polling());
}
