/// Client tests: connection lifecycle, dispatch, capture and moderation
/// against in-memory transport and backend fakes
mod common;

use common::*;
use cyberbull_core::events::ClientEvent;
use cyberbull_core::moderation::FailurePolicy;
use cyberbull_core::protocol::Sensitivity;
use cyberbull_core::session::{ConnectionState, SendOutcome, SkipReason};
use cyberbull_core::view::Origin;
use cyberbull_core::{ChatClient, ChatError, Config};
use std::sync::Arc;
use std::time::Duration;

async fn connected(local: &str, peer: &str) -> (ChatClient, Arc<MemoryConnector>, Arc<RecordingBackend>, RemoteEnd) {
    let connector = MemoryConnector::new();
    let backend = RecordingBackend::new();
    let mut client = client_with(connector.clone(), backend.clone(), FailurePolicy::Silent);
    client.connect(local, peer, Sensitivity::Medium).await.unwrap();
    settle(&mut client).await;
    let remote = connector.take_remote();
    (client, connector, backend, remote)
}

#[tokio::test]
async fn test_connect_shows_banner_and_submits_settings() {
    let connector = MemoryConnector::new();
    let backend = RecordingBackend::new();
    let mut client = client_with(connector.clone(), backend.clone(), FailurePolicy::Silent);

    client.connect("  alice ", "bob", Sensitivity::High).await.unwrap();
    settle(&mut client).await;

    assert_eq!(connector.opened(), vec!["alice".to_string()]);
    assert_eq!(client.session().state(), ConnectionState::Connected);
    assert_eq!(texts(&client), vec!["Connected. Start chatting..."]);
    assert_eq!(client.view().entries()[0].origin, Origin::System);
    assert_eq!(
        backend.calls(),
        vec![Call::Settings {
            username: "alice".to_string(),
            sensitivity: Sensitivity::High,
        }]
    );
}

#[tokio::test]
async fn test_blank_identity_never_opens_transport() {
    let connector = MemoryConnector::new();
    let backend = RecordingBackend::new();
    let mut client = client_with(connector.clone(), backend.clone(), FailurePolicy::Silent);

    for (local, peer) in [("", "bob"), ("alice", ""), ("   ", "  ")] {
        let err = client.connect(local, peer, Sensitivity::Medium).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }
    settle(&mut client).await;

    assert!(connector.opened().is_empty());
    assert!(backend.calls().is_empty());
    assert!(client.view().is_empty());
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_peer_message_is_tagged_peer() {
    let (mut client, _, _, remote) = connected("bob", "alice").await;

    remote.push(r#"{"type":"message","from":"alice","message":"hi"}"#);
    settle(&mut client).await;

    let last = client.view().last().unwrap();
    assert_eq!(last.text, "alice: hi");
    assert_eq!(last.origin, Origin::Peer);
}

#[tokio::test]
async fn test_echo_is_tagged_self() {
    let (mut client, _, _, remote) = connected("alice", "bob").await;

    remote.push(r#"{"type":"message","from":"alice","message":"hi"}"#);
    settle(&mut client).await;

    let last = client.view().last().unwrap();
    assert_eq!(last.text, "alice: hi");
    assert_eq!(last.origin, Origin::Local);
}

#[tokio::test]
async fn test_entries_follow_arrival_order() {
    let (mut client, _, backend, remote) = connected("bob", "alice").await;

    remote.push(r#"{"type":"message","from":"alice","message":"you idiot"}"#);
    remote.push(r#"{"type":"bot_info","message":"Abusive language detected from alice. Severity: warning."}"#);
    remote.push(r#"{"type":"typing","from":"alice"}"#);
    remote.push(r#"{"type":"bot","message":"Your message was not delivered."}"#);
    remote.push("not even json");
    settle(&mut client).await;

    assert_eq!(
        texts(&client),
        vec![
            "Connected. Start chatting...",
            "alice: you idiot",
            "INFO: Abusive language detected from alice. Severity: warning.",
            "BOT: Your message was not delivered.",
        ]
    );
    let origins: Vec<_> = client.view().entries().iter().map(|e| e.origin).collect();
    assert_eq!(
        origins,
        vec![Origin::System, Origin::Peer, Origin::System, Origin::Bot]
    );
    // Only the settings call; ignored frames have no side effects
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn test_capture_request_uploads_without_entry() {
    let (mut client, _, backend, remote) = connected("alice", "bob").await;
    let before = client.view().len();

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":"m1"}}"#);
    let event = wait_for(&mut client, |e| matches!(e, ClientEvent::CaptureSettled(_))).await;

    match event {
        ClientEvent::CaptureSettled(report) => {
            assert_eq!(report.message_id.as_str(), "m1");
            assert!(report.result.is_ok());
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.view().len(), before);
    assert!(backend
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Upload { message_id, .. } if message_id == "m1")));
}

#[tokio::test]
async fn test_capture_with_numeric_id_forwards_text_form() {
    let (mut client, _, backend, remote) = connected("alice", "bob").await;

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":17,"words":["stupid"],"victim":"bob"}}"#);
    wait_for(&mut client, |e| matches!(e, ClientEvent::CaptureSettled(_))).await;

    assert!(backend
        .calls()
        .contains(&Call::Upload { message_id: "17".to_string(), bytes: 8 + 1 }));
}

#[tokio::test]
async fn test_capture_failure_does_not_interrupt_session() {
    let connector = MemoryConnector::new();
    let backend = RecordingBackend::new();
    let mut client = ChatClient::with_parts(
        Config::default(),
        connector.clone(),
        backend.clone(),
        Arc::new(StubRasterizer { fail: true }),
    );
    client.connect("bob", "alice", Sensitivity::Low).await.unwrap();
    let remote = connector.take_remote();

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":"m2"}}"#);
    let event = wait_for(&mut client, |e| matches!(e, ClientEvent::CaptureSettled(_))).await;
    match event {
        ClientEvent::CaptureSettled(report) => {
            assert!(matches!(report.result, Err(ChatError::SideChannel(_))));
        }
        other => panic!("unexpected event {:?}", other),
    }

    remote.push(r#"{"type":"message","from":"alice","message":"still here"}"#);
    settle(&mut client).await;

    assert!(client.session().is_connected());
    assert_eq!(client.view().last().unwrap().text, "alice: still here");
    assert!(!backend.calls().iter().any(|c| matches!(c, Call::Upload { .. })));
}

#[tokio::test]
async fn test_upload_failure_is_reported_not_rendered() {
    let (mut client, _, backend, remote) = connected("alice", "bob").await;
    backend.fail_upload();
    let before = client.view().len();

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":"m3"}}"#);
    let event = wait_for(&mut client, |e| matches!(e, ClientEvent::CaptureSettled(_))).await;
    match event {
        ClientEvent::CaptureSettled(report) => {
            assert!(matches!(report.result, Err(ChatError::SideChannel(_))));
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(client.view().len(), before);
}

#[tokio::test]
async fn test_send_serializes_to_peer() {
    let (client, _, _, mut remote) = connected("alice", "bob").await;

    assert_eq!(client.send("hello"), SendOutcome::Sent);
    assert_eq!(
        remote.sent(),
        vec![serde_json::json!({"to": "bob", "message": "hello"})]
    );
}

#[tokio::test]
async fn test_empty_message_is_never_transmitted() {
    let (client, _, _, mut remote) = connected("alice", "bob").await;

    assert_eq!(client.send(""), SendOutcome::Skipped(SkipReason::EmptyMessage));
    assert!(remote.sent().is_empty());
}

#[tokio::test]
async fn test_send_before_connect_is_skipped() {
    let client = client_with(MemoryConnector::new(), RecordingBackend::new(), FailurePolicy::Silent);
    assert_eq!(client.send("hello"), SendOutcome::Skipped(SkipReason::NoPeer));
}

#[tokio::test]
async fn test_involuntary_close_is_terminal() {
    let (mut client, connector, _, remote) = connected("alice", "bob").await;

    drop(remote);
    settle(&mut client).await;

    assert_eq!(client.view().last().unwrap().text, "Disconnected");
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
    assert_eq!(client.send("anyone?"), SendOutcome::Dropped);
    // No reconnect attempt
    assert_eq!(connector.opened().len(), 1);
}

#[tokio::test]
async fn test_reconnect_closes_previous_link() {
    let (mut client, connector, _, mut first) = connected("alice", "bob").await;

    client.connect("alice", "carol", Sensitivity::Medium).await.unwrap();
    settle(&mut client).await;
    let mut second = connector.take_remote();

    // Old writer is gone, so the old relay end sees its channel close
    assert!(first.from_client.recv().await.is_none());
    // Frames on the old link no longer reach the client
    let _ = first.to_client.send(cyberbull_core::session::LinkFrame::Text(
        r#"{"type":"bot","message":"stale"}"#.to_string(),
    ));

    assert_eq!(client.send("hi carol"), SendOutcome::Sent);
    assert_eq!(
        second.sent(),
        vec![serde_json::json!({"to": "carol", "message": "hi carol"})]
    );
    settle(&mut client).await;
    assert!(!texts(&client).iter().any(|t| t.contains("stale")));
    assert_eq!(
        texts(&client),
        vec!["Connected. Start chatting...", "Connected. Start chatting..."]
    );
    assert_eq!(client.session().identity().unwrap().peer_user, "carol");
}

#[tokio::test]
async fn test_voluntary_disconnect_adds_no_entry() {
    let (mut client, _, _, _remote) = connected("alice", "bob").await;
    let before = client.view().len();

    client.disconnect().await;
    settle(&mut client).await;

    assert_eq!(client.view().len(), before);
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_block_confirms_after_settling() {
    let (mut client, _, backend, _remote) = connected("alice", "bob").await;

    assert!(client.block().is_some());
    settle(&mut client).await;

    assert_eq!(client.view().last().unwrap().text, "You blocked bob");
    assert_eq!(client.view().last().unwrap().origin, Origin::System);
    assert!(backend.calls().contains(&Call::Block {
        victim: "alice".to_string(),
        offender: "bob".to_string(),
    }));

    assert!(client.unblock().is_some());
    settle(&mut client).await;
    assert_eq!(client.view().last().unwrap().text, "You unblocked bob");
}

#[tokio::test]
async fn test_block_pair_scenarios() {
    let backend = RecordingBackend::new();
    let mut client = client_with(MemoryConnector::new(), backend.clone(), FailurePolicy::Silent);

    client.block_pair("alice", "bob").unwrap().await.unwrap();
    settle(&mut client).await;
    assert_eq!(texts(&client), vec!["You blocked bob"]);

    assert!(client.block_pair("", "bob").is_none());
    settle(&mut client).await;
    assert_eq!(client.view().len(), 1);
    assert_eq!(backend.calls().len(), 1);
}

#[tokio::test]
async fn test_block_without_session_is_noop() {
    let backend = RecordingBackend::new();
    let client = client_with(MemoryConnector::new(), backend.clone(), FailurePolicy::Silent);
    assert!(client.block().is_none());
    assert!(client.unblock().is_none());
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_failed_block_is_silent_by_default() {
    let (mut client, _, backend, _remote) = connected("alice", "bob").await;
    backend.fail_moderation();
    let before = client.view().len();

    client.block();
    settle(&mut client).await;

    assert_eq!(client.view().len(), before);
}

#[tokio::test]
async fn test_failed_block_can_be_surfaced() {
    let connector = MemoryConnector::new();
    let backend = RecordingBackend::new();
    backend.fail_moderation();
    let mut client = client_with(connector, backend, FailurePolicy::Surface);
    client.connect("alice", "bob", Sensitivity::Medium).await.unwrap();

    client.block();
    settle(&mut client).await;

    let last = client.view().last().unwrap();
    assert!(last.text.starts_with("Could not block bob"), "{}", last.text);
    assert_eq!(last.origin, Origin::System);
}

// ─── Background connect ──────────────────────────────────────────────────────

fn gated_client(connector: Arc<GatedConnector>) -> ChatClient {
    ChatClient::with_parts(
        Config::default(),
        connector,
        RecordingBackend::new(),
        Arc::new(StubRasterizer { fail: false }),
    )
}

#[tokio::test]
async fn test_start_connect_keeps_loop_running_while_opening() {
    let connector = GatedConnector::new();
    let mut client = gated_client(connector.clone());

    client.start_connect("alice", "bob", Sensitivity::Medium).unwrap();
    assert_eq!(client.session().state(), ConnectionState::Connecting);
    assert_eq!(client.send("too early"), SendOutcome::Dropped);

    // Other events are still applied while the open is held back
    client.block_pair("carol", "dave");
    settle(&mut client).await;
    assert_eq!(texts(&client), vec!["You blocked dave"]);
    assert_eq!(client.session().state(), ConnectionState::Connecting);

    connector.release(1);
    settle(&mut client).await;
    assert_eq!(client.session().state(), ConnectionState::Connected);
    assert_eq!(
        texts(&client),
        vec!["You blocked dave", "Connected. Start chatting..."]
    );

    let mut remote = connector.inner.take_remote();
    assert_eq!(client.send("hi"), SendOutcome::Sent);
    assert_eq!(remote.sent(), vec![serde_json::json!({"to": "bob", "message": "hi"})]);
}

#[tokio::test]
async fn test_start_connect_validates_synchronously() {
    let connector = GatedConnector::new();
    let mut client = gated_client(connector.clone());

    let err = client.start_connect(" ", "bob", Sensitivity::Medium).unwrap_err();
    assert!(err.is_validation());
    connector.release(1);
    settle(&mut client).await;

    assert!(connector.inner.opened().is_empty());
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_open() {
    let connector = GatedConnector::new();
    let mut client = gated_client(connector.clone());

    client.start_connect("alice", "bob", Sensitivity::Medium).unwrap();
    client.disconnect().await;
    connector.release(1);
    settle(&mut client).await;

    assert_eq!(client.session().state(), ConnectionState::Disconnected);
    assert!(client.view().is_empty());
    assert_eq!(client.send("hi"), SendOutcome::Dropped);
}

#[tokio::test]
async fn test_newer_start_connect_supersedes_pending_one() {
    let connector = GatedConnector::new();
    let mut client = gated_client(connector.clone());

    client.start_connect("alice", "bob", Sensitivity::Medium).unwrap();
    client.start_connect("alice", "carol", Sensitivity::Medium).unwrap();
    connector.release(2);
    settle(&mut client).await;

    assert_eq!(connector.inner.opened().len(), 2);
    assert_eq!(texts(&client), vec!["Connected. Start chatting..."]);
    assert_eq!(client.session().identity().unwrap().peer_user, "carol");
    assert!(client.session().is_connected());
}

#[tokio::test]
async fn test_failed_background_open_shows_disconnected() {
    let connector = GatedConnector::refusing();
    let mut client = gated_client(connector.clone());

    client.start_connect("alice", "bob", Sensitivity::Medium).unwrap();
    connector.release(1);
    settle(&mut client).await;

    assert_eq!(texts(&client), vec!["Disconnected"]);
    assert_eq!(client.session().state(), ConnectionState::Disconnected);
}

// ─── Draining side channels ──────────────────────────────────────────────────

#[tokio::test]
async fn test_drain_waits_for_pending_upload() {
    let (mut client, _, backend, remote) = connected("alice", "bob").await;
    backend.slow_upload(Duration::from_millis(300));

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":"m5"}}"#);
    // Relay hangs up right after asking for evidence
    drop(remote);
    client.step().await;
    assert!(!backend.calls().iter().any(|c| matches!(c, Call::Upload { .. })));

    let unfinished = client.drain_side_channels(Duration::from_secs(5)).await;

    assert_eq!(unfinished, 0);
    assert!(backend
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Upload { message_id, .. } if message_id == "m5")));
    assert_eq!(client.view().last().unwrap().text, "Disconnected");
}

#[tokio::test]
async fn test_drain_gives_up_after_limit() {
    let (mut client, _, backend, remote) = connected("alice", "bob").await;
    backend.slow_upload(Duration::from_secs(2));

    remote.push(r#"{"type":"capture_screenshot","context":{"message_id":"m6"}}"#);
    client.step().await;

    let unfinished = client.drain_side_channels(Duration::from_millis(50)).await;
    assert_eq!(unfinished, 1);
}
