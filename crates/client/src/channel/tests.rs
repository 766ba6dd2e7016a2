use std::time::Duration;

use chatwire_shared::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use serde_json::json;
use url::Url;

use super::*;
use crate::transport::mock::{MockConnector, MockHandle, MockOutcome};

fn config() -> ChannelConfig {
    ChannelConfig::new(Url::parse("http://localhost:8000").unwrap())
}

fn channel_with(config: ChannelConfig) -> (RealtimeChannel, MockHandle) {
    let (connector, handle) = MockConnector::new();
    let channel =
        RealtimeChannel::with_connector(config, connector, Arc::new(HandlerRegistry::new()));
    (channel, handle)
}

async fn wait_for(channel: &RealtimeChannel, state: ConnectionState) {
    let mut rx = channel.watch_state();
    rx.wait_for(|current| *current == state).await.unwrap();
}

fn offsets_ms(start: Instant, times: &[Instant]) -> Vec<u64> {
    times
        .iter()
        .map(|at| (*at - start).as_millis() as u64)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_queued_messages_flush_in_order_on_connect() {
    let (channel, mut mock) = channel_with(config());

    for content in ["one", "two", "three"] {
        assert_eq!(channel.send_message(content), SendStatus::Queued);
    }
    assert_eq!(channel.queued_len(), 3);

    channel.connect("42");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    assert_eq!(server.url.as_str(), "ws://localhost:8000/ws/chat/42/");
    let contents: Vec<String> = server
        .drain_json()
        .iter()
        .map(|frame| frame["content"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
    assert_eq!(channel.queued_len(), 0);

    assert_eq!(channel.send_message("four"), SendStatus::Sent);
    assert_eq!(server.drain_json()[0]["content"], "four");
}

#[tokio::test(start_paused = true)]
async fn test_sends_during_handshake_flush_in_order() {
    let (channel, mut mock) = channel_with(config());
    mock.script(&[MockOutcome::Delay(Duration::from_millis(500))]);

    channel.connect("42");
    wait_for(&channel, ConnectionState::Connecting).await;
    for content in ["one", "two", "three"] {
        assert_eq!(channel.send_message(content), SendStatus::Queued);
    }

    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    let frames = server.drain_json();
    assert_eq!(frames.len(), 3);
    let contents: Vec<&str> = frames
        .iter()
        .map(|frame| frame["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);
    assert_eq!(channel.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_into_dead_transport_does_not_report_connected() {
    let (channel, _mock) = channel_with(config());
    channel.send_message("pending");

    let (link, receiver) = mpsc::unbounded_channel();
    drop(receiver);

    assert_eq!(channel.shared.attach(link), None);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.queued_len(), 1);
    assert_eq!(channel.send_message("later"), SendStatus::Queued);
}

#[tokio::test(start_paused = true)]
async fn test_send_while_open_writes_exactly_one_frame() {
    let (channel, mut mock) = channel_with(config());
    channel.connect(42u64);
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    assert_eq!(channel.send_message("hi"), SendStatus::Sent);

    let frames = server.drain_json();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "message");
    assert_eq!(frames[0]["content"], "hi");
    assert!(frames[0]["timestamp"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn test_convenience_senders() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("3");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.reply("sure", "17");
    channel.add_reaction("17", "👍");
    channel.remove_reaction("17", "👍");

    let frames = server.drain_json();
    assert_eq!(frames[0]["reply_to"], "17");
    assert_eq!(frames[1]["type"], "add_reaction");
    assert_eq!(frames[1]["emoji"], "👍");
    assert_eq!(frames[2]["type"], "remove_reaction");
    assert_eq!(frames[2]["message_id"], "17");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_then_failed() {
    let (channel, mock) = channel_with(config());
    mock.script(&[MockOutcome::Refuse; 6]);

    let start = Instant::now();
    channel.connect("42");
    wait_for(&channel, ConnectionState::Failed).await;

    assert_eq!(
        offsets_ms(start, &mock.attempt_times()),
        vec![0, 1000, 3000, 7000, 15000, 31000]
    );
    assert_eq!(channel.reconnect_attempts(), 5);

    // Failed is terminal until an explicit connect
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(mock.attempt_times().len(), 6);
    assert_eq!(channel.state(), ConnectionState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_leaves_failed() {
    let mut cfg = config();
    cfg.max_attempts = 1;
    let (channel, mut mock) = channel_with(cfg);
    mock.script(&[MockOutcome::Refuse, MockOutcome::Refuse]);

    channel.connect("9");
    wait_for(&channel, ConnectionState::Failed).await;
    assert_eq!(mock.attempt_times().len(), 2);

    channel.connect("9");
    let _server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;
    assert_eq!(channel.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_successful_open_resets_attempt_counter() {
    let (channel, mut mock) = channel_with(config());
    mock.script(&[MockOutcome::Refuse, MockOutcome::Refuse]);

    let start = Instant::now();
    channel.connect("7");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;
    assert_eq!(channel.reconnect_attempts(), 0);

    server.close(CLOSE_ABNORMAL);
    wait_for(&channel, ConnectionState::Reconnecting).await;
    assert_eq!(channel.reconnect_attempts(), 1);

    let _server = mock.accept().await;
    assert_eq!(
        offsets_ms(start, &mock.attempt_times()),
        vec![0, 1000, 3000, 4000]
    );
}

#[tokio::test(start_paused = true)]
async fn test_normal_close_does_not_reconnect() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("5");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    server.close(CLOSE_NORMAL);
    wait_for(&channel, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.attempt_times().len(), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_lost_transport_task_reconnects() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("5");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    drop(server);
    let _server = mock.accept().await;
    assert_eq!(mock.attempt_times().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_bad_channel_id_takes_reconnect_path() {
    let (channel, mock) = channel_with(config());
    channel.connect("");

    wait_for(&channel, ConnectionState::Reconnecting).await;
    assert_eq!(channel.reconnect_attempts(), 1);
    assert!(mock.attempt_times().is_empty());

    wait_for(&channel, ConnectionState::Failed).await;
    assert!(mock.attempt_times().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_open_channel_is_noop() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.connect("1");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(mock.attempt_times().len(), 1);
    assert!(server.drain().is_empty());
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_switching_channels_closes_previous_normally() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut first = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.connect("2");
    let second = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    assert_eq!(
        first.drain(),
        vec![WireFrame::Close {
            code: CLOSE_NORMAL,
            reason: "client closing".to_string()
        }]
    );
    assert!(second.url.as_str().ends_with("/ws/chat/2/"));
    assert_eq!(channel.channel_id(), Some(ChannelId::from("2")));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_while_connected_and_none_after_disconnect() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(server.drain_types(), vec!["heartbeat"]);

    channel.disconnect().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(
        server.drain(),
        vec![WireFrame::Close {
            code: CLOSE_NORMAL,
            reason: "client closing".to_string()
        }]
    );
    assert_eq!(mock.attempt_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_heartbeat_interval_keeps_channel_alive() {
    let mut cfg = config();
    cfg.heartbeat_interval = Duration::ZERO;
    let (channel, mut mock) = channel_with(cfg);

    channel.connect("1");
    let mut first = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(first.drain().is_empty());

    channel.connect("2");
    let second = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    assert_eq!(second.url.as_str(), "ws://localhost:8000/ws/chat/2/");
    assert_eq!(channel.reconnect_attempts(), 0);
    assert_eq!(
        first.drain(),
        vec![WireFrame::Close {
            code: CLOSE_NORMAL,
            reason: "client closing".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_never_queued() {
    let (channel, mock) = channel_with(config());
    mock.script(&[MockOutcome::Hang]);
    channel.connect("1");

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(channel.state(), ConnectionState::Connecting);
    assert_eq!(channel.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_reconnect_timer() {
    let (channel, mock) = channel_with(config());
    mock.script(&[MockOutcome::Refuse]);

    channel.connect("1");
    wait_for(&channel, ConnectionState::Reconnecting).await;

    channel.disconnect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(mock.attempt_times().len(), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting() {
    let (channel, mock) = channel_with(config());
    mock.script(&[MockOutcome::Hang]);

    channel.connect("1");
    wait_for(&channel, ConnectionState::Connecting).await;
    channel.disconnect().await;

    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_queue_policy_on_disconnect() {
    let (channel, _mock) = channel_with(config());
    channel.send_message("kept");
    channel.disconnect().await;
    assert_eq!(channel.queued_len(), 1);

    let mut cfg = config();
    cfg.queue_policy = QueuePolicy::Clear;
    let (channel, _mock) = channel_with(cfg);
    channel.send_message("dropped");
    channel.disconnect().await;
    assert_eq!(channel.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_start_typing_emits_once_then_stops_on_idle() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.start_typing();
    channel.start_typing();
    tokio::time::sleep(Duration::from_millis(1000)).await;
    channel.start_typing();
    assert_eq!(server.drain_types(), vec!["typing_start"]);

    // Deadline was pushed to 4s by the last call
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(server.drain_types().is_empty());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(server.drain_types(), vec!["typing_stop"]);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_stop_typing() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.stop_typing();
    channel.start_typing();
    channel.stop_typing();
    channel.stop_typing();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.drain_types(), vec!["typing_start", "typing_stop"]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_resets_typing_silently() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    channel.start_typing();
    channel.disconnect().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(server.drain_types(), vec!["typing_start"]);
    assert_eq!(channel.queued_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_and_malformed_frames_are_not_dispatched() {
    let (channel, mut mock) = channel_with(config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [EventKind::Message, EventKind::Notification, EventKind::Error] {
        let tx = tx.clone();
        channel.on(kind, move |event| {
            tx.send(event.discriminator.clone()).unwrap();
            Ok(())
        });
    }

    channel.connect("1");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    server.push(r#"{"type":"mystery","content":"?"}"#);
    server.push("not json");
    server.push(r#"{"type":"chat_message","message":{"content":"hello"}}"#);

    assert_eq!(rx.recv().await.unwrap(), "chat_message");
    assert!(rx.try_recv().is_err());
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failing_handler_does_not_block_others() {
    let (channel, mut mock) = channel_with(config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    channel.on(EventKind::Message, |_| Err("handler failed".into()));
    channel.on(EventKind::Message, |_| panic!("handler panicked"));
    channel.on(EventKind::Message, move |event| {
        tx.send(event.chat_message().unwrap().content).unwrap();
        Ok(())
    });

    channel.connect("1");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    server.push(json!({"type": "message", "content": "first"}).to_string());
    server.push(json!({"type": "message", "content": "second"}).to_string());

    assert_eq!(rx.recv().await.unwrap(), "first");
    assert_eq!(rx.recv().await.unwrap(), "second");
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_off_stops_delivery() {
    let (channel, mut mock) = channel_with(config());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let removed_tx = tx.clone();
    let removed = channel.on(EventKind::Notification, move |_| {
        removed_tx.send("removed").unwrap();
        Ok(())
    });
    channel.on(EventKind::Notification, move |_| {
        tx.send("kept").unwrap();
        Ok(())
    });
    assert!(channel.off(EventKind::Notification, removed));

    channel.connect("1");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;
    server.push(r#"{"type":"notification","title":"New"}"#);

    assert_eq!(rx.recv().await.unwrap(), "kept");
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_inbound_heartbeat_is_dispatched_and_harmless() {
    let (channel, mut mock) = channel_with(config());
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.on(EventKind::Heartbeat, move |_| {
        tx.send(()).unwrap();
        Ok(())
    });

    channel.connect("1");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    server.push(r#"{"type":"heartbeat","timestamp":1}"#);
    rx.recv().await.unwrap();
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_tracked_and_expires() {
    let mut cfg = config();
    cfg.user_id = Some("me".to_string());
    let (channel, mut mock) = channel_with(cfg);
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.on(EventKind::Typing, move |_| {
        tx.send(()).unwrap();
        Ok(())
    });

    channel.connect("1");
    let server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    server.push(r#"{"type":"typing_start","user":{"id":"me"}}"#);
    server.push(r#"{"type":"typing_start","user":{"id":5,"full_name":"Bea"}}"#);
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();

    let users = channel.typing_users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_id, "5");
    assert_eq!(users[0].user_name.as_deref(), Some("Bea"));

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(channel.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_closes_connection() {
    let (channel, mut mock) = channel_with(config());
    channel.connect("1");
    let mut server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    drop(channel);

    assert_eq!(
        server.received.recv().await,
        Some(WireFrame::Close {
            code: CLOSE_NORMAL,
            reason: "client closing".to_string()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_count_outlives_state_changes() {
    let mut cfg = config();
    cfg.max_attempts = 0;
    let (channel, mut mock) = channel_with(cfg);
    mock.script(&[MockOutcome::Refuse]);
    let mut failures = channel.watch_failures();

    channel.connect("1");
    wait_for(&channel, ConnectionState::Failed).await;
    channel.connect("1");
    let _server = mock.accept().await;
    wait_for(&channel, ConnectionState::Connected).await;

    assert!(failures.has_changed().unwrap());
    assert_eq!(*failures.borrow_and_update(), 1);
}
