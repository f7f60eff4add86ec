//! End-to-end scenarios driving the Forwarder/Router/Store stack with a
//! mock [`PeerSender`] standing in for the network, in place of the real
//! `ConnectionManager` transports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bridge::config::{BridgeRoute, RouteMode};
use bridge::conn::{PeerSender, RouterEvent};
use bridge::error::{BridgeError, ErrorEvent};
use bridge::forwarder::Forwarder;
use bridge::retry_queue::RetryQueueHandle;
use bridge::router::EventRouter;
use bridge::translator::TranslateContext;
use bridge_protocol::{ConversationKind, EventVariant, MessageEvent, NoticeEvent, NoticeKind, Platform, Segment};
use bridge_store::Store;
use tokio::sync::{mpsc, Mutex};

/// A [`PeerSender`] that records every call instead of touching the
/// network, optionally failing the first N send attempts before succeeding.
struct MockPeer {
    platform: Platform,
    sent: Mutex<Vec<(String, Option<i64>, Vec<Segment>)>>,
    deleted: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
    fail_sends_remaining: Mutex<u32>,
}

impl MockPeer {
    fn new(platform: Platform) -> Arc<Self> {
        Arc::new(MockPeer { platform, sent: Mutex::new(Vec::new()), deleted: Mutex::new(Vec::new()), next_id: AtomicU64::new(1), fail_sends_remaining: Mutex::new(0) })
    }

    fn failing(platform: Platform, failures: u32) -> Arc<Self> {
        Arc::new(MockPeer { platform, sent: Mutex::new(Vec::new()), deleted: Mutex::new(Vec::new()), next_id: AtomicU64::new(1), fail_sends_remaining: Mutex::new(failures) })
    }
}

#[async_trait]
impl PeerSender for MockPeer {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn send_message(&self, conversation_id: &str, topic_id: Option<i64>, segments: &[Segment]) -> Result<String, BridgeError> {
        {
            let mut remaining = self.fail_sends_remaining.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BridgeError::Disconnected { platform: self.platform });
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().await.push((conversation_id.to_string(), topic_id, segments.to_vec()));
        Ok(id.to_string())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), BridgeError> {
        self.deleted.lock().await.push((conversation_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn fetch_file_url(&self, _file_id: &str) -> Result<Option<String>, BridgeError> {
        Ok(None)
    }
}

fn route() -> BridgeRoute {
    BridgeRoute { a_conversation: "g1".into(), b_conversation: -100, b_topic: None, mode: RouteMode::Group, show_sender_a_to_b: true, show_sender_b_to_a: true }
}

fn translate_ctx(store: &Arc<Store>, source: Platform, target: Platform) -> TranslateContext {
    let media = Arc::new(bridge_media::MediaEngine::new(None).unwrap());
    TranslateContext { source_platform: source, target_platform: target, store: store.clone(), media, enable_miniapp_parsing: true, mention_refresh_interval_secs: 300, source_peer: None }
}

fn message_event(platform: Platform, conversation_id: &str, user_id: &str, message_id: &str, text: &str) -> MessageEvent {
    edited_message_event(platform, conversation_id, user_id, message_id, text, false)
}

fn edited_message_event(platform: Platform, conversation_id: &str, user_id: &str, message_id: &str, text: &str, is_edit: bool) -> MessageEvent {
    MessageEvent {
        platform,
        conversation_id: conversation_id.into(),
        user_id: user_id.into(),
        message_id: message_id.into(),
        segments: vec![Segment::text(text)],
        raw_text: text.into(),
        sender_display_name: None,
        reply_to_message_id: None,
        topic_id: None,
        timestamp: 1_700_000_000,
        conversation_kind: ConversationKind::Group,
        is_edit,
    }
}

fn error_channel() -> (mpsc::Sender<ErrorEvent>, mpsc::Receiver<ErrorEvent>) {
    mpsc::channel(16)
}

/// S1: a plain text message on side A is forwarded to side B and the
/// mapping is recorded so a later recall can find it.
#[tokio::test]
async fn text_message_forwards_a_to_b_with_sender_header() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let peer_b = MockPeer::new(Platform::B);
    let (error_tx, _error_rx) = error_channel();
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), HashMap::new(), 3600);

    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry, 5, error_tx);

    let event = RouterEvent { platform: Platform::A, event: EventVariant::Message(message_event(Platform::A, "g1", "1001", "42", "hello from A")) };
    forwarder.handle_event(&event).await;

    let sent = peer_b.sent.lock().await;
    assert_eq!(sent.len(), 1);
    let (conversation_id, _topic, segments) = &sent[0];
    assert_eq!(conversation_id, "-100");
    assert_eq!(segments[0].get("text").unwrap(), "[1001]\t");
    assert_eq!(segments[1].get("text").unwrap(), "hello from A");

    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), Some("1".to_string()));
}

/// S2: a reply on platform B resolves back through the mapping store to
/// find the platform A message it targets, independent of which side
/// originated the mapping.
#[tokio::test]
async fn reply_resolves_through_existing_mapping_in_translator() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .add_mapping(&bridge_store::MessageMapping { source_platform: Platform::A, source_message_id: "42".into(), target_platform: Platform::B, target_message_id: "7".into(), created_at: 0 })
        .unwrap();

    let ctx = translate_ctx(&store, Platform::B, Platform::A);
    let segments = vec![Segment::new(bridge_protocol::segment::kind::REPLY).with("id", "7"), Segment::text("reply text")];
    let translated = bridge::translator::translate(&ctx, &segments).await;

    let reply_seg = translated.iter().find(|s| s.is(bridge_protocol::segment::kind::REPLY)).unwrap();
    assert_eq!(reply_seg.get("id"), Some("42"));
}

/// S3: a recall notice for an already-forwarded message deletes it on the
/// peer and drops the mapping so a later id reuse can't collide.
#[tokio::test]
async fn recall_notice_deletes_peer_message_and_mapping() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    store
        .add_mapping(&bridge_store::MessageMapping { source_platform: Platform::A, source_message_id: "42".into(), target_platform: Platform::B, target_message_id: "7".into(), created_at: 0 })
        .unwrap();

    let peer_b = MockPeer::new(Platform::B);
    let (error_tx, _error_rx) = error_channel();
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), HashMap::new(), 3600);
    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry, 5, error_tx);

    let notice = NoticeEvent { platform: Platform::A, notice_kind: NoticeKind::Recall, conversation_id: Some("g1".into()), user_id: Some("1001".into()), affected_message_id: Some("42".into()), timestamp: 0, raw: serde_json::json!({}) };
    forwarder.handle_event(&RouterEvent { platform: Platform::A, event: EventVariant::Notice(notice) }).await;

    let deleted = peer_b.deleted.lock().await;
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0], ("-100".to_string(), "7".to_string()));
    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), None);
}

/// S4: a send that fails is enqueued for retry rather than dropped, and a
/// retry tick that succeeds records the mapping exactly as a direct send
/// would have.
#[tokio::test]
async fn failed_send_is_retried_and_eventually_succeeds() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let peer_b = MockPeer::failing(Platform::B, 1);
    let (error_tx, mut error_rx) = error_channel();
    let mut send_peers: HashMap<Platform, Arc<dyn PeerSender>> = HashMap::new();
    send_peers.insert(Platform::B, peer_b.clone());
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), send_peers, 3600);

    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry.clone(), 5, error_tx);

    let event = RouterEvent { platform: Platform::A, event: EventVariant::Message(message_event(Platform::A, "g1", "1001", "42", "retry me")) };
    forwarder.handle_event(&event).await;

    assert!(peer_b.sent.lock().await.is_empty());
    assert!(error_rx.recv().await.is_some());
    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), None);

    let due = store.due_send_retries(i64::MAX, 10).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].attempt_count, 1);

    retry.process_send_retries_for_test().await;

    assert_eq!(peer_b.sent.lock().await.len(), 1);
    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), Some("1".to_string()));
    assert!(store.due_send_retries(i64::MAX, 10).unwrap().is_empty());
}

/// An edited message deletes the previously-forwarded peer copy, resends
/// the new content, and rewrites the mapping to the new peer id rather
/// than being dropped as a duplicate (spec.md §4.8).
#[tokio::test]
async fn edited_message_deletes_and_resends_rewriting_the_mapping() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let peer_b = MockPeer::new(Platform::B);
    let (error_tx, _error_rx) = error_channel();
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), HashMap::new(), 3600);
    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry, 5, error_tx);

    let original = RouterEvent { platform: Platform::A, event: EventVariant::Message(message_event(Platform::A, "g1", "1001", "42", "hello from A")) };
    forwarder.handle_event(&original).await;
    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), Some("1".to_string()));

    let edit = RouterEvent { platform: Platform::A, event: EventVariant::Message(edited_message_event(Platform::A, "g1", "1001", "42", "hello from A, corrected", true)) };
    forwarder.handle_event(&edit).await;

    let deleted = peer_b.deleted.lock().await;
    assert_eq!(deleted.as_slice(), &[("-100".to_string(), "1".to_string())]);

    let sent = peer_b.sent.lock().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].2[1].get("text").unwrap(), "hello from A, corrected");

    assert_eq!(store.get_target_id(Platform::A, "42", Platform::B).unwrap(), Some("2".to_string()));
}

/// S6: a message carrying our own `"[name]\t"` sender header (the shape a
/// platform can echo back as a fresh inbound event) is dropped rather than
/// bounced back across the bridge.
#[tokio::test]
async fn message_with_our_own_sender_header_is_not_forwarded() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let peer_b = MockPeer::new(Platform::B);
    let (error_tx, _error_rx) = error_channel();
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), HashMap::new(), 3600);
    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry, 5, error_tx);

    let event = message_event(Platform::A, "g1", "1001", "42", "[Alice]\thello again");
    forwarder.handle_event(&RouterEvent { platform: Platform::A, event: EventVariant::Message(event) }).await;

    assert!(peer_b.sent.lock().await.is_empty());
}

/// Heartbeats never reach a Forwarder — they're filtered by the router
/// before strand dispatch.
#[tokio::test]
async fn heartbeat_events_never_reach_forwarders() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let peer_b = MockPeer::new(Platform::B);
    let (error_tx, _error_rx) = error_channel();
    let retry = RetryQueueHandle::new(store.clone(), Arc::new(bridge_media::MediaEngine::new(None).unwrap()), HashMap::new(), 3600);
    let forwarder = Forwarder::new(Platform::A, Platform::B, peer_b.clone(), store.clone(), vec![route()], translate_ctx(&store, Platform::A, Platform::B), retry, 5, error_tx);

    let router = EventRouter::new(store.clone(), vec![forwarder]);
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(router.run(rx));

    tx.send(RouterEvent { platform: Platform::A, event: EventVariant::Heartbeat { platform: Platform::A, raw_status: serde_json::json!({"ok": true}) } }).await.unwrap();
    // Give the router a tick to process before asserting nothing reached the peer.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(peer_b.sent.lock().await.is_empty());
    assert!(store.get_heartbeat(Platform::A).unwrap().is_some());
}
