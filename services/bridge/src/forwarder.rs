//! Forwarder (spec.md §4.8): the policy layer composing the translator,
//! mapping store and media engine for one direction of the bridge. Two
//! instances exist — A→B and B→A — sharing the same route table.

use std::sync::Arc;

use bridge_protocol::{NoticeKind, Platform, Segment};
use bridge_store::{MessageMapping, Store, UserDisplayInfo};
use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{BridgeRoute, RouteMode};
use crate::conn::{PeerSender, RouterEvent};
use crate::error::ErrorEvent;
use crate::retry_queue::RetryQueueHandle;
use crate::translator::{self, TranslateContext};

pub struct Forwarder {
    source_platform: Platform,
    target_platform: Platform,
    peer: Arc<dyn PeerSender>,
    store: Arc<Store>,
    routes: Vec<BridgeRoute>,
    translate_ctx: TranslateContext,
    retry: Arc<RetryQueueHandle>,
    max_send_attempts: u32,
    error_tx: tokio::sync::mpsc::Sender<ErrorEvent>,
}

struct ResolvedRoute {
    target_conversation_id: String,
    target_topic_id: Option<i64>,
    show_sender: bool,
}

impl Forwarder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_platform: Platform,
        target_platform: Platform,
        peer: Arc<dyn PeerSender>,
        store: Arc<Store>,
        routes: Vec<BridgeRoute>,
        translate_ctx: TranslateContext,
        retry: Arc<RetryQueueHandle>,
        max_send_attempts: u32,
        error_tx: tokio::sync::mpsc::Sender<ErrorEvent>,
    ) -> Arc<Self> {
        Arc::new(Forwarder { source_platform, target_platform, peer, store, routes, translate_ctx, retry, max_send_attempts, error_tx })
    }

    pub fn handles(&self, platform: Platform) -> bool {
        platform == self.source_platform
    }

    pub async fn handle_event(&self, event: &RouterEvent) {
        match &event.event {
            bridge_protocol::EventVariant::Message(m) => self.handle_message(m).await,
            bridge_protocol::EventVariant::Notice(n) => self.handle_notice(n).await,
            _ => {}
        }
    }

    fn resolve_route(&self, conversation_id: &str) -> Option<ResolvedRoute> {
        match self.source_platform {
            Platform::A => {
                let route = self.routes.iter().find(|r| r.a_conversation == conversation_id)?;
                Some(ResolvedRoute {
                    target_conversation_id: route.b_conversation.to_string(),
                    target_topic_id: if route.mode == RouteMode::Topic { route.b_topic } else { None },
                    show_sender: route.show_sender_a_to_b,
                })
            }
            Platform::B => {
                let parsed: i64 = conversation_id.parse().ok()?;
                let route = self.routes.iter().find(|r| r.b_conversation == parsed)?;
                Some(ResolvedRoute { target_conversation_id: route.a_conversation.clone(), target_topic_id: None, show_sender: route.show_sender_b_to_a })
            }
        }
    }

    async fn handle_message(&self, m: &bridge_protocol::MessageEvent) {
        let Some(route) = self.resolve_route(&m.conversation_id) else {
            debug!(conversation_id = %m.conversation_id, "no bridge route configured; dropping");
            return;
        };

        if has_sentinel_prefix(&m.raw_text) {
            debug!(message_id = %m.message_id, "dropping message carrying our own sender-header sentinel");
            return;
        }

        let existing_target = match self.store.get_target_id(self.source_platform, &m.message_id, self.target_platform) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(error = %e, "mapping lookup failed");
                return;
            }
        };

        if existing_target.is_some() && !m.is_edit {
            debug!(message_id = %m.message_id, "already forwarded; dropping duplicate");
            return;
        }

        if let Some(old_peer_id) = &existing_target {
            if let Err(e) = self.peer.delete_message(&route.target_conversation_id, old_peer_id).await {
                warn!(error = %e, message_id = %m.message_id, "failed to delete peer message for edit; resending anyway");
            }
            let _ = self.store.delete_mapping(self.source_platform, &m.message_id, self.target_platform);
        }

        if let Some(name) = &m.sender_display_name {
            let now = Utc::now().timestamp();
            let _ = self.store.save_user(&UserDisplayInfo {
                platform: self.source_platform,
                user_id: m.user_id.clone(),
                conversation_id: m.conversation_id.clone(),
                nickname: Some(name.clone()),
                group_card: None,
                title: None,
                last_updated: now,
            });
        }

        let mut segments = translator::translate(&self.translate_ctx, &m.segments).await;
        if route.show_sender {
            let display = self.store.get_display_name(self.source_platform, &m.user_id, Some(&m.conversation_id)).unwrap_or_else(|_| m.user_id.clone());
            segments.insert(0, Segment::text(format!("[{display}]\t")));
        }

        match self.peer.send_message(&route.target_conversation_id, route.target_topic_id, &segments).await {
            Ok(target_message_id) => {
                let _ = self.store.add_mapping(&MessageMapping {
                    source_platform: self.source_platform,
                    source_message_id: m.message_id.clone(),
                    target_platform: self.target_platform,
                    target_message_id,
                    created_at: Utc::now().timestamp(),
                });
            }
            Err(e) => {
                warn!(error = %e, message_id = %m.message_id, "forward failed; enqueuing retry");
                self.retry
                    .enqueue_send(
                        self.source_platform,
                        self.target_platform,
                        &m.message_id,
                        &segments,
                        &route.target_conversation_id,
                        &m.conversation_id,
                        route.target_topic_id,
                        self.max_send_attempts,
                        &e.to_string(),
                    )
                    .await;
                let _ = self
                    .error_tx
                    .send(ErrorEvent {
                        kind: "forward_failed".into(),
                        platform: self.target_platform,
                        conversation_id: Some(route.target_conversation_id),
                        detail: e.to_string(),
                        occurred_at: Utc::now().timestamp(),
                    })
                    .await;
            }
        }
    }

    async fn handle_notice(&self, n: &bridge_protocol::NoticeEvent) {
        if n.notice_kind != NoticeKind::Recall {
            return;
        }
        let Some(affected) = &n.affected_message_id else { return };
        let Ok(Some(peer_id)) = self.store.get_target_id(self.source_platform, affected, self.target_platform) else {
            return;
        };
        if let Some(route) = n.conversation_id.as_deref().and_then(|c| self.resolve_route(c)) {
            if let Err(e) = self.peer.delete_message(&route.target_conversation_id, &peer_id).await {
                warn!(error = %e, "peer recall propagation failed; dropping mapping regardless");
            }
        }
        let _ = self.store.delete_mapping(self.source_platform, affected, self.target_platform);
    }
}

/// Detects whether `text` begins with the `"[display]\t"` sender-header
/// this same forwarder pair prepends — the signal that a platform echoed
/// the bridge's own forwarded message back as a fresh inbound event
/// (spec.md §4.8 item 2, §8 S6).
fn has_sentinel_prefix(text: &str) -> bool {
    let Some(rest) = text.strip_prefix('[') else { return false };
    match rest.find(']') {
        Some(idx) => rest[idx + 1..].starts_with('\t'),
        None => false,
    }
}
