//! Event Router (spec.md §4.7): fans in events from every Connection
//! Manager and dispatches them to the Forwarder, preserving arrival order
//! within a single `(platform, conversation_id)` via a per-conversation
//! strand. Owns publishing so Forwarder and Connection Manager never hold
//! references to each other directly (spec.md §9).

use std::collections::HashMap;
use std::sync::Arc;

use bridge_protocol::{EventVariant, NoticeKind, Platform};
use bridge_store::Store;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::conn::RouterEvent;
use crate::forwarder::Forwarder;

/// A single-consumer serialized execution context for one `(platform,
/// conversation_id)` pair — spec.md §5's "strand".
struct Strand {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

pub struct EventRouter {
    store: Arc<Store>,
    forwarders: Vec<Arc<Forwarder>>,
    strands: Mutex<HashMap<(Platform, String), Strand>>,
}

impl EventRouter {
    pub fn new(store: Arc<Store>, forwarders: Vec<Arc<Forwarder>>) -> Arc<Self> {
        Arc::new(EventRouter { store, forwarders, strands: Mutex::new(HashMap::new()) })
    }

    /// Consumes events from a Connection Manager's publish channel. Spawn
    /// one of these per platform.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RouterEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: RouterEvent) {
        match &event.event {
            EventVariant::Heartbeat { platform, raw_status } => {
                let raw = serde_json::to_string(raw_status).unwrap_or_default();
                if let Err(e) = self.store.save_heartbeat(*platform, Utc::now().timestamp(), &raw) {
                    warn!(error = %e, "failed to persist heartbeat");
                }
            }
            EventVariant::Unknown => debug!("dropping unparseable event at the router"),
            EventVariant::Message(m) => self.route_to_strand(event.platform, m.conversation_id.clone(), event).await,
            EventVariant::Notice(n) => {
                let conversation_key = n.conversation_id.clone().unwrap_or_default();
                if n.notice_kind == NoticeKind::Heartbeat {
                    return;
                }
                self.route_to_strand(event.platform, conversation_key, event).await;
            }
        }
    }

    async fn route_to_strand(&self, platform: Platform, conversation_id: String, event: RouterEvent) {
        let key = (platform, conversation_id);
        let mut strands = self.strands.lock().await;
        let strand = strands.entry(key.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let forwarders = self.forwarders.clone();
            tokio::spawn(strand_worker(rx, forwarders));
            Strand { tx }
        });
        if strand.tx.send(event).is_err() {
            // The worker died; drop the stale strand so the next event re-spawns one.
            strands.remove(&key);
        }
    }
}

async fn strand_worker(mut rx: mpsc::UnboundedReceiver<RouterEvent>, forwarders: Vec<Arc<Forwarder>>) {
    while let Some(event) = rx.recv().await {
        for forwarder in &forwarders {
            if forwarder.handles(event.platform) {
                forwarder.handle_event(&event).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_is_persisted_and_not_routed_to_a_strand() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let router = EventRouter::new(store.clone(), vec![]);
        router
            .dispatch(RouterEvent { platform: Platform::A, event: EventVariant::Heartbeat { platform: Platform::A, raw_status: serde_json::json!({"ok": true}) } })
            .await;
        assert!(store.get_heartbeat(Platform::A).unwrap().is_some());
    }
}
