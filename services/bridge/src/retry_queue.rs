//! Retry Queue (spec.md §4.5): durable pending-send and pending-download
//! records with exponential backoff, drained on a fixed tick by a single
//! logical worker. The in-memory view is derived from the store on every
//! tick — no separate in-memory queue (spec.md §5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bridge_protocol::{Platform, Segment};
use bridge_media::MediaEngine;
use bridge_store::{DownloadRetryRecord, MessageMapping, SendRetryRecord, Store};
use chrono::Utc;
use tracing::{info, warn};

use crate::conn::PeerSender;

const SEND_BASE_SECS: i64 = 2;
const DOWNLOAD_BASE_SECS: i64 = 5;
const MAX_BACKOFF_SECS: i64 = 300;
const SEND_BATCH: u32 = 50;
const DOWNLOAD_BATCH: u32 = 30;

fn backoff(attempt_count: u32, base: i64) -> i64 {
    let exponent = attempt_count.saturating_sub(1).min(20);
    (base.saturating_mul(1i64 << exponent)).min(MAX_BACKOFF_SECS)
}

pub struct RetryQueueHandle {
    store: Arc<Store>,
    media: Arc<MediaEngine>,
    send_peers: HashMap<Platform, Arc<dyn PeerSender>>,
    running: Arc<AtomicBool>,
    tick_interval: Duration,
}

impl RetryQueueHandle {
    pub fn new(store: Arc<Store>, media: Arc<MediaEngine>, send_peers: HashMap<Platform, Arc<dyn PeerSender>>, tick_seconds: u64) -> Arc<Self> {
        Arc::new(RetryQueueHandle { store, media, send_peers, running: Arc::new(AtomicBool::new(false)), tick_interval: Duration::from_secs(tick_seconds) })
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_send(
        &self,
        source_platform: Platform,
        target_platform: Platform,
        source_message_id: &str,
        segments: &[Segment],
        target_conversation_id: &str,
        source_conversation_id: &str,
        target_topic_id: Option<i64>,
        max_attempts: u32,
        reason: &str,
    ) {
        let now = Utc::now().timestamp();
        let payload = serde_json::to_string(segments).unwrap_or_default();
        let record = SendRetryRecord {
            source_platform,
            source_message_id: source_message_id.to_string(),
            target_platform,
            payload,
            conversation_id: target_conversation_id.to_string(),
            source_conversation_id: source_conversation_id.to_string(),
            target_topic_id,
            attempt_count: 1,
            max_attempts,
            next_attempt_at: now + backoff(1, SEND_BASE_SECS),
            last_failure_reason: Some(reason.to_string()),
            created_at: now,
        };
        if let Err(e) = self.store.add_send_retry(&record) {
            warn!(error = %e, "failed to persist send retry record");
        }
    }

    pub async fn enqueue_download(&self, platform: Platform, file_id: &str, media_kind: &str, url: &str, local_path: &str, use_proxy: bool, max_attempts: u32, reason: &str) {
        let now = Utc::now().timestamp();
        let record = DownloadRetryRecord {
            platform,
            file_id: file_id.to_string(),
            media_kind: media_kind.to_string(),
            url: url.to_string(),
            local_path: local_path.to_string(),
            use_proxy,
            attempt_count: 1,
            max_attempts,
            next_attempt_at: now + backoff(1, DOWNLOAD_BASE_SECS),
            last_failure_reason: Some(reason.to_string()),
            created_at: now,
        };
        if let Err(e) = self.store.add_download_retry(&record) {
            warn!(error = %e, "failed to persist download retry record");
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn process_send_retries(&self) {
        self.process_send_retries_at(Utc::now().timestamp()).await;
    }

    async fn process_send_retries_at(&self, now: i64) {
        let due = match self.store.due_send_retries(now, SEND_BATCH) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to query due send retries");
                return;
            }
        };
        for r in due {
            let Some(peer) = self.send_peers.get(&r.target_platform) else { continue };
            let segments: Vec<Segment> = serde_json::from_str(&r.payload).unwrap_or_default();
            match peer.send_message(&r.conversation_id, r.target_topic_id, &segments).await {
                Ok(target_message_id) => {
                    let _ = self.store.add_mapping(&MessageMapping {
                        source_platform: r.source_platform,
                        source_message_id: r.source_message_id.clone(),
                        target_platform: r.target_platform,
                        target_message_id,
                        created_at: Utc::now().timestamp(),
                    });
                    let _ = self.store.delete_send_retry(r.source_platform, &r.source_message_id, r.target_platform);
                    info!(message_id = %r.source_message_id, "retry succeeded");
                }
                Err(e) => {
                    let next_attempt = r.attempt_count + 1;
                    if next_attempt > r.max_attempts {
                        let _ = self.store.delete_send_retry(r.source_platform, &r.source_message_id, r.target_platform);
                        warn!(message_id = %r.source_message_id, attempts = r.attempt_count, "send retry exhausted");
                    } else {
                        let delay = backoff(next_attempt, SEND_BASE_SECS);
                        let _ = self.store.update_send_retry_attempt(r.source_platform, &r.source_message_id, r.target_platform, next_attempt, Utc::now().timestamp() + delay, &e.to_string());
                    }
                }
            }
        }
    }

    async fn process_download_retries(&self) {
        let now = Utc::now().timestamp();
        let due = match self.store.due_download_retries(now, DOWNLOAD_BATCH) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to query due download retries");
                return;
            }
        };
        for r in due {
            let outcome = self.media.download(&r.url, &PathBuf::from(&r.local_path), r.use_proxy).await;
            match outcome {
                Ok(_) => {
                    let _ = self.store.delete_download_retry(r.platform, &r.file_id);
                }
                Err(e) => {
                    let next_attempt = r.attempt_count + 1;
                    if next_attempt > r.max_attempts {
                        if r.use_proxy {
                            // One additional direct-connection attempt before giving up.
                            let _ = self.store.update_download_retry_attempt(r.platform, &r.file_id, r.max_attempts.saturating_sub(1).max(1), Utc::now().timestamp() + DOWNLOAD_BASE_SECS, &e.to_string(), false);
                        } else {
                            let _ = self.store.delete_download_retry(r.platform, &r.file_id);
                            warn!(file_id = %r.file_id, "download retry exhausted");
                        }
                    } else {
                        let delay = backoff(next_attempt, DOWNLOAD_BASE_SECS);
                        let _ = self.store.update_download_retry_attempt(r.platform, &r.file_id, next_attempt, Utc::now().timestamp() + delay, &e.to_string(), r.use_proxy);
                    }
                }
            }
        }
    }

    /// Exposes a single send-retry tick for integration tests that need to
    /// drive the queue deterministically instead of waiting on `run`'s timer.
    /// Uses `i64::MAX` as the "now" cutoff so retries due at any future
    /// backoff time are processed immediately, without a real sleep.
    #[doc(hidden)]
    pub async fn process_send_retries_for_test(&self) {
        self.process_send_retries_at(i64::MAX).await;
    }

    /// The worker loop. Runs until [`RetryQueueHandle::stop`] is called;
    /// a fault inside a tick is logged and the loop backs off 5s and
    /// continues rather than taking down the process (spec.md §4.5 step 3).
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(self.tick_interval).await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.process_send_retries().await;
            self.process_download_retries().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_exponential_law_capped_at_300() {
        assert_eq!(backoff(1, 2), 2);
        assert_eq!(backoff(2, 2), 4);
        assert_eq!(backoff(3, 2), 8);
        assert_eq!(backoff(1, 5), 5);
        assert_eq!(backoff(10, 2), 300);
    }
}
