//! Variant P: platform B's long-poll HTTPS connection.
//!
//! There is no persistent socket: `connect` starts a task that repeatedly
//! calls `getUpdates` with a long server-side timeout, and `send_action`
//! is a plain synchronous `POST` per call — the asymmetry spec.md §4.1
//! calls out between the two Connection Manager variants.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bridge_protocol::platform_b::{ApiResponse, GetUpdates};
use bridge_protocol::Platform;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter_b;
use crate::config::PlatformBConfig;
use crate::conn::{ConnectionManager, RouterEvent, RPC_TIMEOUT};
use crate::error::BridgeError;

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_BATCH_LIMIT: u32 = 100;

pub struct PollBConnection {
    config: PlatformBConfig,
    client: reqwest::Client,
    event_tx: mpsc::Sender<RouterEvent>,
    offset: AtomicI64,
    running: Arc<AtomicBool>,
    polling: AtomicBool,
    self_ref: Weak<PollBConnection>,
}

impl PollBConnection {
    pub fn new(config: PlatformBConfig, event_tx: mpsc::Sender<RouterEvent>) -> Result<Arc<Self>, BridgeError> {
        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(!config.tls_verify);
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.to_url()).map_err(|e| BridgeError::Fatal(e.to_string()))?);
        }
        let client = builder.build().map_err(|e| BridgeError::Fatal(e.to_string()))?;
        Ok(Arc::new_cyclic(|self_ref| PollBConnection {
            config,
            client,
            event_tx,
            offset: AtomicI64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            polling: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        }))
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_base, self.config.bot_token, method)
    }

    async fn poll_once(&self) -> Result<(), BridgeError> {
        let offset = self.offset.load(Ordering::SeqCst);
        let body = GetUpdates { offset, timeout: POLL_TIMEOUT_SECS, limit: POLL_BATCH_LIMIT };
        let resp: ApiResponse<Vec<bridge_protocol::platform_b::Update>> = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .json(&body)
            .send()
            .await
            .map_err(|_| BridgeError::Disconnected { platform: Platform::B })?
            .json()
            .await
            .map_err(|e| BridgeError::ParseError(e.to_string()))?;

        let updates = resp.result.unwrap_or_default();
        for update in updates {
            self.offset.store(update.update_id + 1, Ordering::SeqCst);
            match adapter_b::parse_update(&update) {
                bridge_protocol::EventVariant::Unknown => debug!("dropping unrecognized platform B update"),
                event => {
                    let _ = self.event_tx.send(RouterEvent { platform: Platform::B, event }).await;
                }
            }
        }
        Ok(())
    }

    async fn run_poll_loop(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.polling.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "platform B poll failed");
                self.polling.store(false, Ordering::SeqCst);
                tokio::time::sleep(crate::conn::RECONNECT_DELAY).await;
                self.polling.store(true, Ordering::SeqCst);
            }
        }
        self.polling.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionManager for PollBConnection {
    fn platform(&self) -> Platform {
        Platform::B
    }

    async fn connect(&self) {
        if self.running.load(Ordering::SeqCst) {
            return;
        }
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(this.run_poll_loop());
    }

    async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    async fn send_action(&self, action: &str, params: Value) -> Result<Value, BridgeError> {
        let resp: ApiResponse<Value> = self
            .client
            .post(self.method_url(action))
            .timeout(RPC_TIMEOUT)
            .json(&params)
            .send()
            .await
            .map_err(|_| BridgeError::Disconnected { platform: Platform::B })?
            .json()
            .await
            .map_err(|e| BridgeError::ParseError(e.to_string()))?;

        if resp.ok {
            Ok(resp.result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::ParseError(resp.description.unwrap_or_else(|| format!("platform B rejected action {action}"))))
        }
    }
}

#[async_trait]
impl crate::conn::PeerSender for PollBConnection {
    fn platform(&self) -> Platform {
        Platform::B
    }

    async fn send_message(&self, conversation_id: &str, topic_id: Option<i64>, segments: &[bridge_protocol::Segment]) -> Result<String, BridgeError> {
        let chat_id: i64 = conversation_id.parse().map_err(|_| BridgeError::ParseError(format!("invalid platform B chat id {conversation_id}")))?;
        let reply_to = segments
            .iter()
            .find(|s| s.is(bridge_protocol::segment::kind::REPLY))
            .and_then(|s| s.get("id"))
            .and_then(|id| id.parse::<i64>().ok());
        let caption: String = segments
            .iter()
            .filter(|s| s.is(bridge_protocol::segment::kind::TEXT))
            .filter_map(|s| s.get("text"))
            .collect::<Vec<_>>()
            .join("");

        let (action, params) = if let Some(url) = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::IMAGE)).and_then(|s| s.get("url")) {
            ("sendPhoto", serde_json::to_value(adapter_b::build_send_photo(chat_id, topic_id, url.to_string(), Some(caption).filter(|c| !c.is_empty())))
                .map_err(|e| BridgeError::ParseError(e.to_string()))?)
        } else if let Some(url) = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::ANIMATION)).and_then(|s| s.get("url")) {
            ("sendAnimation", serde_json::to_value(adapter_b::build_send_animation(chat_id, topic_id, url.to_string())).map_err(|e| BridgeError::ParseError(e.to_string()))?)
        } else if let Some(url) = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::VIDEO)).and_then(|s| s.get("url")) {
            ("sendVideo", serde_json::to_value(adapter_b::build_send_video(chat_id, topic_id, url.to_string())).map_err(|e| BridgeError::ParseError(e.to_string()))?)
        } else if let Some(url) = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::VOICE)).and_then(|s| s.get("url")) {
            ("sendVoice", serde_json::to_value(adapter_b::build_send_voice(chat_id, topic_id, url.to_string())).map_err(|e| BridgeError::ParseError(e.to_string()))?)
        } else if let Some(url) = segments.iter().find(|s| s.is(bridge_protocol::segment::kind::FILE)).and_then(|s| s.get("url")) {
            ("sendDocument", serde_json::to_value(adapter_b::build_send_document(chat_id, topic_id, url.to_string())).map_err(|e| BridgeError::ParseError(e.to_string()))?)
        } else {
            ("sendMessage", serde_json::to_value(adapter_b::build_send_message(chat_id, topic_id, caption, reply_to)).map_err(|e| BridgeError::ParseError(e.to_string()))?)
        };

        let data = self.send_action(action, params).await?;
        let sent: bridge_protocol::platform_b::SentMessage = serde_json::from_value(data).map_err(|e| BridgeError::ParseError(e.to_string()))?;
        Ok(sent.message_id.to_string())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), BridgeError> {
        let chat_id: i64 = conversation_id.parse().map_err(|_| BridgeError::ParseError(format!("invalid platform B chat id {conversation_id}")))?;
        let message_id: i64 = message_id.parse().map_err(|_| BridgeError::ParseError(format!("invalid platform B message id {message_id}")))?;
        self.send_action("deleteMessage", serde_json::to_value(adapter_b::build_delete_message(chat_id, message_id)).map_err(|e| BridgeError::ParseError(e.to_string()))?).await?;
        Ok(())
    }

    async fn fetch_file_url(&self, file_id: &str) -> Result<Option<String>, BridgeError> {
        let data = self.send_action("getFile", serde_json::json!({ "file_id": file_id })).await?;
        let info: bridge_protocol::platform_b::FileInfo = serde_json::from_value(data).map_err(|e| BridgeError::ParseError(e.to_string()))?;
        Ok(info.file_path.map(|path| format!("{}/file/bot{}/{}", self.config.api_base, self.config.bot_token, path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_url_joins_base_token_and_method() {
        let (tx, _rx) = mpsc::channel(1);
        let cfg = PlatformBConfig {
            api_base: "https://api.telegram.org".into(),
            bot_token: "123:abc".into(),
            poll_interval_ms: 1000,
            proxy: None,
            tls_verify: true,
        };
        let conn = PollBConnection::new(cfg, tx).unwrap();
        assert_eq!(conn.method_url("getUpdates"), "https://api.telegram.org/bot123:abc/getUpdates");
    }
}
