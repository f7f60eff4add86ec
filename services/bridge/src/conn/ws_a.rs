//! Variant W: platform A's persistent duplex WebSocket connection.
//!
//! Grounded in the uplink/reconnect pattern of a hand-rolled WebSocket
//! client over `tokio-tungstenite`: a single writer task drains an
//! in-memory queue so concurrent callers never interleave frames on the
//! wire, and a correlation table matches `echo` ids on response frames to
//! waiting callers. The register-before-write ordering in
//! [`WsAConnection::send_action`] is the fix spec.md §4.1/§9 calls for —
//! the source codebase this is modeled on instead polls after writing and
//! defends against the race with a 100ms retry loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bridge_protocol::platform_a::{ActionResponse, ResponseStatus};
use bridge_protocol::Platform;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMsg;
use tracing::{debug, info, warn};

use crate::adapter_a;
use crate::config::PlatformAConfig;
use crate::conn::{ConnState, ConnectionManager, RouterEvent, RECONNECT_DELAY, RPC_TIMEOUT};
use crate::error::BridgeError;

type Waiter = oneshot::Sender<Result<Value, BridgeError>>;

pub struct WsAConnection {
    config: PlatformAConfig,
    state: std::sync::Mutex<ConnState>,
    correlation: Arc<std::sync::Mutex<HashMap<u64, Waiter>>>,
    echo_counter: AtomicU64,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<WsMsg>>>,
    event_tx: mpsc::Sender<RouterEvent>,
    stopped: Arc<AtomicBool>,
    self_ref: Weak<WsAConnection>,
}

impl WsAConnection {
    pub fn new(config: PlatformAConfig, event_tx: mpsc::Sender<RouterEvent>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| WsAConnection {
            config,
            state: std::sync::Mutex::new(ConnState::Disconnected),
            correlation: Arc::new(std::sync::Mutex::new(HashMap::new())),
            echo_counter: AtomicU64::new(1),
            outbound_tx: Mutex::new(None),
            event_tx,
            stopped: Arc::new(AtomicBool::new(false)),
            self_ref: self_ref.clone(),
        })
    }

    fn set_state(&self, s: ConnState) {
        *self.state.lock().expect("conn state mutex poisoned") = s;
    }

    fn fail_all_waiters(&self, err: impl Fn() -> BridgeError) {
        let mut table = self.correlation.lock().expect("correlation mutex poisoned");
        for (_, waiter) in table.drain() {
            let _ = waiter.send(Err(err()));
        }
    }

    async fn run_connection_loop(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                self.set_state(ConnState::Disconnected);
                return;
            }
            self.set_state(ConnState::Connecting);
            match tokio_tungstenite::connect_async(&self.config.ws_url).await {
                Ok((stream, _resp)) => {
                    info!(url = %self.config.ws_url, "platform A connected");
                    self.set_state(ConnState::Connected);
                    let (mut write, mut read) = stream.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<WsMsg>();
                    *self.outbound_tx.lock().await = Some(tx);

                    let writer = tokio::spawn(async move {
                        while let Some(msg) = rx.recv().await {
                            if write.send(msg).await.is_err() {
                                break;
                            }
                        }
                    });

                    while let Some(frame) = read.next().await {
                        match frame {
                            Ok(WsMsg::Text(text)) => self.handle_frame(&text).await,
                            Ok(WsMsg::Close(_)) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }

                    writer.abort();
                    *self.outbound_tx.lock().await = None;
                    self.fail_all_waiters(|| BridgeError::Disconnected { platform: Platform::A });
                }
                Err(e) => {
                    warn!(error = %e, "platform A connect failed");
                }
            }

            if self.stopped.load(Ordering::SeqCst) {
                self.set_state(ConnState::Disconnected);
                return;
            }
            self.set_state(ConnState::Reconnecting);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn handle_frame(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping malformed platform A frame");
                return;
            }
        };

        if let Some(echo) = value.get("echo").and_then(Value::as_u64) {
            let waiter = self.correlation.lock().expect("correlation mutex poisoned").remove(&echo);
            if let Some(waiter) = waiter {
                let _ = waiter.send(Ok(value));
            }
            return;
        }

        match adapter_a::parse_event(&value) {
            bridge_protocol::EventVariant::Unknown => debug!("dropping unrecognized platform A frame"),
            event => {
                let _ = self.event_tx.send(RouterEvent { platform: Platform::A, event }).await;
            }
        }
    }
}

#[async_trait]
impl ConnectionManager for WsAConnection {
    fn platform(&self) -> Platform {
        Platform::A
    }

    async fn connect(&self) {
        let state = *self.state.lock().expect("conn state mutex poisoned");
        if state == ConnState::Connecting || state == ConnState::Connected {
            return;
        }
        self.stopped.store(false, Ordering::SeqCst);
        let Some(this) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(this.run_connection_loop());
    }

    async fn disconnect(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(tx) = self.outbound_tx.lock().await.take() {
            let _ = tx.send(WsMsg::Close(None));
        }
        self.set_state(ConnState::Disconnected);
        self.fail_all_waiters(|| BridgeError::Disconnected { platform: Platform::A });
    }

    fn is_connected(&self) -> bool {
        *self.state.lock().expect("conn state mutex poisoned") == ConnState::Connected
    }

    async fn send_action(&self, action: &str, params: Value) -> Result<Value, BridgeError> {
        let Some(tx) = self.outbound_tx.lock().await.clone() else {
            return Err(BridgeError::Disconnected { platform: Platform::A });
        };
        let echo = self.echo_counter.fetch_add(1, Ordering::SeqCst);
        let (resp_tx, resp_rx) = oneshot::channel();

        // Register before writing: a response for this echo could in
        // principle be observed before the write call returns.
        self.correlation.lock().expect("correlation mutex poisoned").insert(echo, resp_tx);

        let frame = adapter_a::serialize_action(action, params, echo);
        let text = serde_json::to_string(&frame).map_err(|e| BridgeError::ParseError(e.to_string()))?;
        if tx.send(WsMsg::Text(text)).is_err() {
            self.correlation.lock().expect("correlation mutex poisoned").remove(&echo);
            return Err(BridgeError::Disconnected { platform: Platform::A });
        }

        match tokio::time::timeout(RPC_TIMEOUT, resp_rx).await {
            Ok(Ok(result)) => result.and_then(unwrap_data),
            Ok(Err(_)) => Err(BridgeError::Disconnected { platform: Platform::A }),
            Err(_) => {
                self.correlation.lock().expect("correlation mutex poisoned").remove(&echo);
                Err(BridgeError::Timeout(RPC_TIMEOUT))
            }
        }
    }
}

/// Unwraps the `{status, retcode, data, echo}` envelope every platform A
/// response carries, returning just `data` — callers like `send_message`
/// and `fetch_file_url` read fields off that inner object, not the
/// envelope.
fn unwrap_data(frame: Value) -> Result<Value, BridgeError> {
    let resp: ActionResponse = serde_json::from_value(frame).map_err(|e| BridgeError::ParseError(e.to_string()))?;
    if resp.status == ResponseStatus::Failed {
        return Err(BridgeError::ParseError(format!("platform A action failed (retcode {})", resp.retcode)));
    }
    Ok(resp.data)
}

#[async_trait]
impl crate::conn::PeerSender for WsAConnection {
    fn platform(&self) -> Platform {
        Platform::A
    }

    async fn send_message(&self, conversation_id: &str, _topic_id: Option<i64>, segments: &[bridge_protocol::Segment]) -> Result<String, BridgeError> {
        let group_id: i64 = conversation_id.parse().map_err(|_| BridgeError::ParseError(format!("invalid platform A group id {conversation_id}")))?;
        let message = bridge_protocol::cq::encode(segments);
        let params = serde_json::json!({ "group_id": group_id, "message": message });
        let data = ConnectionManager::send_action(self, "send_group_msg", params).await?;
        let message_id = data.get("message_id").and_then(Value::as_i64).ok_or_else(|| BridgeError::ParseError("send_group_msg response missing message_id".into()))?;
        Ok(message_id.to_string())
    }

    async fn delete_message(&self, _conversation_id: &str, message_id: &str) -> Result<(), BridgeError> {
        let message_id: i64 = message_id.parse().map_err(|_| BridgeError::ParseError(format!("invalid platform A message id {message_id}")))?;
        ConnectionManager::send_action(self, "delete_msg", serde_json::json!({ "message_id": message_id })).await?;
        Ok(())
    }

    async fn fetch_file_url(&self, file_id: &str) -> Result<Option<String>, BridgeError> {
        let data = ConnectionManager::send_action(self, "get_image", serde_json::json!({ "file": file_id })).await?;
        Ok(data.get("url").and_then(Value::as_str).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_counter_is_monotonic_and_never_reused_while_pending() {
        let counter = AtomicU64::new(1);
        let a = counter.fetch_add(1, Ordering::SeqCst);
        let b = counter.fetch_add(1, Ordering::SeqCst);
        assert_ne!(a, b);
    }

    #[test]
    fn unwrap_data_extracts_nested_data_field() {
        let frame = serde_json::json!({"status": "ok", "retcode": 0, "data": {"message_id": 42}, "echo": 1});
        let data = unwrap_data(frame).unwrap();
        assert_eq!(data.get("message_id").and_then(Value::as_i64), Some(42));
    }

    #[test]
    fn unwrap_data_rejects_failed_status() {
        let frame = serde_json::json!({"status": "failed", "retcode": 100, "data": {}, "echo": 1});
        assert!(unwrap_data(frame).is_err());
    }
}
