//! Connection Manager contracts (spec.md §4.1) and the two concrete
//! transports that implement them.
//!
//! `ConnectionManager` is the transport-facing contract (connect,
//! send_action, event delivery). `PeerSender` is the narrower
//! capability interface the Forwarder actually depends on — per the
//! design note in spec.md §9, collapsing what the original codebase
//! expressed as a deep polymorphic bot hierarchy into two small traits.

pub mod poll_b;
pub mod ws_a;

use std::time::Duration;

use async_trait::async_trait;
use bridge_protocol::{EventVariant, Platform, Segment};

use crate::error::BridgeError;

pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Transport-level contract shared by Variant W (persistent duplex) and
/// Variant P (long-poll + RPC).
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    fn platform(&self) -> Platform;

    /// Idempotent: calling `connect` on an already-connecting/connected
    /// manager is a no-op.
    async fn connect(&self);

    /// Cancels the transport task and transitions to `Disconnected`
    /// terminally.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Send an action and await its correlated response (or a platform B
    /// POST's direct response). Times out after [`RPC_TIMEOUT`].
    async fn send_action(&self, action: &str, params: serde_json::Value) -> Result<serde_json::Value, BridgeError>;
}

/// The narrow capability interface a Forwarder needs from whichever peer
/// it is forwarding *to*. Implemented by an adapter struct per platform on
/// top of that platform's `ConnectionManager`.
#[async_trait]
pub trait PeerSender: Send + Sync {
    fn platform(&self) -> Platform;

    async fn send_message(&self, conversation_id: &str, topic_id: Option<i64>, segments: &[Segment]) -> Result<String, BridgeError>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), BridgeError>;

    /// Resolve a file/document segment that arrived without a usable URL.
    async fn fetch_file_url(&self, file_id: &str) -> Result<Option<String>, BridgeError>;
}

/// What a Connection Manager publishes to the Event Router (spec.md §4.7:
/// "connections publish to the router, forwarders subscribe", breaking the
/// Forwarder/Connection Manager reference cycle described in spec.md §9).
#[derive(Debug, Clone)]
pub struct RouterEvent {
    pub platform: Platform,
    pub event: EventVariant,
}
