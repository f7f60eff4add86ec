//! Row shapes persisted by the store. Each mirrors a table from spec.md §6.

use bridge_protocol::Platform;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMapping {
    pub source_platform: Platform,
    pub source_message_id: String,
    pub target_platform: Platform,
    pub target_message_id: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDisplayInfo {
    pub platform: Platform,
    pub user_id: String,
    /// Empty string means the global (cross-conversation) identity row.
    pub conversation_id: String,
    pub nickname: Option<String>,
    pub group_card: Option<String>,
    pub title: Option<String>,
    pub last_updated: i64,
}

impl UserDisplayInfo {
    /// Effective display name resolution order: group_card > title >
    /// nickname > user_id (spec.md §3).
    pub fn effective_name(&self) -> &str {
        self.group_card
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.title.as_deref().filter(|s| !s.is_empty()))
            .or(self.nickname.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFingerprintRecord {
    pub fingerprint_hash: String,
    pub peer_file_id: String,
    pub media_kind: String,
    pub is_animated: Option<bool>,
    pub mime_type: Option<String>,
    pub created_at: i64,
    pub last_used_at: i64,
    pub last_checked_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryKind {
    Send,
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRetryRecord {
    pub source_platform: Platform,
    pub source_message_id: String,
    pub target_platform: Platform,
    /// Serialized `bridge_protocol::Message` JSON — the already-translated
    /// segments, durable across restarts.
    pub payload: String,
    pub conversation_id: String,
    pub source_conversation_id: String,
    pub target_topic_id: Option<i64>,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_attempt_at: i64,
    pub last_failure_reason: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadKind {
    Proxy,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRetryRecord {
    pub platform: Platform,
    pub file_id: String,
    pub media_kind: String,
    pub url: String,
    pub local_path: String,
    pub use_proxy: bool,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub next_attempt_at: i64,
    pub last_failure_reason: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub platform: Platform,
    pub last_heartbeat_at: i64,
    pub raw_status: String,
}
